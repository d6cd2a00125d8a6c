//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Top-level error types.
//!
//! Failures are layered: [`TransportError`] covers the WebSocket connection,
//! [`ProtocolError`] covers envelope and dispatch rules, handler errors are
//! opaque boxed values from user code, and [`ProxyError`] covers dependency
//! connection management. [`WsRpcError`] composes the layers into the single
//! error type returned by the public API.

use crate::client::RequestError;
use crate::message::CodecError;
use crate::service::ProxyError;
use crate::transport::{SessionId, TransportError};
use thiserror::Error;

/// A boxed error produced by user handler code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Violations of the envelope protocol or dispatch rules.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An inbound frame did not contain a valid envelope.
    #[error("malformed message envelope: {source}")]
    MalformedEnvelope {
        /// The underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },

    /// A binary frame did not contain UTF-8 text.
    #[error("binary frame is not valid utf-8: {source}")]
    InvalidUtf8 {
        /// The underlying conversion error.
        #[from]
        source: std::string::FromUtf8Error,
    },

    /// An inbound envelope had no operation name.
    #[error("message op is missing")]
    MissingOp,

    /// No handler is registered for the operation.
    #[error("unknown message type '{op}'")]
    UnknownMessageType {
        /// The operation that could not be dispatched.
        op: String,
    },

    /// The operation name is reserved for replies.
    #[error("op '{op}' is reserved; use the response factories instead")]
    ReservedOp {
        /// The rejected operation name.
        op: String,
    },

    /// A reply was requested for a message that does not expect one.
    #[error("the request message is not expecting a response")]
    NotExpectingResponse,

    /// A response view was constructed over a non-reply envelope.
    #[error("message is not a response")]
    NotAResponse,

    /// A request id was registered twice in the pending-call registry.
    #[error("request '{id}' is already waiting for a response")]
    DuplicateRequestId {
        /// The duplicated correlation id.
        id: String,
    },

    /// The session has no pending-call registry entry.
    #[error("session {session} is not registered for pending calls")]
    UntrackedSession {
        /// The unregistered session.
        session: SessionId,
    },

    /// A message body could not be converted.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Top-level error type for framework operations.
#[derive(Debug, Error)]
pub enum WsRpcError {
    /// A transport-layer failure: the connection itself is at fault.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A protocol-layer failure: envelope or dispatch rules were violated.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A remote call completed with an error reply.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// A service proxy could not produce a client.
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// An error raised by user handler code.
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),
}

impl WsRpcError {
    /// Wraps a handler-raised error.
    #[must_use]
    pub fn handler(error: impl Into<BoxError>) -> Self {
        Self::Handler(error.into())
    }

    /// Returns `true` if this is a transport error.
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if this is a protocol error.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` if this is an error reply surfaced from a remote call.
    #[must_use]
    pub const fn is_request_error(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Returns `true` if this is a service-proxy error.
    #[must_use]
    pub const fn is_proxy_error(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }

    /// Returns `true` if this is a handler error.
    #[must_use]
    pub const fn is_handler_error(&self) -> bool {
        matches!(self, Self::Handler(_))
    }
}

impl From<CodecError> for WsRpcError {
    fn from(error: CodecError) -> Self {
        Self::Protocol(ProtocolError::Codec(error))
    }
}
