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

//! The caller-side view over a reply envelope.

use crate::error::{ProtocolError, WsRpcError};
use crate::message::{Envelope, ErrorDetails, JsonConverter, RawJson};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A remote call completed with an error reply.
#[derive(Debug, Clone, Error)]
#[error("request failed: {message}")]
pub struct RequestError {
    message: String,
    reasons: Vec<String>,
}

impl RequestError {
    fn new(message: impl Into<String>, reasons: Vec<String>) -> Self {
        Self {
            message: message.into(),
            reasons,
        }
    }

    /// The error message reported by the peer.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The peer's chain of causes, innermost last.
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }
}

/// A typed view over a reply envelope.
///
/// Success or failure is adjudicated by the reply's op, never by the body: a
/// successful response may itself decode to "no value".
pub struct Response<Res> {
    envelope: Envelope,
    converter: Arc<dyn JsonConverter<Res>>,
}

impl<Res> Response<Res> {
    pub(crate) fn new(
        envelope: Envelope,
        converter: Arc<dyn JsonConverter<Res>>,
    ) -> Result<Self, ProtocolError> {
        if !envelope.is_reply() {
            return Err(ProtocolError::NotAResponse);
        }
        Ok(Self {
            envelope,
            converter,
        })
    }

    /// Returns `true` if the reply is not an error.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        !self.envelope.is_error()
    }

    /// Decodes the reply body into the response type.
    ///
    /// # Errors
    ///
    /// Returns the peer's error as [`WsRpcError::Request`] when the reply is
    /// an error, or a codec error if the body does not match `Res`.
    pub fn value(&self) -> Result<Res, WsRpcError> {
        if !self.is_successful() {
            return Err(self.request_error().into());
        }
        Ok(self.converter.deserialize(self.envelope.body())?)
    }

    /// Decodes the error body when the reply is an error.
    ///
    /// Falls back to wrapping the raw body text when it is not a serialized
    /// [`ErrorDetails`]. Returns `None` for successful replies.
    #[must_use]
    pub fn error(&self) -> Option<ErrorDetails> {
        if self.is_successful() {
            return None;
        }

        Some(match self.envelope.body() {
            Some(raw) => raw
                .parse::<ErrorDetails>()
                .unwrap_or_else(|_| ErrorDetails::new(raw.get())),
            None => ErrorDetails::new("request failed with an empty error body"),
        })
    }

    /// The raw error body, for peers that do not reply with the standard
    /// error record. Returns `None` for successful replies.
    #[must_use]
    pub fn raw_error(&self) -> Option<&RawJson> {
        if self.is_successful() {
            None
        } else {
            self.envelope.body()
        }
    }

    /// Surfaces an error reply as a [`RequestError`], or returns `self`.
    ///
    /// # Errors
    ///
    /// Returns the peer's error when the reply is an error.
    pub fn throw_if_error(&self) -> Result<&Self, RequestError> {
        if self.is_successful() {
            Ok(self)
        } else {
            Err(self.request_error())
        }
    }

    fn request_error(&self) -> RequestError {
        match self.error() {
            Some(details) => RequestError::new(
                details.error(),
                details.reasons().map(<[String]>::to_vec).unwrap_or_default(),
            ),
            None => RequestError::new("request failed", Vec::new()),
        }
    }

    /// The underlying reply envelope.
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Wall-clock milliseconds from request transmission to reply arrival.
    ///
    /// Available on replies whose timing marks survived the trip; the value
    /// relies on the reply carrying the request's send time.
    #[must_use]
    pub fn roundtrip_millis(&self) -> Option<i64> {
        match (self.envelope.received_millis(), self.envelope.sent_millis()) {
            (Some(received), Some(sent)) => Some(received - sent),
            _ => None,
        }
    }

    /// Milliseconds the peer spent inside the handler.
    #[must_use]
    pub fn processing_millis(&self) -> Option<i64> {
        match (
            self.envelope.stop_processing_millis(),
            self.envelope.start_processing_millis(),
        ) {
            (Some(stop), Some(start)) => Some(stop - start),
            _ => None,
        }
    }

    /// Round trip minus processing time. May be negative under clock skew
    /// across hosts; reported as-is.
    #[must_use]
    pub fn network_latency_millis(&self) -> Option<i64> {
        match (self.roundtrip_millis(), self.processing_millis()) {
            (Some(roundtrip), Some(processing)) => Some(roundtrip - processing),
            _ => None,
        }
    }
}

impl<Res> fmt::Debug for Response<Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("envelope", &self.envelope)
            .finish()
    }
}
