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

//! Transport-layer error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised by the WebSocket transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish a connection to the remote endpoint.
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        /// The address that failed to connect.
        address: String,
        /// The underlying WebSocket error.
        #[source]
        source: tungstenite::Error,
    },

    /// Failed to bind a listener to a local address.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        /// The address that failed to bind.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The WebSocket handshake with a connecting peer failed.
    #[error("websocket handshake failed: {source}")]
    HandshakeFailed {
        /// The underlying WebSocket error.
        #[source]
        source: tungstenite::Error,
    },

    /// An established connection became unusable.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Description of why the connection was lost.
        reason: String,
    },

    /// The session closed before the operation could complete.
    ///
    /// This is also the terminal error delivered to waiters purged from the
    /// pending-call registry when their session closes.
    #[error("session closed")]
    SessionClosed,

    /// An envelope could not be serialized for transmission.
    #[error("failed to encode envelope: {source}")]
    Encode {
        /// The underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// A frame could not be written to the session.
    #[error("failed to send message: {source}")]
    SendFailed {
        /// The underlying WebSocket error.
        #[source]
        source: tungstenite::Error,
    },

    /// A lower-level I/O failure.
    #[error("i/o error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Returns `true` if the failure concerns the connection itself rather
    /// than a single message.
    #[must_use]
    pub const fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionLost { .. }
                | Self::SessionClosed
                | Self::Io { .. }
        )
    }
}
