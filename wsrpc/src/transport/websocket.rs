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

//! WebSocket sessions and the frame transport adapter.
//!
//! A [`Session`] wraps the write half of a WebSocket connection. Envelopes
//! are serialized to a single JSON document and sent as a text frame when
//! they fit in [`MAX_TEXT_MESSAGE_LENGTH`] bytes, or as one UTF-8 binary
//! frame when larger. Sends on a session are serialized: a send completes
//! before the next one begins.
//!
//! The read half ([`FrameSource`]) is handed to the endpoint engine, which
//! runs the per-session receive loop.

use crate::message::{epoch_millis, Envelope};
use crate::transport::TransportError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_hdr_async, connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// The maximum serialized size (in bytes) sent as a WebSocket text frame.
/// Anything larger goes out as a single UTF-8 binary frame.
pub const MAX_TEXT_MESSAGE_LENGTH: usize = 65_536;

/// The WebSocket subprotocol advertised during the handshake.
pub const SUBPROTOCOL: &str = "json";

/// The WebSocket stream type used by every session.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The read half of a session, consumed by the endpoint engine.
pub type FrameSource = SplitStream<WsStream>;

type FrameSink = SplitSink<WsStream, Message>;

/// Process-unique identifier of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value of this id.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest serialized envelope sent as a text frame; larger payloads are
    /// sent as one binary frame.
    pub max_text_message_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_text_message_length: MAX_TEXT_MESSAGE_LENGTH,
        }
    }
}

/// Chooses text or binary framing for a serialized envelope.
fn choose_frame(json: String, max_text_message_length: usize) -> Message {
    if json.len() <= max_text_message_length {
        Message::Text(json)
    } else {
        Message::Binary(json.into_bytes())
    }
}

struct SessionInner {
    id: SessionId,
    config: SessionConfig,
    sink: Mutex<FrameSink>,
    open: AtomicBool,
    peer_addr: Option<SocketAddr>,
    pongs_received: AtomicU64,
}

/// One WebSocket connection, shared between the engine and its owner.
///
/// Cloning a `Session` clones a handle to the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    fn attach(stream: WsStream, config: SessionConfig, peer_addr: Option<SocketAddr>) -> (Self, FrameSource) {
        let (sink, source) = stream.split();
        let session = Self {
            inner: Arc::new(SessionInner {
                id: SessionId::next(),
                config,
                sink: Mutex::new(sink),
                open: AtomicBool::new(true),
                peer_addr,
                pongs_received: AtomicU64::new(0),
            }),
        };
        (session, source)
    }

    /// The process-unique id of this session.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// The peer address, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Returns `true` while the session has not been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record_pong(&self) {
        self.inner.pongs_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of PONG frames observed on this session.
    #[must_use]
    pub fn pongs_received(&self) -> u64 {
        self.inner.pongs_received.load(Ordering::Relaxed)
    }

    /// Sends an envelope on this session.
    ///
    /// Non-reply envelopes are stamped with `sentMillis` immediately before
    /// transmission; the stamped envelope is returned. The send is complete
    /// (flushed to the transport) when this method returns, and concurrent
    /// sends on the same session are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionClosed`] if the session is not open,
    /// [`TransportError::Encode`] if the envelope cannot be serialized, or
    /// [`TransportError::SendFailed`] if the transport write fails.
    pub async fn send(&self, mut envelope: Envelope) -> Result<Envelope, TransportError> {
        if !self.is_open() {
            return Err(TransportError::SessionClosed);
        }

        if !envelope.is_reply() {
            envelope.set_sent_millis(Some(epoch_millis()));
        }

        let json = serde_json::to_string(&envelope)
            .map_err(|source| TransportError::Encode { source })?;
        if json.len() > self.inner.config.max_text_message_length {
            debug!(
                session = %self.id(),
                bytes = json.len(),
                "sending oversized message as a binary frame"
            );
        }
        let frame = choose_frame(json, self.inner.config.max_text_message_length);

        let mut sink = self.inner.sink.lock().await;
        sink.send(frame)
            .await
            .map_err(|source| TransportError::SendFailed { source })?;
        Ok(envelope)
    }

    /// Sends a keep-alive PING whose payload is the current epoch millis as
    /// decimal ASCII.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionClosed`] if the session is not open,
    /// or [`TransportError::SendFailed`] if the write fails.
    pub async fn ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::SessionClosed);
        }

        let payload = epoch_millis().to_string().into_bytes();
        let mut sink = self.inner.sink.lock().await;
        sink.send(Message::Ping(payload))
            .await
            .map_err(|source| TransportError::SendFailed { source })
    }

    /// Answers a PING with a PONG carrying the same payload.
    pub(crate) async fn pong(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::SessionClosed);
        }

        let mut sink = self.inner.sink.lock().await;
        sink.send(Message::Pong(payload))
            .await
            .map_err(|source| TransportError::SendFailed { source })
    }

    /// Closes the session, sending a close frame with the given code and
    /// reason. Closing an already-closed session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendFailed`] if the close frame cannot be
    /// written; the session is marked closed regardless.
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        if self.inner.open.swap(false, Ordering::SeqCst) {
            let frame = CloseFrame {
                code,
                reason: reason.to_owned().into(),
            };
            let mut sink = self.inner.sink.lock().await;
            match sink.send(Message::Close(Some(frame))).await {
                Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {}
                Err(source) => return Err(TransportError::SendFailed { source }),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .field("peer_addr", &self.inner.peer_addr)
            .finish()
    }
}

/// Listens for inbound WebSocket sessions.
pub struct WebSocketListener {
    listener: TcpListener,
    config: SessionConfig,
}

impl WebSocketListener {
    /// Binds to a local address with the default session config.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the address cannot be bound.
    pub async fn bind(addr: impl Into<String>) -> Result<Self, TransportError> {
        Self::bind_with_config(addr, SessionConfig::default()).await
    }

    /// Binds to a local address.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the address cannot be bound.
    pub async fn bind_with_config(
        addr: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Self, TransportError> {
        let address = addr.into();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| TransportError::BindFailed { address, source })?;
        Ok(Self { listener, config })
    }

    /// The local address this listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the socket cannot report its address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts the next session, performing the WebSocket handshake and
    /// echoing the `"json"` subprotocol when the peer offers it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the TCP accept fails, or
    /// [`TransportError::HandshakeFailed`] if the WebSocket handshake fails.
    pub async fn accept(&self) -> Result<(Session, FrameSource), TransportError> {
        let (stream, peer_addr) = self.listener.accept().await?;

        let negotiate = |request: &HandshakeRequest,
                         mut response: HandshakeResponse|
         -> Result<HandshakeResponse, ErrorResponse> {
            if offers_subprotocol(request) {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
            }
            Ok(response)
        };

        let stream = accept_hdr_async(MaybeTlsStream::Plain(stream), negotiate)
            .await
            .map_err(|source| TransportError::HandshakeFailed { source })?;

        Ok(Session::attach(stream, self.config.clone(), Some(peer_addr)))
    }
}

fn offers_subprotocol(request: &HandshakeRequest) -> bool {
    request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|offer| offer.trim().eq_ignore_ascii_case(SUBPROTOCOL))
}

/// Connects to a WebSocket service with the default session config.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] if the URL is invalid or the
/// connection or handshake fails.
pub async fn connect(url: &str) -> Result<(Session, FrameSource), TransportError> {
    connect_with_config(url, SessionConfig::default()).await
}

/// Connects to a WebSocket service, advertising the `"json"` subprotocol.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] if the URL is invalid or the
/// connection or handshake fails.
pub async fn connect_with_config(
    url: &str,
    config: SessionConfig,
) -> Result<(Session, FrameSource), TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|source| TransportError::ConnectionFailed {
            address: url.to_owned(),
            source,
        })?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

    let (stream, _response) =
        connect_async(request)
            .await
            .map_err(|source| TransportError::ConnectionFailed {
                address: url.to_owned(),
                source,
            })?;

    let peer_addr = match stream.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
        _ => None,
    };

    Ok(Session::attach(stream, config, peer_addr))
}
