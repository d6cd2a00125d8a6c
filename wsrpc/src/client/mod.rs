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

//! The client endpoint: initiates calls on a single managed session.
//!
//! A [`Client`] owns one WebSocket session at a time and exposes three call
//! shapes: fire-and-forget ([`Client::send_message`]), awaited
//! ([`Client::send_request`]), and detached onto the runtime
//! ([`Client::send_request_detached`]). Replies are correlated through the
//! [`PendingCalls`] registry; a timeout or session close completes the call
//! with a synthesized `ERROR` reply rather than losing it.

mod pending;
mod response;

pub use pending::PendingCalls;
pub use response::{RequestError, Response};

use crate::endpoint::{Endpoint, EndpointHooks};
use crate::error::{ProtocolError, WsRpcError};
use crate::handler::{HandlerTable, OrphanErrorHandler};
use crate::message::{ops, Envelope, MessageType, RawJson};
use crate::transport::{self, CloseCode, FrameSource, Session, TransportError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// The close reason sent when a client shuts its session down.
const CLIENT_CLOSE_REASON: &str = "client is closing session";

/// A call gave up waiting for its reply.
#[derive(Debug, Error)]
#[error("call with request id '{request_id}' timed out before receiving a response")]
struct CallTimeout {
    request_id: String,
}

/// Routes replies to the pending-call registry and purges it on close.
struct ClientHooks {
    pending: Arc<PendingCalls>,
}

#[async_trait]
impl EndpointHooks for ClientHooks {
    async fn on_response(&self, session: &Session, reply: Envelope) {
        let Some(request_id) = reply.id().map(str::to_owned) else {
            return;
        };

        let roundtrip = match (reply.received_millis(), reply.sent_millis()) {
            (Some(received), Some(sent)) => Some(received - sent),
            _ => None,
        };
        let processing = match (reply.stop_processing_millis(), reply.start_processing_millis()) {
            (Some(stop), Some(start)) => Some(stop - start),
            _ => None,
        };

        if self.pending.signal_result(session.id(), &request_id, reply).await {
            debug!(
                session = %session.id(),
                request_id = %request_id,
                roundtrip_millis = ?roundtrip,
                processing_millis = ?processing,
                "response delivered to waiting call"
            );
        } else {
            // No waiter: the call already timed out or was never ours.
            debug!(
                session = %session.id(),
                request_id = %request_id,
                "ignored response with no waiting call"
            );
        }
    }

    async fn on_close(&self, session: &Session) {
        self.pending.purge_session(session.id()).await;
    }
}

struct ClientInner {
    session: RwLock<Option<Session>>,
    pending: Arc<PendingCalls>,
    handlers: Arc<HandlerTable>,
    endpoint: Arc<Endpoint>,
}

/// A WebSocket client bound to one session.
///
/// Cloning a `Client` clones a handle to the same managed session and
/// pending-call registry. Typed client wrappers for a particular service
/// are built over this type; see [`connect_with`].
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client with no session installed.
    ///
    /// Use [`Client::connect`] for the common case; a detached client is
    /// only useful together with [`Client::set_session`].
    #[must_use]
    pub fn new() -> Self {
        let pending = Arc::new(PendingCalls::new());
        let handlers = Arc::new(HandlerTable::new());
        // Correlation-less ERROR frames land here instead of a waiter.
        handlers.set(ops::ERROR, Arc::new(OrphanErrorHandler));

        let hooks = Arc::new(ClientHooks {
            pending: pending.clone(),
        });
        let endpoint = Arc::new(Endpoint::new(handlers.clone(), hooks));

        Self {
            inner: Arc::new(ClientInner {
                session: RwLock::new(None),
                pending,
                handlers,
                endpoint,
            }),
        }
    }

    /// Connects to a service and installs the fresh session.
    ///
    /// The handshake advertises the `"json"` subprotocol.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, WsRpcError> {
        let client = Self::new();
        let (session, frames) = transport::connect(url).await?;
        client.set_session(session, frames).await?;
        Ok(client)
    }

    /// Installs or replaces the managed session, spawning its receive loop.
    ///
    /// Returns the previous session, if any; the caller decides whether to
    /// close it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionClosed`] if the session is not open.
    pub async fn set_session(
        &self,
        session: Session,
        frames: FrameSource,
    ) -> Result<Option<Session>, WsRpcError> {
        if !session.is_open() {
            return Err(TransportError::SessionClosed.into());
        }

        // Publish the registry entry before any frame can arrive.
        self.inner.pending.install_session(session.id()).await;
        tokio::spawn(self.inner.endpoint.clone().run(session.clone(), frames));

        Ok(self.inner.session.write().replace(session))
    }

    /// The handler table for operations the peer may invoke on this client.
    #[must_use]
    pub fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    /// The currently managed session, if any.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner.session.read().clone()
    }

    /// Returns `true` iff a session is installed and still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.session.read().as_ref().is_some_and(Session::is_open)
    }

    /// Closes the managed session with the default reason.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionClosed`] if no session is installed,
    /// or a transport error if the close frame cannot be sent.
    pub async fn close(&self) -> Result<(), WsRpcError> {
        self.close_with_reason(CloseCode::Normal, CLIENT_CLOSE_REASON)
            .await
    }

    /// Closes the managed session, giving the peer a reason, and purges the
    /// session's pending calls so outstanding waiters unblock.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionClosed`] if no session is installed,
    /// or a transport error if the close frame cannot be sent.
    pub async fn close_with_reason(
        &self,
        code: CloseCode,
        reason: &str,
    ) -> Result<(), WsRpcError> {
        let session = self.inner.session.read().clone();
        let Some(session) = session else {
            return Err(TransportError::SessionClosed.into());
        };

        let result = session.close(code, reason).await;
        self.inner.pending.purge_session(session.id()).await;
        Ok(result?)
    }

    fn current_session(&self) -> Result<Session, WsRpcError> {
        self.inner
            .session
            .read()
            .clone()
            .filter(Session::is_open)
            .ok_or_else(|| TransportError::SessionClosed.into())
    }

    /// Sends a fire-and-forget message; the envelope carries no id and no
    /// reply will ever arrive.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the send fails; delivery is otherwise
    /// not acknowledged.
    pub async fn send_message<Req, Res>(
        &self,
        message_type: &MessageType<Req, Res>,
        body: &Req,
    ) -> Result<(), WsRpcError> {
        let raw = message_type.request_converter().serialize(body)?;
        self.send_message_raw(message_type.name(), raw).await
    }

    /// Untyped variant of [`Client::send_message`] for callers without a
    /// [`MessageType`] at hand.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the send fails.
    pub async fn send_message_raw(
        &self,
        op: &str,
        body: Option<RawJson>,
    ) -> Result<(), WsRpcError> {
        let session = self.current_session()?;
        let envelope = Envelope::create(false, op, body)?;
        session.send(envelope).await?;
        Ok(())
    }

    /// Sends a request and awaits its reply.
    ///
    /// A `timeout` of [`Duration::ZERO`] waits forever. On timeout or
    /// session close the returned [`Response`] is an error reply; the call
    /// never hangs past its deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if no open session is installed, the body cannot be
    /// encoded, or the send fails. Timeouts are reported through the
    /// [`Response`], not as an `Err`.
    pub async fn send_request<Req, Res>(
        &self,
        message_type: &MessageType<Req, Res>,
        body: &Req,
        timeout: Duration,
    ) -> Result<Response<Res>, WsRpcError> {
        let raw = message_type.request_converter().serialize(body)?;
        let reply = self.send_request_raw(message_type.name(), raw, timeout).await?;
        Ok(Response::new(reply, message_type.response_converter().clone())?)
    }

    /// Untyped variant of [`Client::send_request`]; returns the raw reply
    /// envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if no open session is installed, tracking fails, or
    /// the send fails.
    pub async fn send_request_raw(
        &self,
        op: &str,
        body: Option<RawJson>,
        timeout: Duration,
    ) -> Result<Envelope, WsRpcError> {
        let session = self.current_session()?;
        let request = Envelope::create(true, op, body)?;
        let request_id = request
            .id()
            .ok_or(ProtocolError::NotExpectingResponse)?
            .to_owned();

        // Registration is published before the transmit so the reply thread
        // always finds the waiter.
        let rx = self.inner.pending.start_tracking(session.id(), &request).await?;

        let request = match session.send(request).await {
            Ok(request) => request,
            Err(err) => {
                self.inner.pending.stop_tracking(session.id(), &request_id).await;
                return Err(err.into());
            }
        };

        let reply = Self::await_reply(&request, rx, timeout).await;
        self.inner.pending.stop_tracking(session.id(), &request_id).await;
        Ok(reply)
    }

    /// Waits for the reply, synthesizing an `ERROR` envelope on timeout or
    /// when the session closes underneath the call.
    async fn await_reply(
        request: &Envelope,
        rx: oneshot::Receiver<Envelope>,
        timeout: Duration,
    ) -> Envelope {
        if timeout.is_zero() {
            match rx.await {
                Ok(reply) => reply,
                Err(_) => Envelope::error_response(Some(request), &TransportError::SessionClosed, 0),
            }
        } else {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(_)) => {
                    Envelope::error_response(Some(request), &TransportError::SessionClosed, 0)
                }
                Err(_) => {
                    let timeout_error = CallTimeout {
                        request_id: request.id().unwrap_or("?").to_owned(),
                    };
                    Envelope::error_response(Some(request), &timeout_error, 0)
                }
            }
        }
    }

    /// Sends a request as a detached task, returning a handle that resolves
    /// with the reply.
    ///
    /// Dropping the handle does not retract the sent request; a late reply
    /// is dropped by the registry.
    pub fn send_request_detached<Req, Res>(
        &self,
        message_type: &MessageType<Req, Res>,
        body: &Req,
        timeout: Duration,
    ) -> JoinHandle<Result<Response<Res>, WsRpcError>>
    where
        Res: Send + 'static,
    {
        let raw = match message_type.request_converter().serialize(body) {
            Ok(raw) => raw,
            Err(err) => {
                return tokio::spawn(async move { Err(err.into()) });
            }
        };

        let client = self.clone();
        let op = message_type.name().to_owned();
        let converter = message_type.response_converter().clone();
        tokio::spawn(async move {
            let reply = client.send_request_raw(&op, raw, timeout).await?;
            Ok(Response::new(reply, converter)?)
        })
    }

}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session())
            .finish()
    }
}

/// Connects a typed client wrapper to a service.
///
/// The wrapper is any type constructible from a connected [`Client`]; this
/// is the composition-based replacement for reflective client construction.
///
/// # Errors
///
/// Returns a transport error if the connection cannot be established.
///
/// # Example
///
/// ```rust,no_run
/// use wsrpc::{connect_with, Client};
///
/// struct GreeterClient {
///     inner: Client,
/// }
///
/// impl GreeterClient {
///     fn new(inner: Client) -> Self {
///         Self { inner }
///     }
/// }
///
/// # async fn example() -> Result<(), wsrpc::WsRpcError> {
/// let greeter = connect_with("ws://127.0.0.1:9100", GreeterClient::new).await?;
/// # let _ = greeter.inner.is_open();
/// # Ok(())
/// # }
/// ```
pub async fn connect_with<C>(
    url: &str,
    wrap: impl FnOnce(Client) -> C,
) -> Result<C, WsRpcError> {
    Ok(wrap(Client::connect(url).await?))
}
