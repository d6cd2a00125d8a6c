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

//! The endpoint engine: the per-session receive loop shared by clients and
//! services.
//!
//! The engine decodes each inbound frame into an envelope, stamps its timing
//! marks, and either routes a reply to the role-specific [`EndpointHooks`]
//! or dispatches a handler from the table. Every failure along the way
//! becomes an `ERROR` envelope sent in place of the reply; no error ever
//! escapes the receive loop.

use crate::error::{BoxError, ProtocolError};
use crate::handler::HandlerTable;
use crate::message::{epoch_millis, Envelope};
use crate::transport::{FrameSource, Session};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Role-specific behavior plugged into the engine.
///
/// Clients route replies into their pending-call registry and purge it on
/// close; services ignore replies and untrack the session on close.
#[async_trait]
pub trait EndpointHooks: Send + Sync {
    /// Called for every inbound reply envelope (`RESPONSE` or `ERROR` with a
    /// correlation id). The default ignores it.
    async fn on_response(&self, session: &Session, reply: Envelope) {
        let _ = (session, reply);
    }

    /// Called exactly once after the receive loop for a session ends.
    async fn on_close(&self, session: &Session) {
        let _ = session;
    }
}

/// The session-level receive engine.
pub struct Endpoint {
    handlers: Arc<HandlerTable>,
    hooks: Arc<dyn EndpointHooks>,
    error_stack_depth: usize,
}

impl Endpoint {
    /// Creates an engine over a handler table and role hooks.
    #[must_use]
    pub fn new(handlers: Arc<HandlerTable>, hooks: Arc<dyn EndpointHooks>) -> Self {
        Self {
            handlers,
            hooks,
            error_stack_depth: 0,
        }
    }

    /// Sets how many stack frames `ERROR` replies carry. The default of `0`
    /// sends none.
    #[must_use]
    pub fn with_error_stack_depth(mut self, depth: usize) -> Self {
        self.error_stack_depth = depth;
        self
    }

    /// The handler table this engine dispatches from.
    #[must_use]
    pub fn handlers(&self) -> &Arc<HandlerTable> {
        &self.handlers
    }

    /// Runs the receive loop for one session until it closes.
    ///
    /// Inbound frames are processed in arrival order. The close hook fires
    /// exactly once when the loop ends, whether the peer closed, the local
    /// side closed, or the transport failed.
    pub async fn run(self: Arc<Self>, session: Session, mut frames: FrameSource) {
        while let Some(item) = frames.next().await {
            match item {
                Ok(Message::Text(text)) => self.process_text(&session, text).await,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => self.process_text(&session, text).await,
                    Err(source) => {
                        let err: BoxError = Box::new(ProtocolError::from(source));
                        warn!(session = %session.id(), error = %err, "dropping undecodable binary frame");
                        self.send_error_reply(&session, None, epoch_millis(), &err).await;
                    }
                },
                Ok(Message::Ping(payload)) => {
                    if let Err(err) = session.pong(payload).await {
                        warn!(session = %session.id(), error = %err, "failed to answer ping");
                    }
                }
                Ok(Message::Pong(payload)) => {
                    session.record_pong();
                    if let Some(sent) = String::from_utf8(payload)
                        .ok()
                        .and_then(|text| text.parse::<i64>().ok())
                    {
                        trace!(
                            session = %session.id(),
                            roundtrip_millis = epoch_millis() - sent,
                            "pong received"
                        );
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(session = %session.id(), close_frame = ?frame, "peer closed session");
                    break;
                }
                Ok(Message::Frame(_)) => continue,
                Err(err) => {
                    if self.handle_transport_error(&session, &err).await {
                        break;
                    }
                }
            }
        }

        session.mark_closed();
        self.hooks.on_close(&session).await;
        debug!(session = %session.id(), "session terminated");
    }

    /// Handles one complete text payload. Any error raised while decoding or
    /// dispatching is converted into an `ERROR` reply.
    async fn process_text(&self, session: &Session, text: String) {
        let start_processing = epoch_millis();
        let mut request = None;

        if let Err(err) = self
            .dispatch(session, &text, start_processing, &mut request)
            .await
        {
            warn!(
                session = %session.id(),
                op = request.as_ref().and_then(Envelope::op).unwrap_or("?"),
                error = %err,
                "message handling failed"
            );
            self.send_error_reply(session, request.as_ref(), start_processing, &err)
                .await;
        }
    }

    async fn dispatch(
        &self,
        session: &Session,
        text: &str,
        start_processing: i64,
        request: &mut Option<Envelope>,
    ) -> Result<(), BoxError> {
        let mut envelope: Envelope = serde_json::from_str(text)
            .map_err(|source| ProtocolError::MalformedEnvelope { source })?;
        envelope.set_received_millis(Some(epoch_millis()));
        let op = envelope.op().ok_or(ProtocolError::MissingOp)?.to_owned();

        if envelope.is_reply() {
            self.hooks.on_response(session, envelope).await;
            return Ok(());
        }

        *request = Some(envelope.clone());

        let handler = self
            .handlers
            .get(&op)
            .ok_or_else(|| ProtocolError::UnknownMessageType { op: op.clone() })?;
        let response_body = handler.handle(envelope.body().cloned()).await?;

        if envelope.expects_response() {
            let mut reply = Envelope::success_response(&envelope, response_body)?;
            reply.set_start_processing_millis(Some(start_processing));
            reply.set_stop_processing_millis(Some(epoch_millis()));
            if session.is_open() {
                session.send(reply).await?;
            }
        }

        Ok(())
    }

    /// Sends an `ERROR` envelope in place of a reply. A failure here is
    /// logged and swallowed; the receive loop must keep running.
    async fn send_error_reply(
        &self,
        session: &Session,
        request: Option<&Envelope>,
        start_processing: i64,
        err: &BoxError,
    ) {
        let mut reply = Envelope::error_response(request, &**err, self.error_stack_depth);
        reply.set_start_processing_millis(Some(start_processing));
        reply.set_stop_processing_millis(Some(epoch_millis()));

        if session.is_open() {
            if let Err(send_err) = session.send(reply).await {
                error!(
                    session = %session.id(),
                    error = %send_err,
                    "failed to deliver error reply"
                );
            }
        }
    }

    /// Classifies a transport error and notifies the peer when the session is
    /// still usable. Returns `true` when the receive loop must end.
    async fn handle_transport_error(&self, session: &Session, err: &WsError) -> bool {
        let (fatal, kind) = match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_) => {
                (true, "connection fault")
            }
            WsError::Capacity(_) | WsError::Utf8 => (false, "decode fault"),
            _ => (true, "session fault"),
        };
        warn!(session = %session.id(), error = %err, kind, "transport error");

        // The triggering request is unknown, so the peer gets an ERROR
        // without a correlation id.
        if session.is_open() {
            let reply = Envelope::error_response(None, err, self.error_stack_depth);
            if let Err(send_err) = session.send(reply).await {
                debug!(
                    session = %session.id(),
                    error = %send_err,
                    "could not notify peer of transport error"
                );
            }
        }

        fatal
    }
}
