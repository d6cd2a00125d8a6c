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

//! The service endpoint: exposes a handler table over accepted sessions.
//!
//! A [`Service`] is assembled through [`ServiceBuilder`], which wires the
//! handler table, the session registry, the proxy manager, and the built-in
//! operations into one endpoint engine. Every service answers `STATUS`,
//! `CLOSE_ALL_SESSIONS`, and `DEPENDENCY_UPDATED` out of the box.

mod keepalive;
mod proxy;
mod registry;
mod status;

pub use keepalive::{KeepAlive, PING_FREQUENCY};
pub use proxy::{
    ProxyError, ProxyHandle, ServiceClient, ServiceProxy, ServiceProxyManager,
    DEFAULT_MAX_RETRIES, RETRY_BACKOFF_MULTIPLIER, RETRY_MS_INIT,
};
pub use registry::{ServiceId, SessionRegistry};
pub use status::{HostStatus, ServiceStatus};

use crate::endpoint::{Endpoint, EndpointHooks};
use crate::error::{BoxError, WsRpcError};
use crate::handler::{HandlerTable, MessageHandler, OrphanErrorHandler};
use crate::message::{builtins, ops, Envelope, ErrorDetails, MessageType, RawJson};
use crate::transport::{CloseCode, FrameSource, Session, SessionId, TransportError, WebSocketListener};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The close reason used when a service shuts its sessions down.
const GOING_AWAY_REASON: &str = "service is going away";

/// Provides the `extra_info` slot of a `STATUS` reply.
///
/// The function receives the decoded status request body. Failures are
/// folded into the status payload as a serialized error record; they never
/// turn the status reply into an `ERROR`.
pub type StatusExtension =
    Arc<dyn Fn(serde_json::Value) -> Result<Option<RawJson>, BoxError> + Send + Sync>;

/// Tracks sessions in the registry and untracks them on close.
struct ServiceHooks {
    id: ServiceId,
    registry: Arc<SessionRegistry>,
}

#[async_trait]
impl EndpointHooks for ServiceHooks {
    // Replies are ignored on services: a service that needs to call another
    // service does so through its own client (see the service proxies).

    async fn on_close(&self, session: &Session) {
        if self.registry.remove(&self.id, session.id()).is_some() {
            info!(service = %self.id, session = %session.id(), "session closed");
        }
    }
}

async fn close_sessions(
    registry: &SessionRegistry,
    service: &ServiceId,
    code: CloseCode,
    reason: &str,
) {
    for session in registry.sessions_for(service) {
        if let Err(err) = session.close(code, reason).await {
            warn!(
                service = %service,
                session = %session.id(),
                error = %err,
                "failed to close session"
            );
        }
    }
}

/// Assembles a [`Service`].
pub struct ServiceBuilder {
    id: ServiceId,
    handlers: Arc<HandlerTable>,
    registry: Option<Arc<SessionRegistry>>,
    proxies: Arc<ServiceProxyManager>,
    status_extension: Option<StatusExtension>,
    error_stack_depth: usize,
}

impl ServiceBuilder {
    fn new(id: ServiceId) -> Self {
        Self {
            id,
            handlers: Arc::new(HandlerTable::new()),
            registry: None,
            proxies: Arc::new(ServiceProxyManager::new()),
            status_extension: None,
            error_stack_depth: 0,
        }
    }

    /// Registers a typed request/response handler.
    #[must_use]
    pub fn handler<Req, Res, F, Fut>(self, message_type: &MessageType<Req, Res>, handler: F) -> Self
    where
        Req: Send + 'static,
        Res: Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, BoxError>> + Send + 'static,
    {
        self.handlers.bind(message_type, handler);
        self
    }

    /// Registers a typed supplier handler for an operation without a request
    /// body.
    #[must_use]
    pub fn handler_supplier<Res, F, Fut>(self, message_type: &MessageType<(), Res>, handler: F) -> Self
    where
        Res: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, BoxError>> + Send + 'static,
    {
        self.handlers.bind_supplier(message_type, handler);
        self
    }

    /// Registers a typed consumer handler for an operation without a
    /// response body.
    #[must_use]
    pub fn handler_consumer<Req, F, Fut>(self, message_type: &MessageType<Req, ()>, handler: F) -> Self
    where
        Req: Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.handlers.bind_consumer(message_type, handler);
        self
    }

    /// Registers a raw handler over undecoded bodies.
    #[must_use]
    pub fn raw_handler(self, op: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.set(op, handler);
        self
    }

    /// Sets the function providing the `extra_info` slot of `STATUS`
    /// replies.
    #[must_use]
    pub fn status_extension<F>(mut self, extension: F) -> Self
    where
        F: Fn(serde_json::Value) -> Result<Option<RawJson>, BoxError> + Send + Sync + 'static,
    {
        self.status_extension = Some(Arc::new(extension));
        self
    }

    /// Uses a shared session registry instead of a private one.
    ///
    /// Sharing lets one keep-alive scheduler sweep the sessions of several
    /// services.
    #[must_use]
    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Registers a proxy to a dependency service.
    #[must_use]
    pub fn proxy<C>(self, proxy: Arc<ServiceProxy<C>>) -> Self
    where
        C: ServiceClient + Clone,
    {
        self.proxies.set(proxy);
        self
    }

    /// Uses a shared proxy manager instead of a private one.
    #[must_use]
    pub fn proxies(mut self, proxies: Arc<ServiceProxyManager>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Sets how many stack frames `ERROR` replies carry.
    #[must_use]
    pub fn error_stack_depth(mut self, depth: usize) -> Self {
        self.error_stack_depth = depth;
        self
    }

    /// Registers the built-in handlers and produces the service.
    #[must_use]
    pub fn build(self) -> Service {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SessionRegistry::new()));

        // STATUS: the extension runs inside a guard so a failing extension
        // yields a status whose extra_info is the serialized error, never an
        // ERROR reply.
        let extension = self.status_extension;
        self.handlers
            .bind(&builtins::status(), move |request: serde_json::Value| {
                let extension = extension.clone();
                async move {
                    let extra_info = match extension.map(|f| f(request)) {
                        None => None,
                        Some(Ok(extra_info)) => extra_info,
                        Some(Err(err)) => {
                            warn!(error = %err, "status extension failed");
                            let details = ErrorDetails::from_error(
                                &*err,
                                crate::message::DEFAULT_MAX_STACK_DEPTH,
                            );
                            Some(RawJson::from_value(&details)?)
                        }
                    };
                    Ok(ServiceStatus::new(extra_info))
                }
            });

        // CLOSE_ALL_SESSIONS: the requesting session goes down with the rest.
        let close_registry = registry.clone();
        let close_id = self.id.clone();
        self.handlers
            .bind_supplier(&builtins::close_all_sessions(), move || {
                let registry = close_registry.clone();
                let id = close_id.clone();
                async move {
                    info!(service = %id, "closing all sessions on request");
                    close_sessions(&registry, &id, CloseCode::Away, GOING_AWAY_REASON).await;
                    Ok(())
                }
            });

        // DEPENDENCY_UPDATED: drop the cached client so the next proxy access
        // reconnects to the dependency's new location.
        let dep_proxies = self.proxies.clone();
        self.handlers
            .bind_consumer(&builtins::dependency_updated(), move |name: String| {
                let proxies = dep_proxies.clone();
                async move {
                    if proxies.invalidate(&name).await {
                        info!(proxy = %name, "dropped cached client for updated dependency");
                    } else {
                        debug!(proxy = %name, "dependency update for unknown proxy");
                    }
                    Ok(())
                }
            });

        self.handlers.set(ops::ERROR, Arc::new(OrphanErrorHandler));

        let hooks = Arc::new(ServiceHooks {
            id: self.id.clone(),
            registry: registry.clone(),
        });
        let endpoint = Arc::new(
            Endpoint::new(self.handlers.clone(), hooks)
                .with_error_stack_depth(self.error_stack_depth),
        );

        Service {
            inner: Arc::new(ServiceInner {
                id: self.id,
                handlers: self.handlers,
                registry,
                proxies: self.proxies,
                endpoint,
            }),
        }
    }
}

struct ServiceInner {
    id: ServiceId,
    handlers: Arc<HandlerTable>,
    registry: Arc<SessionRegistry>,
    proxies: Arc<ServiceProxyManager>,
    endpoint: Arc<Endpoint>,
}

/// A WebSocket service: a handler table exposed over tracked sessions.
///
/// Cloning a `Service` clones a handle to the same state; handlers, registry
/// and proxies are shared.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    /// Starts building a service with the given identifier.
    #[must_use]
    pub fn builder(id: impl Into<ServiceId>) -> ServiceBuilder {
        ServiceBuilder::new(id.into())
    }

    /// The service identifier.
    #[must_use]
    pub fn id(&self) -> &ServiceId {
        &self.inner.id
    }

    /// The handler table.
    #[must_use]
    pub fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    /// The session registry tracking this service's sessions.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// The proxy manager holding this service's dependencies.
    #[must_use]
    pub fn proxies(&self) -> &ServiceProxyManager {
        &self.inner.proxies
    }

    /// The sessions currently connected to this service.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.registry.sessions_for(&self.inner.id)
    }

    /// Tracks an accepted session and spawns its receive loop.
    pub fn attach(&self, session: Session, frames: FrameSource) {
        self.inner.registry.add(&self.inner.id, session.clone());
        tokio::spawn(self.inner.endpoint.clone().run(session, frames));
    }

    /// Accepts sessions from the listener until it fails.
    ///
    /// Handshake failures of individual peers are logged and do not stop the
    /// accept loop; a listener-level I/O failure ends it.
    ///
    /// # Errors
    ///
    /// Returns the listener failure that ended the loop.
    pub async fn serve(&self, listener: WebSocketListener) -> Result<(), WsRpcError> {
        info!(
            service = %self.inner.id,
            addr = ?listener.local_addr().ok(),
            "service accepting sessions"
        );
        loop {
            match listener.accept().await {
                Ok((session, frames)) => {
                    info!(
                        service = %self.inner.id,
                        session = %session.id(),
                        peer = ?session.peer_addr(),
                        "session connected"
                    );
                    self.attach(session, frames);
                }
                Err(err @ TransportError::Io { .. }) => return Err(err.into()),
                Err(err) => {
                    warn!(service = %self.inner.id, error = %err, "failed to accept session");
                }
            }
        }
    }

    /// Spawns [`Service::serve`] onto the runtime.
    pub fn spawn(&self, listener: WebSocketListener) -> JoinHandle<Result<(), WsRpcError>> {
        let service = self.clone();
        tokio::spawn(async move { service.serve(listener).await })
    }

    /// Sends an envelope to every session of this service.
    ///
    /// Best-effort: each delivery runs as its own task and a failure does not
    /// stop the others. The returned map joins each session's delivery
    /// outcome.
    #[must_use]
    pub fn broadcast(
        &self,
        envelope: &Envelope,
    ) -> HashMap<SessionId, JoinHandle<Result<(), WsRpcError>>> {
        let mut deliveries = HashMap::new();
        for session in self.sessions() {
            let envelope = envelope.clone();
            deliveries.insert(
                session.id(),
                tokio::spawn(async move {
                    session.send(envelope).await.map(drop).map_err(WsRpcError::from)
                }),
            );
        }
        deliveries
    }

    /// Closes every session of this service with the given reason.
    pub async fn close_all_sessions(&self, code: CloseCode, reason: &str) {
        close_sessions(&self.inner.registry, &self.inner.id, code, reason).await;
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.inner.id)
            .field("sessions", &self.sessions().len())
            .finish()
    }
}
