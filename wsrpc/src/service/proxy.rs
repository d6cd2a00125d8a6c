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

//! Lazy, retrying handles to clients of other services.
//!
//! A [`ServiceProxy`] owns a client factory and a cached client. The cache
//! is filled on first use; a closed client is discarded and rebuilt on the
//! next access, with exponential backoff between factory attempts. Proxies
//! are registered by name in a [`ServiceProxyManager`], which services
//! consult from their handlers.

use crate::client::Client;
use crate::error::WsRpcError;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Initial backoff delay between connection attempts, in milliseconds.
pub const RETRY_MS_INIT: u64 = 50;

/// Multiplier applied to the backoff delay after each failed attempt.
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 1.5;

/// Default number of connection attempts before a proxy gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Errors raised by service proxies and their manager.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Every connection attempt failed.
    #[error(
        "failed to connect after {attempts} attempts for the service proxy '{name}' \
         using the client type '{client_type}'"
    )]
    Exhausted {
        /// The proxy that gave up.
        name: String,
        /// The client type the proxy produces.
        client_type: &'static str,
        /// How many attempts were made.
        attempts: u32,
        /// The last connection failure, when at least one attempt ran.
        #[source]
        source: Option<Box<WsRpcError>>,
    },

    /// No proxy is registered under the requested name.
    #[error("no service proxy named '{name}' is registered")]
    NotFound {
        /// The requested proxy name.
        name: String,
    },

    /// The registered proxy produces a different client type than requested.
    #[error(
        "expected the client in the proxy named '{name}' to be of type '{expected}', \
         but it is of type '{actual}'"
    )]
    ClientTypeMismatch {
        /// The requested proxy name.
        name: String,
        /// The client type the caller asked for.
        expected: &'static str,
        /// The client type the proxy actually produces.
        actual: &'static str,
    },
}

/// Anything a proxy can hand out as a client.
///
/// Implemented by [`Client`] and by typed wrappers around it; the proxy only
/// needs to know whether a cached instance is still usable.
pub trait ServiceClient: Send + Sync + 'static {
    /// Returns `true` while the client's session is open.
    fn is_open(&self) -> bool;
}

impl ServiceClient for Client {
    fn is_open(&self) -> bool {
        Client::is_open(self)
    }
}

type ClientFactory<C> = Box<dyn Fn() -> BoxFuture<'static, Result<C, WsRpcError>> + Send + Sync>;

/// A named, lazy handle to a client of another service.
///
/// `client()` returns the cached client while it is open; otherwise the
/// factory is retried with exponential backoff. Concurrent callers serialize
/// on the cache, so a connection race cannot leak half-built clients: the
/// loser simply observes the winner's cache.
pub struct ServiceProxy<C> {
    name: String,
    factory: ClientFactory<C>,
    cached: Mutex<Option<C>>,
}

impl<C> ServiceProxy<C>
where
    C: ServiceClient + Clone,
{
    /// Creates a proxy over an async client factory.
    #[must_use]
    pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C, WsRpcError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(move || -> BoxFuture<'static, Result<C, WsRpcError>> {
                Box::pin(factory())
            }),
            cached: Mutex::new(None),
        }
    }

    /// The proxy's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type name of the clients this proxy produces.
    #[must_use]
    pub fn client_type(&self) -> &'static str {
        std::any::type_name::<C>()
    }

    /// Returns an open client, connecting with the default retry limit.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Exhausted`] after [`DEFAULT_MAX_RETRIES`] failed
    /// attempts.
    pub async fn client(&self) -> Result<C, ProxyError> {
        self.client_with_retries(DEFAULT_MAX_RETRIES).await
    }

    /// Returns an open client, connecting with up to `max_retries` attempts.
    ///
    /// The cached client is reused while open; a closed one is discarded
    /// before reconnecting. Backoff starts at [`RETRY_MS_INIT`] milliseconds
    /// and grows by [`RETRY_BACKOFF_MULTIPLIER`] after each failure.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Exhausted`] when every attempt fails, naming the
    /// proxy and the client type.
    pub async fn client_with_retries(&self, max_retries: u32) -> Result<C, ProxyError> {
        let mut cached = self.cached.lock().await;
        if let Some(client) = cached.as_ref() {
            if client.is_open() {
                return Ok(client.clone());
            }
            *cached = None;
        }

        let mut backoff = Duration::from_millis(RETRY_MS_INIT);
        let mut attempt: u32 = 0;
        let mut last_error = None;

        while attempt < max_retries {
            match (self.factory)().await {
                Ok(client) => {
                    debug!(proxy = %self.name, attempt = attempt + 1, "service proxy connected");
                    *cached = Some(client.clone());
                    return Ok(client);
                }
                Err(err) => {
                    attempt += 1;
                    warn!(
                        proxy = %self.name,
                        attempt,
                        error = %err,
                        backoff_millis = backoff.as_millis() as u64,
                        "service proxy connection failed; backing off"
                    );
                    last_error = Some(err);
                    if attempt < max_retries {
                        tokio::time::sleep(backoff).await;
                        backoff = Duration::from_millis(
                            (backoff.as_millis() as f64 * RETRY_BACKOFF_MULTIPLIER) as u64,
                        );
                    }
                }
            }
        }

        Err(ProxyError::Exhausted {
            name: self.name.clone(),
            client_type: self.client_type(),
            attempts: max_retries,
            source: last_error.map(Box::new),
        })
    }

    /// Drops the cached client, forcing the next access to reconnect.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

impl<C> fmt::Debug for ServiceProxy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("name", &self.name)
            .finish()
    }
}

/// Type-erased operations the manager needs from any proxy.
#[async_trait]
pub trait ProxyHandle: Send + Sync {
    /// The proxy's registered name.
    fn proxy_name(&self) -> &str;

    /// The type name of the clients the proxy produces.
    fn client_type_name(&self) -> &'static str;

    /// Drops the proxy's cached client.
    async fn invalidate_cache(&self);
}

#[async_trait]
impl<C> ProxyHandle for ServiceProxy<C>
where
    C: ServiceClient + Clone,
{
    fn proxy_name(&self) -> &str {
        self.name()
    }

    fn client_type_name(&self) -> &'static str {
        self.client_type()
    }

    async fn invalidate_cache(&self) {
        self.invalidate().await;
    }
}

struct ProxyEntry {
    any: Arc<dyn Any + Send + Sync>,
    handle: Arc<dyn ProxyHandle>,
}

/// Holds a service's proxies by name.
#[derive(Default)]
pub struct ServiceProxyManager {
    proxies: RwLock<HashMap<String, ProxyEntry>>,
}

impl ServiceProxyManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered proxy names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.proxies.read().keys().cloned().collect()
    }

    /// The client type registered under a name, if any.
    #[must_use]
    pub fn client_type_of(&self, name: &str) -> Option<&'static str> {
        self.proxies
            .read()
            .get(name)
            .map(|entry| entry.handle.client_type_name())
    }

    /// Adds or replaces a proxy under its own name.
    pub fn set<C>(&self, proxy: Arc<ServiceProxy<C>>)
    where
        C: ServiceClient + Clone,
    {
        let name = proxy.name().to_owned();
        let entry = ProxyEntry {
            any: proxy.clone(),
            handle: proxy,
        };
        self.proxies.write().insert(name, entry);
    }

    /// Gets a proxy by name, checked against the expected client type.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NotFound`] for unknown names and
    /// [`ProxyError::ClientTypeMismatch`] when the registered proxy produces
    /// a different client type, naming both types.
    pub fn get<C>(&self, name: &str) -> Result<Arc<ServiceProxy<C>>, ProxyError>
    where
        C: ServiceClient + Clone,
    {
        let proxies = self.proxies.read();
        let entry = proxies.get(name).ok_or_else(|| ProxyError::NotFound {
            name: name.to_owned(),
        })?;

        entry
            .any
            .clone()
            .downcast::<ServiceProxy<C>>()
            .map_err(|_| ProxyError::ClientTypeMismatch {
                name: name.to_owned(),
                expected: std::any::type_name::<C>(),
                actual: entry.handle.client_type_name(),
            })
    }

    /// Removes a proxy, requiring identity match so a newer replacement
    /// registered under the same name is left alone.
    pub fn remove<C>(&self, proxy: &Arc<ServiceProxy<C>>) -> bool
    where
        C: ServiceClient + Clone,
    {
        let mut proxies = self.proxies.write();
        let matches = proxies.get(proxy.name()).is_some_and(|entry| {
            std::ptr::eq(
                Arc::as_ptr(&entry.any).cast::<()>(),
                Arc::as_ptr(proxy).cast::<()>(),
            )
        });
        if matches {
            proxies.remove(proxy.name());
        }
        matches
    }

    /// Drops the cached client of the named proxy. Returns `true` if the
    /// proxy exists.
    pub async fn invalidate(&self, name: &str) -> bool {
        let handle = self
            .proxies
            .read()
            .get(name)
            .map(|entry| entry.handle.clone());

        match handle {
            Some(handle) => {
                handle.invalidate_cache().await;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ServiceProxyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxyManager")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Clone, Debug)]
    struct FakeClient {
        open: Arc<AtomicBool>,
    }

    impl FakeClient {
        fn open() -> Self {
            Self {
                open: Arc::new(AtomicBool::new(true)),
            }
        }
    }

    impl ServiceClient for FakeClient {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone)]
    struct OtherClient;

    impl ServiceClient for OtherClient {
        fn is_open(&self) -> bool {
            true
        }
    }

    fn refused() -> WsRpcError {
        WsRpcError::Transport(TransportError::ConnectionLost {
            reason: "connection refused".to_owned(),
        })
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let proxy = ServiceProxy::new("backend", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(FakeClient::open())
            }
        });

        proxy.client().await.unwrap();
        proxy.client().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_cache_is_discarded() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let proxy = ServiceProxy::new("backend", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(FakeClient::open())
            }
        });

        let first = proxy.client().await.unwrap();
        first.open.store(false, Ordering::SeqCst);

        let second = proxy.client().await.unwrap();
        assert!(second.is_open());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let proxy = ServiceProxy::new("backend", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(refused())
                } else {
                    Ok(FakeClient::open())
                }
            }
        });

        proxy.client().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_names_proxy_and_type() {
        let proxy: ServiceProxy<FakeClient> =
            ServiceProxy::new("unreachable", || async { Err(refused()) });

        let err = proxy.client_with_retries(3).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unreachable"));
        assert!(message.contains("3 attempts"));
        assert!(message.contains("FakeClient"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_reconnect() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let proxy = ServiceProxy::new("backend", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(FakeClient::open())
            }
        });

        proxy.client().await.unwrap();
        proxy.invalidate().await;
        proxy.client().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_manager_get_checks_client_type() {
        let manager = ServiceProxyManager::new();
        let proxy: Arc<ServiceProxy<FakeClient>> =
            Arc::new(ServiceProxy::new("backend", || async {
                Ok(FakeClient::open())
            }));
        manager.set(proxy);

        assert!(manager.get::<FakeClient>("backend").is_ok());
        assert!(matches!(
            manager.get::<OtherClient>("backend"),
            Err(ProxyError::ClientTypeMismatch { .. })
        ));
        assert!(matches!(
            manager.get::<FakeClient>("missing"),
            Err(ProxyError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_manager_remove_requires_identity() {
        let manager = ServiceProxyManager::new();
        let first: Arc<ServiceProxy<FakeClient>> =
            Arc::new(ServiceProxy::new("backend", || async {
                Ok(FakeClient::open())
            }));
        let second: Arc<ServiceProxy<FakeClient>> =
            Arc::new(ServiceProxy::new("backend", || async {
                Ok(FakeClient::open())
            }));

        manager.set(first.clone());
        manager.set(second.clone());

        // The older proxy must not remove its replacement.
        assert!(!manager.remove(&first));
        assert!(manager.remove(&second));
        assert!(manager.names().is_empty());
    }

    #[tokio::test]
    async fn test_manager_invalidate_by_name() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let manager = ServiceProxyManager::new();
        let proxy = Arc::new(ServiceProxy::new("backend", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(FakeClient::open())
            }
        }));
        manager.set(proxy.clone());

        proxy.client().await.unwrap();
        assert!(manager.invalidate("backend").await);
        proxy.client().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        assert!(!manager.invalidate("missing").await);
    }
}
