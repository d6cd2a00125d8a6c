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

//! Session tracking keyed by service identifier.

use crate::transport::{Session, SessionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// Identifies a service within a process.
///
/// Services are tracked by explicit identifier rather than by concrete type,
/// so hosts can construct and register them without reflection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(String);

impl ServiceId {
    /// Creates a service identifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// The sessions currently connected to each service.
///
/// A registry may be shared by several services; the keep-alive scheduler
/// iterates every tracked session regardless of owner. When a service's last
/// session is removed its key is dropped, so long-lived registries do not
/// accumulate entries for services that have come and gone.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ServiceId, HashMap<SessionId, Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a session under a service.
    pub fn add(&self, service: &ServiceId, session: Session) {
        self.sessions
            .write()
            .entry(service.clone())
            .or_default()
            .insert(session.id(), session);
    }

    /// Stops tracking a session, dropping the service key if it is now
    /// empty.
    pub fn remove(&self, service: &ServiceId, session: SessionId) -> Option<Session> {
        let mut sessions = self.sessions.write();
        let removed = sessions.get_mut(service)?.remove(&session);
        if sessions.get(service).is_some_and(HashMap::is_empty) {
            sessions.remove(service);
        }
        removed
    }

    /// The sessions tracked for one service.
    #[must_use]
    pub fn sessions_for(&self, service: &ServiceId) -> Vec<Session> {
        self.sessions
            .read()
            .get(service)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every tracked session across all services.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .flat_map(|sessions| sessions.values().cloned())
            .collect()
    }

    /// Returns `true` if the service currently has tracked sessions.
    #[must_use]
    pub fn contains(&self, service: &ServiceId) -> bool {
        self.sessions.read().contains_key(service)
    }

    /// Number of sessions tracked for a service.
    #[must_use]
    pub fn session_count(&self, service: &ServiceId) -> usize {
        self.sessions
            .read()
            .get(service)
            .map_or(0, HashMap::len)
    }

    /// Number of services with at least one tracked session.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("services", &self.service_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{connect, WebSocketListener};

    /// Opens a real connected session pair for registry tests.
    async fn session_pair() -> (Session, Session) {
        let listener = WebSocketListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await });
        let (client, _frames) = connect(&format!("ws://{addr}")).await.unwrap();
        let (server, _frames) = accept.await.unwrap().unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let registry = SessionRegistry::new();
        let service = ServiceId::from("echo");
        let (session, _peer) = session_pair().await;
        let id = session.id();

        registry.add(&service, session);
        assert_eq!(registry.session_count(&service), 1);
        assert!(registry.contains(&service));

        assert!(registry.remove(&service, id).is_some());
        assert!(registry.remove(&service, id).is_none());
    }

    #[tokio::test]
    async fn test_empty_service_key_is_dropped() {
        let registry = SessionRegistry::new();
        let service = ServiceId::from("echo");
        let (a, _peer_a) = session_pair().await;
        let (b, _peer_b) = session_pair().await;
        let (a_id, b_id) = (a.id(), b.id());

        registry.add(&service, a);
        registry.add(&service, b);
        assert_eq!(registry.session_count(&service), 2);

        registry.remove(&service, a_id);
        assert!(registry.contains(&service));

        registry.remove(&service, b_id);
        assert!(!registry.contains(&service));
        assert_eq!(registry.service_count(), 0);
    }

    #[tokio::test]
    async fn test_all_sessions_spans_services() {
        let registry = SessionRegistry::new();
        let (a, _peer_a) = session_pair().await;
        let (b, _peer_b) = session_pair().await;

        registry.add(&ServiceId::from("alpha"), a);
        registry.add(&ServiceId::from("beta"), b);

        assert_eq!(registry.all_sessions().len(), 2);
        assert_eq!(registry.sessions_for(&ServiceId::from("alpha")).len(), 1);
        assert_eq!(registry.service_count(), 2);
    }
}
