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

//! Tracking of requests awaiting replies.
//!
//! The registry maps each session to its in-flight calls by request id. A
//! call is tracked from just before its request is transmitted until a reply
//! is signaled, the caller gives up, or the session closes. The oneshot
//! channel gives each waiter latch semantics: a reply that arrives before
//! the caller awaits is retained, not lost.

use crate::error::ProtocolError;
use crate::message::Envelope;
use crate::transport::{SessionId, TransportError};
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

#[derive(Debug)]
struct PendingCall {
    request: Envelope,
    tx: oneshot::Sender<Envelope>,
}

/// The per-session registry of calls awaiting replies.
///
/// Thread-safe; shared between the caller side and the engine's reply path.
#[derive(Debug, Default)]
pub struct PendingCalls {
    sessions: Mutex<HashMap<SessionId, HashMap<String, PendingCall>>>,
}

impl PendingCalls {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session so calls can be tracked against it.
    pub async fn install_session(&self, session: SessionId) {
        self.sessions.lock().await.entry(session).or_default();
    }

    /// Returns `true` if the session has a registry entry.
    pub async fn is_tracking_session(&self, session: SessionId) -> bool {
        self.sessions.lock().await.contains_key(&session)
    }

    /// Starts tracking a request, returning the receiver its reply will be
    /// delivered on.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotExpectingResponse`] if the request has no
    /// correlation id, [`ProtocolError::UntrackedSession`] if the session was
    /// never installed, or [`ProtocolError::DuplicateRequestId`] if the id is
    /// already being tracked.
    pub async fn start_tracking(
        &self,
        session: SessionId,
        request: &Envelope,
    ) -> Result<oneshot::Receiver<Envelope>, ProtocolError> {
        if !request.expects_response() {
            return Err(ProtocolError::NotExpectingResponse);
        }
        let id = request
            .id()
            .ok_or(ProtocolError::NotExpectingResponse)?
            .to_owned();

        let mut sessions = self.sessions.lock().await;
        let calls = sessions
            .get_mut(&session)
            .ok_or(ProtocolError::UntrackedSession { session })?;
        if calls.contains_key(&id) {
            return Err(ProtocolError::DuplicateRequestId { id });
        }

        let (tx, rx) = oneshot::channel();
        calls.insert(
            id,
            PendingCall {
                request: request.clone(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Delivers a reply to the waiter for `request_id`, removing the call.
    ///
    /// Returns `true` if a waiter was found and completed; `false` if the id
    /// was unknown (already completed, timed out, or never tracked) or the
    /// waiter had been dropped.
    pub async fn signal_result(
        &self,
        session: SessionId,
        request_id: &str,
        reply: Envelope,
    ) -> bool {
        let call = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .get_mut(&session)
                .and_then(|calls| calls.remove(request_id))
        };

        match call {
            Some(call) => call.tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Removes a call unconditionally, returning its request envelope.
    ///
    /// Invoked once per call on completion or timeout; removing a call that
    /// is already gone is a no-op.
    pub async fn stop_tracking(&self, session: SessionId, request_id: &str) -> Option<Envelope> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .get_mut(&session)
            .and_then(|calls| calls.remove(request_id))
            .map(|call| call.request)
    }

    /// Number of calls outstanding on a session.
    pub async fn outstanding(&self, session: SessionId) -> usize {
        self.sessions
            .lock()
            .await
            .get(&session)
            .map_or(0, HashMap::len)
    }

    /// Drops a session, completing every outstanding waiter with a
    /// "session closed" `ERROR` envelope so callers unblock.
    pub async fn purge_session(&self, session: SessionId) {
        let calls = self.sessions.lock().await.remove(&session);
        let Some(calls) = calls else {
            return;
        };

        for (request_id, call) in calls {
            let reply = Envelope::error_response(Some(&call.request), &TransportError::SessionClosed, 0);
            if call.tx.send(reply).is_err() {
                debug!(
                    session = %session,
                    request_id = %request_id,
                    "dropped session-closed notice for an abandoned call"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ErrorDetails;

    fn request() -> Envelope {
        Envelope::create(true, "ECHO", None).unwrap()
    }

    fn test_session_id() -> SessionId {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(1_000_000);
        SessionId::from_raw(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    async fn tracked_registry() -> (PendingCalls, SessionId) {
        let registry = PendingCalls::new();
        let session = test_session_id();
        registry.install_session(session).await;
        (registry, session)
    }

    #[tokio::test]
    async fn test_track_and_signal() {
        let (registry, session) = tracked_registry().await;
        let request = request();
        let id = request.id().unwrap().to_owned();

        let rx = registry.start_tracking(session, &request).await.unwrap();
        assert_eq!(registry.outstanding(session).await, 1);

        let reply = Envelope::success_response(&request, None).unwrap();
        assert!(registry.signal_result(session, &id, reply).await);
        assert_eq!(registry.outstanding(session).await, 0);

        let delivered = rx.await.unwrap();
        assert_eq!(delivered.id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_signal_before_await_is_retained() {
        let (registry, session) = tracked_registry().await;
        let request = request();
        let id = request.id().unwrap().to_owned();

        let rx = registry.start_tracking(session, &request).await.unwrap();
        let reply = Envelope::success_response(&request, None).unwrap();
        assert!(registry.signal_result(session, &id, reply).await);

        // The waiter awaits only after the reply landed.
        let delivered = rx.await.unwrap();
        assert!(delivered.is_reply());
    }

    #[tokio::test]
    async fn test_duplicate_id_fails_second_caller() {
        let (registry, session) = tracked_registry().await;
        let request = request();

        let _rx = registry.start_tracking(session, &request).await.unwrap();
        let second = registry.start_tracking(session, &request).await;
        assert!(matches!(
            second,
            Err(ProtocolError::DuplicateRequestId { .. })
        ));
    }

    #[tokio::test]
    async fn test_tracking_requires_response_expectation() {
        let (registry, session) = tracked_registry().await;
        let oneway = Envelope::create(false, "ECHO", None).unwrap();
        assert!(matches!(
            registry.start_tracking(session, &oneway).await,
            Err(ProtocolError::NotExpectingResponse)
        ));
    }

    #[tokio::test]
    async fn test_tracking_requires_installed_session() {
        let registry = PendingCalls::new();
        let session = test_session_id();
        assert!(matches!(
            registry.start_tracking(session, &request()).await,
            Err(ProtocolError::UntrackedSession { .. })
        ));
    }

    #[tokio::test]
    async fn test_signal_unknown_id_is_ignored() {
        let (registry, session) = tracked_registry().await;
        let reply = Envelope::error_response(None, &TransportError::SessionClosed, 0);
        assert!(!registry.signal_result(session, "nope", reply).await);
    }

    #[tokio::test]
    async fn test_stop_tracking_is_idempotent() {
        let (registry, session) = tracked_registry().await;
        let request = request();
        let id = request.id().unwrap().to_owned();

        let _rx = registry.start_tracking(session, &request).await.unwrap();
        assert!(registry.stop_tracking(session, &id).await.is_some());
        assert!(registry.stop_tracking(session, &id).await.is_none());
    }

    #[tokio::test]
    async fn test_purge_completes_waiters_with_session_closed() {
        let (registry, session) = tracked_registry().await;

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let request = request();
            receivers.push(registry.start_tracking(session, &request).await.unwrap());
        }

        registry.purge_session(session).await;
        assert!(!registry.is_tracking_session(session).await);

        for rx in receivers {
            let reply = rx.await.unwrap();
            assert!(reply.is_error());
            let details: ErrorDetails = reply.body().unwrap().parse().unwrap();
            assert!(details.error().contains("session closed"));
        }
    }
}
