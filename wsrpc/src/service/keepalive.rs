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

//! The keep-alive scheduler.
//!
//! One task pings every session tracked in a [`SessionRegistry`] on a fixed
//! interval. The ping payload is the current epoch millis as decimal ASCII;
//! the engine matches returning PONGs to estimate round trips, and a missing
//! PONG is never fatal. A ping failure on one session is logged and does not
//! affect the others.

use crate::service::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Default interval between keep-alive pings.
pub const PING_FREQUENCY: Duration = Duration::from_secs(30);

/// A running keep-alive task over a session registry.
#[derive(Debug)]
pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    /// Starts pinging every tracked session at [`PING_FREQUENCY`].
    #[must_use]
    pub fn start(registry: Arc<SessionRegistry>) -> Self {
        Self::start_with_interval(registry, PING_FREQUENCY)
    }

    /// Starts pinging every tracked session at the given interval.
    #[must_use]
    pub fn start_with_interval(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so the cadence starts
            // one interval after startup.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let sessions = registry.all_sessions();
                trace!(sessions = sessions.len(), "keep-alive sweep");
                for session in sessions {
                    if let Err(err) = session.ping().await {
                        warn!(
                            session = %session.id(),
                            error = %err,
                            "keep-alive ping failed"
                        );
                    }
                }
            }
        });

        Self { handle }
    }

    /// Returns `true` while the scheduler task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the scheduler.
    pub fn stop(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_stop() {
        let registry = Arc::new(SessionRegistry::new());
        let keepalive = KeepAlive::start_with_interval(registry, Duration::from_millis(10));
        assert!(keepalive.is_running());
        keepalive.stop();
    }
}
