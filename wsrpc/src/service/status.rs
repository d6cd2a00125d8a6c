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

//! The payloads returned by the built-in `STATUS` operation.

use crate::message::RawJson;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Instant;

/// Process-level facts reported with every status reply.
///
/// The framework treats this as an opaque payload; it exists so a status
/// reply is never empty even when a service provides no extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    pid: u32,
    os: String,
    arch: String,
    cpus: usize,
    uptime_millis: u64,
}

impl HostStatus {
    /// Captures the current process facts.
    #[must_use]
    pub fn current() -> Self {
        static STARTED: OnceLock<Instant> = OnceLock::new();
        let started = *STARTED.get_or_init(Instant::now);

        Self {
            pid: std::process::id(),
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            cpus: std::thread::available_parallelism().map_or(1, usize::from),
            uptime_millis: started.elapsed().as_millis() as u64,
        }
    }

    /// The process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The operating system name.
    #[must_use]
    pub fn os(&self) -> &str {
        &self.os
    }

    /// The processor architecture.
    #[must_use]
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Available parallelism of the host.
    #[must_use]
    pub fn cpus(&self) -> usize {
        self.cpus
    }

    /// Milliseconds since host facts were first captured in this process.
    #[must_use]
    pub fn uptime_millis(&self) -> u64 {
        self.uptime_millis
    }
}

/// The status of a service: host facts plus an implementation-provided
/// extension payload.
///
/// When the extension function fails, `extra_info` carries a serialized
/// error record instead; a status reply itself is never an `ERROR`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    host: HostStatus,
    #[serde(default)]
    extra_info: Option<RawJson>,
}

impl ServiceStatus {
    /// Builds a status for the current process with the given extension
    /// payload.
    #[must_use]
    pub fn new(extra_info: Option<RawJson>) -> Self {
        Self {
            host: HostStatus::current(),
            extra_info,
        }
    }

    /// The host facts.
    #[must_use]
    pub fn host(&self) -> &HostStatus {
        &self.host
    }

    /// The extension payload, if any.
    #[must_use]
    pub fn extra_info(&self) -> Option<&RawJson> {
        self.extra_info.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_status_is_populated() {
        let host = HostStatus::current();
        assert!(host.pid() > 0);
        assert!(host.cpus() >= 1);
        assert!(!host.os().is_empty());
        assert!(!host.arch().is_empty());
    }

    #[test]
    fn test_service_status_roundtrip() {
        let extra = RawJson::new(r#"{"ready":true}"#).unwrap();
        let status = ServiceStatus::new(Some(extra));

        let json = serde_json::to_string(&status).unwrap();
        let decoded: ServiceStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, status);
        assert_eq!(decoded.extra_info().unwrap().get(), r#"{"ready":true}"#);
    }

    #[test]
    fn test_service_status_without_extension() {
        let status = ServiceStatus::new(None);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"extraInfo\":null"));
    }
}
