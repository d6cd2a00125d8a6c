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

//! Typed descriptors for the built-in message types.
//!
//! Every service answers these out of the box; clients use the constructors
//! here to invoke them with the right request and response shapes.

use crate::message::{ops, MessageType};
use crate::service::ServiceStatus;
use serde_json::Value;

/// `STATUS`: queries a service for its status payload.
///
/// The request body is free-form and handed to the service's status
/// extension; the reply decodes to a [`ServiceStatus`].
#[must_use]
pub fn status() -> MessageType<Value, ServiceStatus> {
    MessageType::new(ops::STATUS)
}

/// `CLOSE_ALL_SESSIONS`: asks a service to close every tracked session.
#[must_use]
pub fn close_all_sessions() -> MessageType<(), ()> {
    MessageType::new(ops::CLOSE_ALL_SESSIONS)
}

/// `DEPENDENCY_UPDATED`: notifies a service that the named dependency has
/// moved, dropping any cached proxy client for it.
#[must_use]
pub fn dependency_updated() -> MessageType<String, ()> {
    MessageType::new(ops::DEPENDENCY_UPDATED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_match_reserved_ops() {
        assert_eq!(status().name(), "STATUS");
        assert_eq!(close_all_sessions().name(), "CLOSE_ALL_SESSIONS");
        assert_eq!(dependency_updated().name(), "DEPENDENCY_UPDATED");
        assert!(ops::is_reserved(status().name()));
    }
}
