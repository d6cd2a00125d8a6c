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

//! Lifecycle tests for in-flight calls: timeouts, wait-forever, close-time
//! purging, the built-in STATUS and CLOSE_ALL_SESSIONS operations, and the
//! keep-alive scheduler.

mod common;

use std::sync::Arc;
use std::time::Duration;
use wsrpc::{
    builtins, Client, ErrorDetails, KeepAlive, MessageType, Service, SessionRegistry,
};

fn sleep_type() -> MessageType<u64, String> {
    MessageType::new("SLEEP")
}

fn sleepy_service() -> Service {
    Service::builder("sleepy")
        .handler(&sleep_type(), |millis: u64| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok("done".to_owned())
        })
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_produces_error_reply() {
    let service = sleepy_service();
    let url = common::serve(&service).await;

    // The handler sleeps for twice the caller's timeout.
    let client = Client::connect(&url).await.expect("failed to connect");
    let reply = client
        .send_request(&sleep_type(), &100, Duration::from_millis(50))
        .await
        .expect("request failed");

    assert!(!reply.is_successful());
    let details = reply.error().unwrap();
    assert!(
        details.error().contains("timed out"),
        "unexpected error: {}",
        details.error()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_timeout_waits_for_slow_reply() {
    let service = sleepy_service();
    let url = common::serve(&service).await;

    let client = Client::connect(&url).await.expect("failed to connect");
    let reply = client
        .send_request(&sleep_type(), &100, Duration::ZERO)
        .await
        .expect("request failed");

    assert!(reply.is_successful());
    assert_eq!(reply.value().unwrap(), "done");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_reply_after_timeout_is_dropped() {
    let service = sleepy_service();
    let url = common::serve(&service).await;

    let client = Client::connect(&url).await.expect("failed to connect");
    let reply = client
        .send_request(&sleep_type(), &80, Duration::from_millis(20))
        .await
        .expect("request failed");
    assert!(!reply.is_successful());

    // Let the late reply arrive; the registry must drop it silently and the
    // session must remain usable.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let reply = client
        .send_request(&sleep_type(), &1, Duration::from_secs(5))
        .await
        .expect("request failed");
    assert!(reply.is_successful());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_purges_outstanding_calls() {
    let service = sleepy_service();
    let url = common::serve(&service).await;

    let client = Client::connect(&url).await.expect("failed to connect");

    // Three calls that would otherwise wait forever.
    let handles: Vec<_> = (0..3)
        .map(|_| client.send_request_detached(&sleep_type(), &60_000, Duration::ZERO))
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close().await.expect("close failed");

    for handle in handles {
        let reply = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("call did not unblock after close")
            .expect("task panicked")
            .expect("request failed");

        assert!(!reply.is_successful());
        let details = reply.error().unwrap();
        assert!(
            details.error().contains("session closed"),
            "unexpected error: {}",
            details.error()
        );
    }

    assert!(!client.is_open());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_reports_host_facts() {
    let service = sleepy_service();
    let url = common::serve(&service).await;

    let client = Client::connect(&url).await.expect("failed to connect");
    let reply = client
        .send_request(&builtins::status(), &serde_json::Value::Null, Duration::from_secs(5))
        .await
        .expect("request failed");

    assert!(reply.is_successful());
    let status = reply.value().unwrap();
    assert!(status.host().cpus() >= 1);
    assert!(status.host().pid() > 0);
    assert!(status.extra_info().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_extension_value_is_embedded() {
    let service = Service::builder("with-extension")
        .status_extension(|_request| {
            Ok(Some(wsrpc::RawJson::new(r#"{"queueDepth":4}"#).unwrap()))
        })
        .build();
    let url = common::serve(&service).await;

    let client = Client::connect(&url).await.expect("failed to connect");
    let reply = client
        .send_request(&builtins::status(), &serde_json::Value::Null, Duration::from_secs(5))
        .await
        .expect("request failed");

    let status = reply.value().unwrap();
    assert_eq!(status.extra_info().unwrap().get(), r#"{"queueDepth":4}"#);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_status_extension_is_not_an_error_reply() {
    let service = Service::builder("flaky-extension")
        .status_extension(|_request| Err("status extension blew up".into()))
        .build();
    let url = common::serve(&service).await;

    let client = Client::connect(&url).await.expect("failed to connect");
    let reply = client
        .send_request(&builtins::status(), &serde_json::Value::Null, Duration::from_secs(5))
        .await
        .expect("request failed");

    // Status stays successful; the failure rides in the extension slot.
    assert!(reply.is_successful());
    let status = reply.value().unwrap();
    let details: ErrorDetails = status.extra_info().unwrap().parse().unwrap();
    assert!(details.error().contains("status extension blew up"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_all_sessions_clears_registry() {
    let service = sleepy_service();
    let url = common::serve(&service).await;

    let client = Client::connect(&url).await.expect("failed to connect");
    {
        let service = service.clone();
        common::wait_until("the session is tracked", move || {
            service.sessions().len() == 1
        })
        .await;
    }

    // The requesting session goes down with the rest, so the reply may be a
    // purge error rather than a RESPONSE; only the closure matters here.
    let _ = client
        .send_request(&builtins::close_all_sessions(), &(), Duration::from_secs(2))
        .await
        .expect("request failed");

    {
        let client = client.clone();
        common::wait_until("the client observes the close", move || !client.is_open()).await;
    }
    let service = service.clone();
    common::wait_until("the registry drops the service key", move || {
        service.registry().service_count() == 0
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_keepalive_pings_tracked_sessions() {
    let registry = Arc::new(SessionRegistry::new());
    let service = Service::builder("kept")
        .registry(registry.clone())
        .build();
    let url = common::serve(&service).await;

    let client = Client::connect(&url).await.expect("failed to connect");
    {
        let service = service.clone();
        common::wait_until("the session is tracked", move || {
            service.sessions().len() == 1
        })
        .await;
    }

    let keepalive = KeepAlive::start_with_interval(registry, Duration::from_millis(50));

    // The client answers each server PING automatically; the server session
    // records the returning PONGs.
    let session = service.sessions().remove(0);
    common::wait_until("a pong comes back", move || session.pongs_received() > 0).await;

    keepalive.stop();
    client.close().await.expect("close failed");
}
