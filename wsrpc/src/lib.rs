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

#![doc = include_str!("../../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! # Architecture
//!
//! WSRPC is organized into several layers:
//!
//! - **[`transport`]**: WebSocket listeners and [`Session`]s, plus the frame
//!   adapter that picks text or binary framing by payload size and keeps
//!   sends on a session serialized
//! - **[`message`]**: the wire [`Envelope`], raw bodies, typed
//!   [`MessageType`] descriptors, and the serializable error record
//! - **[`handler`]**: the case-insensitive [`HandlerTable`] and the typed
//!   handler adapters
//! - **[`endpoint`]**: the per-session receive engine shared by both roles;
//!   no error ever escapes its loop
//! - **[`client`]**: the calling side - one managed session, the
//!   pending-call registry, and the [`Response`] reply view
//! - **[`service`]**: the serving side - session tracking per service,
//!   keep-alive pings, broadcast, built-in operations, and service proxies
//!
//! ## Calls
//!
//! A request envelope carries a freshly minted correlation id; the reply
//! copies it back. The client registers a waiter before transmitting, so
//! the reply always finds it regardless of scheduling. Timeouts and closed
//! sessions complete the waiter with a synthesized `ERROR` reply - a call
//! never hangs past its deadline and never panics on a lost session.
//!
//! ## Services calling services
//!
//! A service that depends on another service holds a named
//! [`ServiceProxy`]: a lazy cached client with exponential-backoff
//! reconnection. Handlers resolve the proxy through the service's
//! [`ServiceProxyManager`] and call the dependency like any other client.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod message;
pub mod service;
pub mod transport;

pub use client::{connect_with, Client, PendingCalls, RequestError, Response};
pub use endpoint::{Endpoint, EndpointHooks};
pub use error::{BoxError, ProtocolError, WsRpcError};
pub use handler::{HandlerTable, MessageHandler, TypedHandler};
pub use message::{
    builtins, ops, CodecError, Envelope, ErrorDetails, JsonConverter, MessageType, RawJson,
    SimpleJsonConverter, StackFrame,
};
pub use service::{
    HostStatus, KeepAlive, ProxyError, ServiceClient, Service, ServiceBuilder, ServiceId,
    ServiceProxy, ServiceProxyManager, ServiceStatus, SessionRegistry, PING_FREQUENCY,
};
pub use transport::{
    CloseCode, FrameSource, Session, SessionConfig, SessionId, TransportError, WebSocketListener,
    MAX_TEXT_MESSAGE_LENGTH, SUBPROTOCOL,
};
