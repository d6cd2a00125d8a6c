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

//! Operation handlers and the case-insensitive handler table.
//!
//! A [`MessageHandler`] works on raw bodies; [`TypedHandler`] composes the
//! converters of a [`MessageType`] around a user async function so handlers
//! can be written against typed requests and responses. Three shapes are
//! supported: request/response, supplier (no request), and consumer (no
//! response).

use crate::error::BoxError;
use crate::message::{JsonConverter, MessageType, RawJson};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::error;

/// A handler for one operation, invoked by the endpoint engine.
///
/// The raw request body goes in; the raw response body comes out. Whatever
/// the handler returns becomes the `RESPONSE` body when the request expects
/// one; an `Err` becomes an `ERROR` reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one inbound message body.
    ///
    /// # Errors
    ///
    /// Any error is turned into an `ERROR` reply by the engine.
    async fn handle(&self, body: Option<RawJson>) -> Result<Option<RawJson>, BoxError>;
}

/// A [`MessageHandler`] that decodes the request, runs a typed async
/// function, and encodes the response.
pub struct TypedHandler<Req, Res> {
    request: Arc<dyn JsonConverter<Req>>,
    response: Arc<dyn JsonConverter<Res>>,
    handler: Box<dyn Fn(Req) -> BoxFuture<'static, Result<Res, BoxError>> + Send + Sync>,
}

impl<Req, Res> TypedHandler<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Wraps a request/response function.
    pub fn new<F, Fut>(message_type: &MessageType<Req, Res>, handler: F) -> Self
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, BoxError>> + Send + 'static,
    {
        Self {
            request: message_type.request_converter().clone(),
            response: message_type.response_converter().clone(),
            handler: Box::new(move |request| -> BoxFuture<'static, Result<Res, BoxError>> {
                Box::pin(handler(request))
            }),
        }
    }
}

impl<Res> TypedHandler<(), Res>
where
    Res: Send + 'static,
{
    /// Wraps a supplier function for operations without a request body.
    pub fn from_supplier<F, Fut>(message_type: &MessageType<(), Res>, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, BoxError>> + Send + 'static,
    {
        Self::new(message_type, move |()| handler())
    }
}

impl<Req> TypedHandler<Req, ()>
where
    Req: Send + 'static,
{
    /// Wraps a consumer function for operations without a response body.
    pub fn from_consumer<F, Fut>(message_type: &MessageType<Req, ()>, handler: F) -> Self
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::new(message_type, handler)
    }
}

#[async_trait]
impl<Req, Res> MessageHandler for TypedHandler<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn handle(&self, body: Option<RawJson>) -> Result<Option<RawJson>, BoxError> {
        let request = self.request.deserialize(body.as_ref())?;
        let response = (self.handler)(request).await?;
        Ok(self.response.serialize(&response)?)
    }
}

/// Logs `ERROR` frames that arrived outside of any pending call.
///
/// Correlation-less errors cannot be routed to a waiter; the peer raised them
/// for a request it could not identify.
pub(crate) struct OrphanErrorHandler;

#[async_trait]
impl MessageHandler for OrphanErrorHandler {
    async fn handle(&self, body: Option<RawJson>) -> Result<Option<RawJson>, BoxError> {
        error!(
            body = %body.as_ref().map_or("null", RawJson::get),
            "peer reported an error outside of any pending call"
        );
        Ok(None)
    }
}

/// A concurrency-safe mapping from operation name to handler.
///
/// Lookup is case-insensitive; names are stored uppercase-canonical.
///
/// # Example
///
/// ```rust
/// use wsrpc::{HandlerTable, MessageType};
///
/// let table = HandlerTable::new();
/// let greet: MessageType<String, String> = MessageType::new("GREET");
/// table.bind(&greet, |name: String| async move { Ok(format!("Hello, {name}!")) });
/// assert!(table.get("greet").is_some());
/// ```
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl HandlerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered operation names, in canonical (uppercase) form.
    #[must_use]
    pub fn message_types(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Looks up the handler for an operation, case-insensitively.
    #[must_use]
    pub fn get(&self, op: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.read().get(&op.to_ascii_uppercase()).cloned()
    }

    /// Adds or replaces a raw handler.
    pub fn set(&self, op: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .insert(op.to_ascii_uppercase(), handler);
    }

    /// Adds or replaces a typed request/response handler.
    pub fn bind<Req, Res, F, Fut>(&self, message_type: &MessageType<Req, Res>, handler: F)
    where
        Req: Send + 'static,
        Res: Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, BoxError>> + Send + 'static,
    {
        self.set(
            message_type.name(),
            Arc::new(TypedHandler::new(message_type, handler)),
        );
    }

    /// Adds or replaces a typed supplier handler.
    pub fn bind_supplier<Res, F, Fut>(&self, message_type: &MessageType<(), Res>, handler: F)
    where
        Res: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, BoxError>> + Send + 'static,
    {
        self.set(
            message_type.name(),
            Arc::new(TypedHandler::from_supplier(message_type, handler)),
        );
    }

    /// Adds or replaces a typed consumer handler.
    pub fn bind_consumer<Req, F, Fut>(&self, message_type: &MessageType<Req, ()>, handler: F)
    where
        Req: Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.set(
            message_type.name(),
            Arc::new(TypedHandler::from_consumer(message_type, handler)),
        );
    }

    /// Removes a handler, returning it if one was registered.
    pub fn remove(&self, op: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.write().remove(&op.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RawJson;

    #[tokio::test]
    async fn test_typed_handler_roundtrip() {
        let greet: MessageType<String, String> = MessageType::new("GREET");
        let handler = TypedHandler::new(&greet, |name: String| async move {
            Ok(format!("Hello, {name}!"))
        });

        let body = RawJson::new("\"World\"").unwrap();
        let reply = handler.handle(Some(body)).await.unwrap();
        assert_eq!(reply.map(|raw| raw.get().to_owned()), Some("\"Hello, World!\"".to_owned()));
    }

    #[tokio::test]
    async fn test_supplier_handler_ignores_missing_body() {
        let ping: MessageType<(), u32> = MessageType::new("PING");
        let handler = TypedHandler::from_supplier(&ping, || async { Ok(42) });

        let reply = handler.handle(None).await.unwrap();
        assert_eq!(reply.map(|raw| raw.get().to_owned()), Some("42".to_owned()));
    }

    #[tokio::test]
    async fn test_consumer_handler_returns_null_body() {
        let set: MessageType<String, ()> = MessageType::new("SET");
        let handler = TypedHandler::from_consumer(&set, |_value: String| async { Ok(()) });

        let reply = handler
            .handle(Some(RawJson::new("\"x\"").unwrap()))
            .await
            .unwrap();
        assert_eq!(reply.map(|raw| raw.get().to_owned()), Some("null".to_owned()));
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let fail: MessageType<(), ()> = MessageType::new("FAIL");
        let handler =
            TypedHandler::from_supplier(&fail, || async { Err(BoxError::from("it broke")) });

        assert!(handler.handle(None).await.is_err());
    }

    #[tokio::test]
    async fn test_decode_failure_surfaces_as_error() {
        let add: MessageType<u32, u32> = MessageType::new("ADD");
        let handler = TypedHandler::new(&add, |value: u32| async move { Ok(value + 1) });

        let bad = RawJson::new("\"not a number\"").unwrap();
        assert!(handler.handle(Some(bad)).await.is_err());
    }

    #[test]
    fn test_table_lookup_is_case_insensitive() {
        let table = HandlerTable::new();
        let echo: MessageType<String, String> = MessageType::new("echo");
        table.bind(&echo, |value: String| async move { Ok(value) });

        assert!(table.get("ECHO").is_some());
        assert!(table.get("Echo").is_some());
        assert!(table.get("echo").is_some());
        assert!(table.get("OTHER").is_none());
        assert_eq!(table.message_types(), vec!["ECHO".to_owned()]);
    }

    #[test]
    fn test_table_remove() {
        let table = HandlerTable::new();
        let echo: MessageType<String, String> = MessageType::new("ECHO");
        table.bind(&echo, |value: String| async move { Ok(value) });

        assert!(table.remove("echo").is_some());
        assert!(table.get("ECHO").is_none());
        assert!(table.remove("echo").is_none());
    }
}
