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

//! Message body values and typed operation descriptors.
//!
//! Bodies travel as [`RawJson`]: an already-encoded JSON fragment that the
//! envelope serializer embeds verbatim instead of re-quoting as a string.
//! A [`MessageType`] binds an operation name to the converter pair used to
//! move typed values in and out of that raw form.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while converting message bodies to or from JSON.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value could not be encoded as a JSON fragment.
    #[error("failed to encode message body: {source}")]
    Encode {
        /// The underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// A JSON fragment could not be decoded into the expected type.
    #[error("failed to decode message body: {source}")]
    Decode {
        /// The underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },
}

/// An already-encoded JSON fragment.
///
/// `RawJson` is a distinct value type (not a plain string) so that the
/// envelope serializer knows to embed it raw. Deserializing an envelope
/// captures each body as `RawJson` without interpreting it; the typed
/// converters decide how to read it.
///
/// # Example
///
/// ```rust
/// use wsrpc::RawJson;
///
/// let raw = RawJson::new(r#"{"answer":42}"#).unwrap();
/// assert_eq!(raw.get(), r#"{"answer":42}"#);
///
/// let value: serde_json::Value = raw.parse().unwrap();
/// assert_eq!(value["answer"], 42);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawJson(Box<RawValue>);

impl RawJson {
    /// Wraps a string that already contains JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the string is not valid JSON.
    pub fn new(json: impl Into<String>) -> Result<Self, CodecError> {
        RawValue::from_string(json.into())
            .map(Self)
            .map_err(|source| CodecError::Encode { source })
    }

    /// Encodes a serializable value into a raw JSON fragment.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value cannot be serialized.
    pub fn from_value<T>(value: &T) -> Result<Self, CodecError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::value::to_raw_value(value)
            .map(Self)
            .map_err(|source| CodecError::Encode { source })
    }

    /// Returns the JSON text of this fragment.
    #[must_use]
    pub fn get(&self) -> &str {
        self.0.get()
    }

    /// Decodes this fragment into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the fragment does not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_str(self.0.get()).map_err(|source| CodecError::Decode { source })
    }
}

impl PartialEq for RawJson {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

impl Eq for RawJson {}

impl fmt::Display for RawJson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.get())
    }
}

/// Converts typed values to and from raw JSON message bodies.
///
/// A converter pair is attached to every [`MessageType`]; either side may
/// encode "no payload" as an absent or `null` body.
pub trait JsonConverter<T>: Send + Sync {
    /// Encodes a value into a message body.
    ///
    /// Returning `None` means the message carries no body.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the value cannot be encoded.
    fn serialize(&self, value: &T) -> Result<Option<RawJson>, CodecError>;

    /// Decodes a message body into a value.
    ///
    /// An absent body decodes the same way as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the body does not match `T`.
    fn deserialize(&self, body: Option<&RawJson>) -> Result<T, CodecError>;
}

/// The default [`JsonConverter`] backed by serde.
///
/// Handles any `Serialize + DeserializeOwned` type. `()` and `Option<T>`
/// round-trip through JSON `null`, which is how operations without a request
/// or response payload are modeled.
pub struct SimpleJsonConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SimpleJsonConverter<T> {
    /// Creates a new converter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SimpleJsonConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SimpleJsonConverter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleJsonConverter").finish()
    }
}

impl<T> JsonConverter<T> for SimpleJsonConverter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Option<RawJson>, CodecError> {
        Ok(Some(RawJson::from_value(value)?))
    }

    fn deserialize(&self, body: Option<&RawJson>) -> Result<T, CodecError> {
        match body {
            Some(raw) => raw.parse(),
            None => serde_json::from_str("null").map_err(|source| CodecError::Decode { source }),
        }
    }
}

/// A named operation with its request and response converters.
///
/// Names are matched case-insensitively on dispatch and must not collide with
/// the reserved ops in [`crate::message::ops`].
///
/// # Example
///
/// ```rust
/// use wsrpc::MessageType;
///
/// let greet: MessageType<String, String> = MessageType::new("GREET");
/// assert_eq!(greet.name(), "GREET");
/// ```
pub struct MessageType<Req, Res> {
    name: String,
    request: Arc<dyn JsonConverter<Req>>,
    response: Arc<dyn JsonConverter<Res>>,
}

impl<Req, Res> MessageType<Req, Res>
where
    Req: Serialize + DeserializeOwned + 'static,
    Res: Serialize + DeserializeOwned + 'static,
{
    /// Creates a message type using the default converters for both sides.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: Arc::new(SimpleJsonConverter::new()),
            response: Arc::new(SimpleJsonConverter::new()),
        }
    }
}

impl<Req, Res> MessageType<Req, Res> {
    /// Creates a message type with explicit converters.
    ///
    /// Use this when the default serde representation of `Req` or `Res` does
    /// not match the wire contract of the operation.
    #[must_use]
    pub fn with_converters(
        name: impl Into<String>,
        request: Arc<dyn JsonConverter<Req>>,
        response: Arc<dyn JsonConverter<Res>>,
    ) -> Self {
        Self {
            name: name.into(),
            request,
            response,
        }
    }

    /// The operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The converter for request bodies.
    #[must_use]
    pub fn request_converter(&self) -> &Arc<dyn JsonConverter<Req>> {
        &self.request
    }

    /// The converter for response bodies.
    #[must_use]
    pub fn response_converter(&self) -> &Arc<dyn JsonConverter<Res>> {
        &self.response
    }
}

impl<Req, Res> Clone for MessageType<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            request: self.request.clone(),
            response: self.response.clone(),
        }
    }
}

impl<Req, Res> fmt::Debug for MessageType<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageType")
            .field("name", &self.name)
            .finish()
    }
}
