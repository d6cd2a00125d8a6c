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

//! The wire envelope exchanged on every WebSocket message.
//!
//! An [`Envelope`] carries a correlation id, an operation name, an embedded
//! JSON body, and four timing marks. Envelopes are constructed through the
//! factory methods ([`Envelope::create`], [`Envelope::success_response`],
//! [`Envelope::error_response`]) and are immutable once sent; the timing
//! marks are stamped by the transport and engine layers.

use crate::error::ProtocolError;
use crate::message::error_details::ErrorDetails;
use crate::message::types::RawJson;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Reserved operation names and their classification predicates.
///
/// All comparisons are case-insensitive, matching dispatch behavior.
pub mod ops {
    /// A successful reply to a previous request.
    pub const RESPONSE: &str = "RESPONSE";
    /// A failure reply to a previous request.
    pub const ERROR: &str = "ERROR";
    /// Built-in service status query.
    pub const STATUS: &str = "STATUS";
    /// Built-in request to close every session of a service.
    pub const CLOSE_ALL_SESSIONS: &str = "CLOSE_ALL_SESSIONS";
    /// Built-in notification that a named dependency has moved.
    pub const DEPENDENCY_UPDATED: &str = "DEPENDENCY_UPDATED";

    /// Returns `true` if the op names a reply (successful or error).
    #[must_use]
    pub fn is_response(op: &str) -> bool {
        op.eq_ignore_ascii_case(RESPONSE) || is_error(op)
    }

    /// Returns `true` if the op names an error reply.
    #[must_use]
    pub fn is_error(op: &str) -> bool {
        op.eq_ignore_ascii_case(ERROR)
    }

    /// Returns `true` if the op is reserved by the framework.
    #[must_use]
    pub fn is_reserved(op: &str) -> bool {
        is_response(op)
            || op.eq_ignore_ascii_case(STATUS)
            || op.eq_ignore_ascii_case(CLOSE_ALL_SESSIONS)
            || op.eq_ignore_ascii_case(DEPENDENCY_UPDATED)
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
pub(crate) fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

/// A message which can be sent between services.
///
/// The serialized form is a single JSON object; the `body` field is embedded
/// raw (never double-encoded as a string), unknown fields are ignored on
/// decode, and missing fields decode to `None`.
///
/// # Example
///
/// ```rust
/// use wsrpc::{Envelope, RawJson};
///
/// let body = RawJson::new("\"test\"").unwrap();
/// let request = Envelope::create(true, "ECHO", Some(body)).unwrap();
/// assert!(request.id().is_some());
/// assert!(request.expects_response());
/// assert!(!request.is_reply());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    body: Option<RawJson>,
    #[serde(default, rename = "sentMillis")]
    sent_millis: Option<i64>,
    #[serde(default, rename = "receivedMillis")]
    received_millis: Option<i64>,
    #[serde(default, rename = "startProcessingMillis")]
    start_processing_millis: Option<i64>,
    #[serde(default, rename = "stopProcessingMillis")]
    stop_processing_millis: Option<i64>,
}

impl Envelope {
    fn from_parts(id: Option<String>, op: &str, body: Option<RawJson>) -> Self {
        Self {
            id,
            op: Some(op.to_owned()),
            body,
            sent_millis: None,
            received_millis: None,
            start_processing_millis: None,
            stop_processing_millis: None,
        }
    }

    /// Creates a message that can be sent between services.
    ///
    /// When `expects_response` is `true` a fresh globally-unique correlation
    /// id is minted; replies copy it back verbatim. Messages sent without an
    /// id are fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ReservedOp`] for the reply ops `RESPONSE` and
    /// `ERROR`; those are produced through [`Envelope::success_response`] and
    /// [`Envelope::error_response`].
    pub fn create(
        expects_response: bool,
        op: &str,
        body: Option<RawJson>,
    ) -> Result<Self, ProtocolError> {
        if ops::is_response(op) {
            return Err(ProtocolError::ReservedOp { op: op.to_owned() });
        }

        let id = expects_response.then(|| Uuid::new_v4().to_string());
        Ok(Self::from_parts(id, op, body))
    }

    /// Creates a successful reply to a previous request.
    ///
    /// The reply copies the request's correlation id and its `sentMillis`
    /// mark. On a reply, `sentMillis` therefore means the *request's* send
    /// time; the caller relies on this to compute the round trip.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotExpectingResponse`] if the request did not
    /// expect a response.
    pub fn success_response(request: &Self, body: Option<RawJson>) -> Result<Self, ProtocolError> {
        if !request.expects_response() {
            return Err(ProtocolError::NotExpectingResponse);
        }

        let mut reply = Self::from_parts(request.id.clone(), ops::RESPONSE, body);
        reply.sent_millis = request.sent_millis;
        Ok(reply)
    }

    /// Creates an error reply.
    ///
    /// The correlation id and `sentMillis` are copied from the request when
    /// one is known; an error raised outside of any request (for example a
    /// transport fault) produces an id-less envelope. The body is a
    /// serialized [`ErrorDetails`] with the error's source chain and a stack
    /// trace capped at `stack_depth` frames (`0` includes none).
    #[must_use]
    pub fn error_response(
        request: Option<&Self>,
        error: &(dyn std::error::Error + 'static),
        stack_depth: usize,
    ) -> Self {
        let details = ErrorDetails::from_error(error, stack_depth);
        let body = RawJson::from_value(&details).ok();

        Self {
            id: request.and_then(|r| r.id.clone()),
            op: Some(ops::ERROR.to_owned()),
            body,
            sent_millis: request.and_then(|r| r.sent_millis),
            received_millis: None,
            start_processing_millis: None,
            stop_processing_millis: None,
        }
    }

    /// The correlation id, present iff this message participates in a
    /// request/response pair.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The operation name. `None` only on malformed inbound envelopes, which
    /// the engine rejects.
    #[must_use]
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// The message body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&RawJson> {
        self.body.as_ref()
    }

    /// Unix epoch time at which the message was sent.
    ///
    /// On replies this is the originating request's send time.
    #[must_use]
    pub fn sent_millis(&self) -> Option<i64> {
        self.sent_millis
    }

    /// Unix epoch time at which the message was received.
    #[must_use]
    pub fn received_millis(&self) -> Option<i64> {
        self.received_millis
    }

    /// Unix epoch time at which processing of the originating request began.
    #[must_use]
    pub fn start_processing_millis(&self) -> Option<i64> {
        self.start_processing_millis
    }

    /// Unix epoch time at which processing of the originating request ended.
    #[must_use]
    pub fn stop_processing_millis(&self) -> Option<i64> {
        self.stop_processing_millis
    }

    pub(crate) fn set_sent_millis(&mut self, millis: Option<i64>) {
        self.sent_millis = millis;
    }

    pub(crate) fn set_received_millis(&mut self, millis: Option<i64>) {
        self.received_millis = millis;
    }

    pub(crate) fn set_start_processing_millis(&mut self, millis: Option<i64>) {
        self.start_processing_millis = millis;
    }

    pub(crate) fn set_stop_processing_millis(&mut self, millis: Option<i64>) {
        self.stop_processing_millis = millis;
    }

    /// Returns `true` if this message is a reply to a previous request.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.id.is_some() && self.op.as_deref().is_some_and(ops::is_response)
    }

    /// Returns `true` if this message conveys an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.op.as_deref().is_some_and(ops::is_error)
    }

    /// Returns `true` if the sender of this message is waiting for a reply.
    #[must_use]
    pub fn expects_response(&self) -> bool {
        self.id.is_some() && !self.is_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: &str) -> Option<RawJson> {
        Some(RawJson::new(json).unwrap())
    }

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_create_mints_id_only_when_expecting_response() {
        let request = Envelope::create(true, "ECHO", body("1")).unwrap();
        assert!(request.id().is_some());
        assert!(request.expects_response());

        let oneway = Envelope::create(false, "ECHO", body("1")).unwrap();
        assert!(oneway.id().is_none());
        assert!(!oneway.expects_response());
    }

    #[test]
    fn test_create_ids_are_unique() {
        let a = Envelope::create(true, "ECHO", None).unwrap();
        let b = Envelope::create(true, "ECHO", None).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_create_rejects_reply_ops() {
        assert!(Envelope::create(true, "RESPONSE", None).is_err());
        assert!(Envelope::create(true, "ERROR", None).is_err());
        assert!(Envelope::create(false, "error", None).is_err());
    }

    #[test]
    fn test_success_response_copies_id_and_sent_millis() {
        let mut request = Envelope::create(true, "ECHO", body("1")).unwrap();
        request.set_sent_millis(Some(1234));

        let reply = Envelope::success_response(&request, body("2")).unwrap();
        assert_eq!(reply.id(), request.id());
        assert_eq!(reply.op(), Some("RESPONSE"));
        assert_eq!(reply.sent_millis(), Some(1234));
        assert!(reply.is_reply());
        assert!(!reply.is_error());
        assert!(!reply.expects_response());
    }

    #[test]
    fn test_success_response_requires_expecting_request() {
        let oneway = Envelope::create(false, "ECHO", None).unwrap();
        assert!(Envelope::success_response(&oneway, None).is_err());
    }

    #[test]
    fn test_error_response_with_request() {
        let mut request = Envelope::create(true, "ECHO", None).unwrap();
        request.set_sent_millis(Some(99));

        let reply = Envelope::error_response(Some(&request), &Boom, 0);
        assert_eq!(reply.id(), request.id());
        assert_eq!(reply.op(), Some("ERROR"));
        assert_eq!(reply.sent_millis(), Some(99));
        assert!(reply.is_reply());
        assert!(reply.is_error());

        let details: ErrorDetails = reply.body().unwrap().parse().unwrap();
        assert_eq!(details.error(), "boom");
    }

    #[test]
    fn test_error_response_without_request_has_no_id() {
        let reply = Envelope::error_response(None, &Boom, 0);
        assert!(reply.id().is_none());
        assert!(reply.is_error());
        assert!(!reply.is_reply());
    }

    #[test]
    fn test_serde_roundtrip_preserves_envelope() {
        let mut envelope = Envelope::create(true, "ECHO", body(r#"{"x":[1,2]}"#)).unwrap();
        envelope.set_sent_millis(Some(10));
        envelope.set_received_millis(Some(20));
        envelope.set_start_processing_millis(Some(30));
        envelope.set_stop_processing_millis(Some(40));

        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_body_is_embedded_not_quoted() {
        let envelope = Envelope::create(false, "ECHO", body(r#"{"x":1}"#)).unwrap();
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""body":{"x":1}"#), "json was: {json}");
    }

    #[test]
    fn test_decode_ignores_unknown_and_defaults_missing_fields() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"op":"ECHO","mystery":true}"#).unwrap();
        assert_eq!(envelope.op(), Some("ECHO"));
        assert!(envelope.id().is_none());
        assert!(envelope.body().is_none());
        assert!(envelope.sent_millis().is_none());
    }

    #[test]
    fn test_reply_classification_is_case_insensitive() {
        let reply: Envelope =
            serde_json::from_str(r#"{"id":"abc","op":"response"}"#).unwrap();
        assert!(reply.is_reply());

        let error: Envelope = serde_json::from_str(r#"{"id":"abc","op":"Error"}"#).unwrap();
        assert!(error.is_reply());
        assert!(error.is_error());
    }

    #[test]
    fn test_reply_ops_without_id_are_not_replies() {
        let orphan: Envelope = serde_json::from_str(r#"{"op":"ERROR"}"#).unwrap();
        assert!(!orphan.is_reply());
        assert!(orphan.is_error());
        assert!(!orphan.expects_response());
    }

    #[test]
    fn test_reserved_ops() {
        assert!(ops::is_reserved("status"));
        assert!(ops::is_reserved("CLOSE_ALL_SESSIONS"));
        assert!(ops::is_reserved("Dependency_Updated"));
        assert!(!ops::is_reserved("GREET"));
    }
}
