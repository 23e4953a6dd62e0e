//! Wire envelope for the admin protocol.
//!
//! Requests go out as `{ "action", "request_id", "payload" }`. Responses come
//! back as `{ "type", "request_id", "payload" }`; only `type == "response"`
//! counts as success. Everything else on the wire is an unsolicited push
//! event and is passed through as decoded JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::LinkError;
use crate::ids::RequestId;

/// `type` value of a successful response.
pub const RESPONSE_TYPE: &str = "response";

/// Outbound request envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Action name understood by the remote service.
    pub action: String,
    /// Correlation key echoed back in the response.
    pub request_id: RequestId,
    /// Action arguments.
    pub payload: Value,
}

impl RequestEnvelope {
    /// Build an envelope. A `null` payload is sent as an empty object.
    pub fn new(action: impl Into<String>, request_id: RequestId, payload: Value) -> Self {
        let payload = if payload.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            payload
        };
        Self {
            action: action.into(),
            request_id,
            payload,
        }
    }

    /// Serialize to the JSON text frame sent over the link.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode one inbound text frame.
pub fn decode_inbound(text: &str) -> Result<Value, LinkError> {
    serde_json::from_str(text).map_err(LinkError::Decode)
}

/// The `request_id` of a decoded inbound message, if it carries one.
pub fn correlation_id(message: &Value) -> Option<&str> {
    message.get("request_id").and_then(Value::as_str)
}

/// Whether a decoded message is a successful response.
pub fn is_response(message: &Value) -> bool {
    message.get("type").and_then(Value::as_str) == Some(RESPONSE_TYPE)
}

/// The `payload` of a decoded message (`null` when absent).
pub fn payload_of(message: &Value) -> Value {
    message.get("payload").cloned().unwrap_or(Value::Null)
}
