//! Wire messages exchanged between the remote controller and the surface
//!
//! Three shapes share one channel:
//! - Command-Request `{action, args, requestId}`
//! - Command-Response `{type: "<tag>Response", requestId, result?, error?}`
//! - Event `{event, data, timestamp}`
//!
//! Anything else arriving on the channel is not ours and decodes to `None`.

use crate::events::PlayerEvent;
use crate::types::response_type;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id pairing a request with its response
pub type RequestId = u64;

/// Command invocation sent to the surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub request_id: RequestId,
}

impl CommandRequest {
    pub fn new(action: impl Into<String>, args: Vec<Value>, request_id: RequestId) -> Self {
        Self {
            action: action.into(),
            args,
            request_id,
        }
    }
}

/// Outcome of a command, correlated by `request_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    /// Successful response; `Value::Null` results are omitted on the wire
    pub fn ok(protocol_tag: &str, request_id: RequestId, result: Value) -> Self {
        Self {
            kind: response_type(protocol_tag),
            request_id,
            result: (!result.is_null()).then_some(result),
            error: None,
        }
    }

    pub fn err(protocol_tag: &str, request_id: RequestId, error: impl Into<String>) -> Self {
        Self {
            kind: response_type(protocol_tag),
            request_id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// The carried error, ignoring empty strings
    pub fn failure(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// Normalized event as it travels across the boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
}

impl EventMessage {
    /// Stamp an engine-derived event with the current time
    pub fn from_event(event: &PlayerEvent) -> Self {
        Self {
            event: event.kind().as_str().to_string(),
            data: event.payload(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// JSON text form used by host bridges
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Any protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    Request(CommandRequest),
    Response(CommandResponse),
    Event(EventMessage),
}

impl TransportMessage {
    /// Classify a raw message.
    ///
    /// Responses are recognized by their tag, events by a string `event`
    /// field, requests by a string `action` field. Malformed or foreign
    /// messages yield `None`.
    pub fn decode(value: &Value, protocol_tag: &str) -> Option<Self> {
        let obj = value.as_object()?;

        if obj.get("type").and_then(Value::as_str) == Some(response_type(protocol_tag).as_str()) {
            return serde_json::from_value(value.clone()).ok().map(TransportMessage::Response);
        }
        if obj.get("event").is_some_and(Value::is_string) {
            return serde_json::from_value(value.clone()).ok().map(TransportMessage::Event);
        }
        if obj.get("action").is_some_and(Value::is_string) {
            return serde_json::from_value(value.clone()).ok().map(TransportMessage::Request);
        }
        None
    }

    pub fn to_value(&self) -> Value {
        let encoded = match self {
            TransportMessage::Request(req) => serde_json::to_value(req),
            TransportMessage::Response(resp) => serde_json::to_value(resp),
            TransportMessage::Event(event) => serde_json::to_value(event),
        };
        encoded.unwrap_or(Value::Null)
    }
}

impl From<CommandRequest> for TransportMessage {
    fn from(req: CommandRequest) -> Self {
        TransportMessage::Request(req)
    }
}

impl From<CommandResponse> for TransportMessage {
    fn from(resp: CommandResponse) -> Self {
        TransportMessage::Response(resp)
    }
}

impl From<EventMessage> for TransportMessage {
    fn from(event: EventMessage) -> Self {
        TransportMessage::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TAG: &str = "KinoBridge";

    #[test]
    fn test_request_wire_shape() {
        let req = CommandRequest::new("seek", vec![json!(30)], 7);
        let value = TransportMessage::from(req).to_value();
        assert_eq!(value, json!({"action": "seek", "args": [30], "requestId": 7}));
    }

    #[test]
    fn test_response_omits_null_result() {
        let value = TransportMessage::from(CommandResponse::ok(TAG, 3, Value::Null)).to_value();
        assert_eq!(value, json!({"type": "KinoBridgeResponse", "requestId": 3}));

        let value = TransportMessage::from(CommandResponse::ok(TAG, 4, json!(0.5))).to_value();
        assert_eq!(value["result"], json!(0.5));
    }

    #[test]
    fn test_decode_classifies_messages() {
        let resp = json!({"type": "KinoBridgeResponse", "requestId": 1, "result": true});
        assert!(matches!(
            TransportMessage::decode(&resp, TAG),
            Some(TransportMessage::Response(r)) if r.request_id == 1
        ));

        let event = json!({"event": "onPlay", "data": {"currentTime": 1.5}, "timestamp": 10});
        assert!(matches!(
            TransportMessage::decode(&event, TAG),
            Some(TransportMessage::Event(e)) if e.event == "onPlay"
        ));

        let req = json!({"action": "play", "requestId": 2});
        assert!(matches!(
            TransportMessage::decode(&req, TAG),
            Some(TransportMessage::Request(r)) if r.args.is_empty()
        ));
    }

    #[test]
    fn test_decode_ignores_foreign_messages() {
        assert!(TransportMessage::decode(&json!("hello"), TAG).is_none());
        assert!(TransportMessage::decode(&json!({"source": "devtools"}), TAG).is_none());
        assert!(TransportMessage::decode(&json!({"type": "OtherResponse", "requestId": 1}), TAG).is_none());
        assert!(TransportMessage::decode(&json!({"action": "play", "requestId": "x"}), TAG).is_none());
    }

    #[test]
    fn test_empty_error_is_not_a_failure() {
        let mut resp = CommandResponse::err(TAG, 1, "");
        assert!(resp.failure().is_none());
        resp.error = Some("boom".into());
        assert_eq!(resp.failure(), Some("boom"));
    }
}
