//! WebSocket message envelopes.
//!
//! Every frame in either direction is `{"type": ..., "payload": ...}`.
//! Payloads are JSON values so topics can evolve without breaking the
//! envelope.

use serde::{Deserialize, Serialize};

/// Server -> client frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::Value::Null,
        }
    }
}

/// Client -> server frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    #[allow(dead_code)] // Reserved for future client commands.
    pub payload: serde_json::Value,
}

/// Frame type constants.
pub mod msg_types {
    /// Sent once after the connection is established.
    pub const CONNECTED: &str = "connected";
    /// Now-playing change.
    pub const TRACK_UPDATE: &str = "track_update";
    /// A history row was appended.
    pub const HISTORY_UPDATE: &str = "history_update";
    /// DJ pipeline state transition.
    pub const DJ_STATE: &str = "dj_state";
    /// This connection was too slow and lost frames.
    pub const LAG_HINT: &str = "lag_hint";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}

/// Payload of a `lag_hint` frame.
#[derive(Debug, Clone, Serialize)]
pub struct LagHint {
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_serializes_with_type_tag() {
        let msg = ServerMessage::new(msg_types::LAG_HINT, LagHint { dropped: 3 });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"lag_hint\""));
        assert!(json.contains("\"dropped\":3"));
    }

    #[test]
    fn client_message_payload_defaults_to_null() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.msg_type, "ping");
        assert!(msg.payload.is_null());
    }

    #[test]
    fn empty_message_has_null_payload() {
        let msg = ServerMessage::empty(msg_types::PONG);
        assert!(msg.payload.is_null());
    }
}
