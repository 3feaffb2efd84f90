//! Realtime event types

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Inbound envelope sent by clients over the WebSocket
///
/// The `type` field carries a `service:action` tag that the router
/// resolves to a registered handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Routing tag, `service:action` (e.g. "chat:sendMessage")
    #[serde(rename = "type")]
    pub tag: String,

    /// Handler-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Split the tag into `(service, action)`
    pub fn parse_tag(&self) -> Result<(&str, &str)> {
        match self.tag.split_once(':') {
            Some((service, action)) if !service.is_empty() && !action.is_empty() => {
                Ok((service, action))
            }
            _ => Err(Error::InvalidArgument(format!(
                "malformed event tag: {:?}",
                self.tag
            ))),
        }
    }
}

/// Outbound event pushed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Event name (e.g. "receiveMessage", "connectSuccess")
    pub event: String,

    /// Event data
    pub data: serde_json::Value,
}

impl RealtimeEvent {
    /// Create a new event with JSON data
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Emitted once after a successful handshake
    pub fn connect_success(user_id: &str, session_id: &str) -> Self {
        Self::new(
            "connectSuccess",
            serde_json::json!({
                "userId": user_id,
                "sessionId": session_id,
                "timestamp": chrono::Utc::now().timestamp_millis(),
            }),
        )
    }

    /// Heartbeat reply
    pub fn pong() -> Self {
        Self::new(
            "pong",
            serde_json::json!({ "timestamp": chrono::Utc::now().timestamp_millis() }),
        )
    }

    /// Error report; delivery failures never close the connection
    pub fn error_event(err: &Error) -> Self {
        Self::new(
            "error",
            serde_json::json!({
                "code": err.code(),
                "message": err.to_string(),
            }),
        )
    }

    /// Serialize to the wire format
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_action_tags() {
        let env = EventEnvelope {
            tag: "chat:sendMessage".into(),
            payload: serde_json::Value::Null,
        };
        assert_eq!(env.parse_tag().unwrap(), ("chat", "sendMessage"));
    }

    #[test]
    fn rejects_malformed_tags() {
        for tag in ["chat", ":sendMessage", "chat:", ""] {
            let env = EventEnvelope {
                tag: tag.into(),
                payload: serde_json::Value::Null,
            };
            assert!(env.parse_tag().is_err(), "tag {tag:?} should be rejected");
        }
    }
}
