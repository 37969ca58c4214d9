//! Message envelope types for the bot communication protocol.
//!
//! `Envelope` is the unit exchanged on the bus. It is produced by the bus
//! from an `EnvelopeInput` (the caller-supplied fields) at send time, which
//! fills in the id, timestamp and protocol version.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Recipient id addressing every active bot except the sender.
pub const BROADCAST_TARGET: &str = "all";

/// Participant id used by the bus itself, both as sender of internal
/// messages and as recipient of protocol commands.
pub const PROTOCOL_ID: &str = "protocol";

/// Closed enumeration of envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Broadcast,
    Heartbeat,
    Error,
}

impl MessageType {
    /// Every member of the enumeration, in declaration order.
    pub const ALL: [MessageType; 6] = [
        MessageType::Request,
        MessageType::Response,
        MessageType::Notification,
        MessageType::Broadcast,
        MessageType::Heartbeat,
        MessageType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
            MessageType::Notification => "NOTIFICATION",
            MessageType::Broadcast => "BROADCAST",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Error => "ERROR",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::UnknownType(s.to_string()))
    }
}

/// Message priority.
///
/// Recorded on every envelope. Delivery order only honors it when the bus
/// is configured with `priority_ordering = true`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Urgency rank, 0 being the most urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::UnknownPriority(s.to_string()))
    }
}

/// A dispatched message. Immutable once it has been queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Time-sortable unique id assigned by the bus.
    pub id: String,
    /// Creation time, set by the bus.
    pub timestamp: DateTime<Utc>,
    pub protocol_version: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub priority: Priority,
    pub from: String,
    /// Bot id, `"all"` or `"protocol"`.
    pub to: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_TARGET
    }

    pub fn is_protocol(&self) -> bool {
        self.to == PROTOCOL_ID
    }

    /// Sent by the bus itself rather than by a bot.
    pub fn is_protocol_origin(&self) -> bool {
        self.from == PROTOCOL_ID
    }

    /// The correlation id carried in `data.correlationId`, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.data.get("correlationId").and_then(|v| v.as_str())
    }

    /// The protocol command carried in `data.command`, if any.
    pub fn command(&self) -> Option<&str> {
        self.data.get("command").and_then(|v| v.as_str())
    }

    /// The requested data type carried in `data.dataType`, if any.
    pub fn data_type(&self) -> Option<&str> {
        self.data.get("dataType").and_then(|v| v.as_str())
    }
}

/// Caller-supplied envelope fields, prior to validation.
///
/// `message_type`, `from` and `to` are required; `priority` defaults to
/// `MEDIUM` and `data` to JSON `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeInput {
    pub message_type: Option<MessageType>,
    pub priority: Option<Priority>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub data: serde_json::Value,
}

impl EnvelopeInput {
    pub fn new(message_type: MessageType, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            message_type: Some(message_type),
            priority: None,
            from: Some(from.into()),
            to: Some(to.into()),
            data: serde_json::Value::Null,
        }
    }

    /// A `NOTIFICATION` addressed to `to`.
    pub fn notification(
        from: impl Into<String>,
        to: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::Notification, from, to).with_data(data)
    }

    /// A `BROADCAST` to every active bot.
    pub fn broadcast(from: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(MessageType::Broadcast, from, BROADCAST_TARGET).with_data(data)
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Parse an untyped JSON object (`{type, priority, from, to, data}`).
    ///
    /// Missing fields are left as `None` so the validator reports them;
    /// unknown `type` or `priority` strings are rejected here.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ValidationError> {
        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let message_type = match obj.get("type").and_then(|v| v.as_str()) {
            Some(s) => Some(s.parse::<MessageType>()?),
            None => None,
        };
        let priority = match obj.get("priority").and_then(|v| v.as_str()) {
            Some(s) => Some(s.parse::<Priority>()?),
            None => None,
        };

        Ok(Self {
            message_type,
            priority,
            from: obj.get("from").and_then(|v| v.as_str()).map(str::to_string),
            to: obj.get("to").and_then(|v| v.as_str()).map(str::to_string),
            data: obj.get("data").cloned().unwrap_or(serde_json::Value::Null),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_envelope() -> Envelope {
        Envelope {
            id: "0190a1b2-0000-7000-8000-000000000001".to_string(),
            timestamp: Utc::now(),
            protocol_version: "1.0.0".to_string(),
            message_type: MessageType::Request,
            priority: Priority::High,
            from: "search-bot".to_string(),
            to: "monitor-bot".to_string(),
            data: json!({"correlationId": "corr-1", "dataType": "metrics"}),
        }
    }

    #[test]
    fn test_envelope_serializes_camel_case() {
        let json_str = serde_json::to_string(&sample_envelope()).unwrap();

        assert!(json_str.contains("\"protocolVersion\":\"1.0.0\""));
        assert!(json_str.contains("\"type\":\"REQUEST\""));
        assert!(json_str.contains("\"priority\":\"HIGH\""));

        let parsed: Envelope = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.message_type, MessageType::Request);
        assert_eq!(parsed.from, "search-bot");
    }

    #[test]
    fn test_envelope_accessors() {
        let env = sample_envelope();
        assert_eq!(env.correlation_id(), Some("corr-1"));
        assert_eq!(env.data_type(), Some("metrics"));
        assert_eq!(env.command(), None);
        assert!(!env.is_broadcast());
        assert!(!env.is_protocol());
        assert!(!env.is_protocol_origin());
    }

    #[test]
    fn test_message_type_from_str_is_case_insensitive() {
        assert_eq!("heartbeat".parse::<MessageType>().unwrap(), MessageType::Heartbeat);
        assert_eq!("ERROR".parse::<MessageType>().unwrap(), MessageType::Error);
        assert!(matches!(
            "PING".parse::<MessageType>(),
            Err(ValidationError::UnknownType(t)) if t == "PING"
        ));
    }

    #[test]
    fn test_priority_rank_orders_critical_first() {
        let mut all = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        all.sort_by_key(|p| p.rank());
        assert_eq!(all, Priority::ALL.to_vec());
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_input_from_json_leaves_missing_fields_empty() {
        let input = EnvelopeInput::from_json(&json!({"type": "NOTIFICATION", "to": "all"})).unwrap();
        assert_eq!(input.message_type, Some(MessageType::Notification));
        assert_eq!(input.from, None);
        assert_eq!(input.to.as_deref(), Some("all"));
        assert!(input.data.is_null());
    }

    #[test]
    fn test_input_from_json_rejects_unknown_values() {
        let bad_type = EnvelopeInput::from_json(&json!({"type": "GOSSIP", "from": "a", "to": "b"}));
        assert!(matches!(bad_type, Err(ValidationError::UnknownType(_))));

        let bad_priority = EnvelopeInput::from_json(
            &json!({"type": "REQUEST", "priority": "URGENT", "from": "a", "to": "b"}),
        );
        assert!(matches!(bad_priority, Err(ValidationError::UnknownPriority(_))));

        assert!(matches!(
            EnvelopeInput::from_json(&json!([1, 2])),
            Err(ValidationError::NotAnObject)
        ));
    }

    #[test]
    fn test_input_builders() {
        let input = EnvelopeInput::broadcast("a", json!({"x": 1})).with_priority(Priority::Low);
        assert_eq!(input.message_type, Some(MessageType::Broadcast));
        assert_eq!(input.to.as_deref(), Some(BROADCAST_TARGET));
        assert_eq!(input.priority, Some(Priority::Low));
        assert_eq!(input.data["x"], 1);
    }
}
