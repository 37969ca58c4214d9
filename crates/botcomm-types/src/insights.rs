//! Aggregate statistics and diagnostic dumps of bus state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bot::BotRegistration;
use crate::message::{Envelope, MessageType, Priority};

/// Summary counters over the registry and message history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub registered_bots: usize,
    pub active_bots: usize,
    pub inactive_bots: usize,
    pub queue_depth: usize,
    pub history_size: usize,
    pub by_type: BTreeMap<MessageType, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
    /// `ERROR` envelopes in history.
    pub error_messages: usize,
    pub pending_requests: usize,
    pub subscriptions: usize,
}

impl Insights {
    /// Count history entries by type and priority.
    ///
    /// Registry and queue fields are left for the caller to fill.
    pub fn from_history<'a>(history: impl IntoIterator<Item = &'a Envelope>) -> Self {
        let mut insights = Insights::default();
        for envelope in history {
            insights.history_size += 1;
            *insights.by_type.entry(envelope.message_type).or_insert(0) += 1;
            *insights.by_priority.entry(envelope.priority).or_insert(0) += 1;
            if envelope.message_type == MessageType::Error {
                insights.error_messages += 1;
            }
        }
        insights
    }

    pub fn count_for_type(&self, message_type: MessageType) -> usize {
        self.by_type.get(&message_type).copied().unwrap_or(0)
    }

    pub fn count_for_priority(&self, priority: Priority) -> usize {
        self.by_priority.get(&priority).copied().unwrap_or(0)
    }
}

/// One live subscription, as shown in diagnostic dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub subscription_id: String,
    pub subscriber: String,
    pub types: Vec<MessageType>,
    /// Set for one-shot subscriptions awaiting a correlated response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Full diagnostic dump of a bus instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusState {
    pub registrations: Vec<BotRegistration>,
    pub history: Vec<Envelope>,
    pub subscriptions: Vec<SubscriptionInfo>,
    pub insights: Insights,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn envelope(message_type: MessageType, priority: Priority) -> Envelope {
        Envelope {
            id: uuid::Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            protocol_version: "1.0.0".to_string(),
            message_type,
            priority,
            from: "a".to_string(),
            to: "b".to_string(),
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_from_history_counts_types_and_priorities() {
        let history = vec![
            envelope(MessageType::Notification, Priority::Medium),
            envelope(MessageType::Error, Priority::High),
            envelope(MessageType::Error, Priority::Medium),
            envelope(MessageType::Heartbeat, Priority::Low),
        ];
        let insights = Insights::from_history(&history);

        assert_eq!(insights.history_size, 4);
        assert_eq!(insights.error_messages, 2);
        assert_eq!(insights.count_for_type(MessageType::Error), 2);
        assert_eq!(insights.count_for_type(MessageType::Request), 0);
        assert_eq!(insights.count_for_priority(Priority::Medium), 2);
        assert_eq!(insights.count_for_priority(Priority::Critical), 0);
    }

    #[test]
    fn test_insights_serialize_type_keys() {
        let insights = Insights::from_history(&[envelope(MessageType::Request, Priority::High)]);
        let json = serde_json::to_string(&insights).unwrap();
        assert!(json.contains("\"byType\":{\"REQUEST\":1}"));
        assert!(json.contains("\"byPriority\":{\"HIGH\":1}"));
    }
}
