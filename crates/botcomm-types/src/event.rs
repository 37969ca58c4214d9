//! Observability events published by the protocol bus.
//!
//! `BusEvent` is the host event surface: passive listeners subscribe to it
//! to observe deliveries and lifecycle changes without registering a bot.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};

use crate::message::Envelope;

/// Events emitted while the bus routes messages and tracks liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// A bot was registered (or re-registered).
    BotRegistered { bot_id: String },

    /// A bot missed the liveness timeout.
    BotInactive { bot_id: String },

    /// A bot became active again after heartbeating or re-registering.
    BotReactivated { bot_id: String },

    /// An envelope was handed to a bot's handler without error.
    MessageDelivered {
        recipient: String,
        envelope: Envelope,
    },

    /// An envelope could not be routed to its recipient.
    MessageDropped {
        envelope_id: String,
        recipient: String,
        reason: String,
    },

    /// A bot's handler failed while processing an envelope.
    DeliveryFailed {
        envelope_id: String,
        recipient: String,
        error: String,
    },

    /// A pending request expired before its response arrived.
    RequestTimedOut { correlation_id: String, requester: String },

    /// The history snapshot was written.
    HistoryPersisted { entries: usize },
}
