//! Heartbeat emission and timeout-based demotion of silent bots.

use botcomm_types::error::ProtocolError;
use botcomm_types::event::BusEvent;
use botcomm_types::message::{BROADCAST_TARGET, EnvelopeInput, MessageType, PROTOCOL_ID};
use chrono::{DateTime, Utc};
use serde_json::json;

use super::ProtocolBus;
use crate::message::envelope;

impl ProtocolBus {
    /// Broadcast a `HEARTBEAT` from `protocol` to every active bot.
    pub fn emit_heartbeat(&self) -> Result<String, ProtocolError> {
        self.send(
            EnvelopeInput::new(MessageType::Heartbeat, PROTOCOL_ID, BROADCAST_TARGET).with_data(
                json!({
                    "timestamp": Utc::now(),
                    "protocolVersion": self.config.protocol_version,
                }),
            ),
        )
    }

    /// Demote every active bot that has been silent longer than the
    /// liveness timeout. Returns the demoted ids.
    pub fn check_liveness(&self) -> Vec<String> {
        self.check_liveness_at(Utc::now())
    }

    /// [`check_liveness`](Self::check_liveness) against an explicit clock.
    pub fn check_liveness_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::from_std(self.config.liveness_timeout())
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let stale = self.registry.stale_ids(now, timeout);
        stale.into_iter().filter(|id| self.mark_inactive(id)).collect()
    }

    /// Mark `bot_id` inactive and announce it with a `bot_inactive`
    /// notification. Returns `false` if the bot was unknown or already
    /// inactive.
    pub fn mark_inactive(&self, bot_id: &str) -> bool {
        if !self.registry.mark_inactive(bot_id) {
            return false;
        }
        tracing::info!(bot_id, "bot marked inactive: no heartbeat");
        self.events.publish(BusEvent::BotInactive {
            bot_id: bot_id.to_string(),
        });
        if let Err(e) = self.send(envelope::protocol_notification(json!({
            "event": "bot_inactive",
            "botId": bot_id,
            "reason": "no_heartbeat",
        }))) {
            tracing::warn!(bot_id, "failed to announce inactive bot: {e}");
        }
        true
    }
}
