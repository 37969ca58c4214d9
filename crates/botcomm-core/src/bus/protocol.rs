//! Built-in handler for envelopes addressed to `protocol`.
//!
//! Commands are read from `data.command`; a `REQUEST` without one uses its
//! `data.dataType`. Replies are sent with `respond`, so requesters can use
//! the regular correlation machinery.

use std::collections::BTreeMap;

use botcomm_types::bot::Capability;
use botcomm_types::event::BusEvent;
use botcomm_types::message::{Envelope, MessageType};
use chrono::Utc;
use serde_json::{Value, json};

use super::ProtocolBus;

/// Commands understood by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Register,
    Status,
    Capabilities,
}

impl Command {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "register" => Some(Command::Register),
            "status" => Some(Command::Status),
            "capabilities" => Some(Command::Capabilities),
            _ => None,
        }
    }
}

impl ProtocolBus {
    pub(super) fn handle_protocol(&self, envelope: &Envelope) {
        let name = envelope.command().or_else(|| match envelope.message_type {
            MessageType::Request => envelope.data_type(),
            _ => None,
        });

        let Some(name) = name else {
            match envelope.message_type {
                MessageType::Heartbeat => {
                    tracing::debug!(from = %envelope.from, "heartbeat received");
                }
                MessageType::Error => {
                    tracing::warn!(from = %envelope.from, data = %envelope.data, "error reported to protocol");
                }
                other => {
                    tracing::debug!(
                        id = %envelope.id,
                        message_type = %other,
                        "protocol envelope without command dropped"
                    );
                }
            }
            return;
        };

        let reply = match Command::parse(name) {
            Some(Command::Register) => self.command_register(envelope),
            Some(Command::Status) => self.command_status(envelope),
            Some(Command::Capabilities) => self.command_capabilities(envelope),
            None => {
                tracing::warn!(id = %envelope.id, from = %envelope.from, command = name, "unknown protocol command dropped");
                return;
            }
        };

        if let Err(e) = self.respond(envelope, reply) {
            tracing::warn!(id = %envelope.id, command = name, "failed to reply to protocol command: {e}");
        }
    }

    /// Refresh and reactivate the sender.
    fn command_register(&self, envelope: &Envelope) -> Value {
        match self.registry.reactivate(&envelope.from, Utc::now()) {
            Some(was_inactive) => {
                if was_inactive {
                    tracing::info!(bot_id = %envelope.from, "bot reactivated by register command");
                    self.events.publish(BusEvent::BotReactivated {
                        bot_id: envelope.from.clone(),
                    });
                }
                json!({
                    "registered": true,
                    "registration": self.registry.get(&envelope.from),
                })
            }
            None => json!({
                "registered": false,
                "error": "bot is not registered; call register with a handler first",
            }),
        }
    }

    /// All registrations, or the one named by `data.botId`.
    fn command_status(&self, envelope: &Envelope) -> Value {
        match envelope.data.get("botId").and_then(Value::as_str) {
            Some(bot_id) => json!({ "bot": self.registry.get(bot_id) }),
            None => json!({
                "protocolVersion": self.config.protocol_version,
                "bots": self.registry.list(),
            }),
        }
    }

    /// Capability map of every bot, or the active bots with `data.capability`.
    fn command_capabilities(&self, envelope: &Envelope) -> Value {
        match envelope.data.get("capability").and_then(Value::as_str) {
            Some(raw) => match raw.parse::<Capability>() {
                Ok(capability) => json!({
                    "capability": capability,
                    "bots": self.registry.with_capability(capability),
                }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            None => {
                let map: BTreeMap<String, Vec<Capability>> = self
                    .registry
                    .list()
                    .into_iter()
                    .map(|r| (r.id, r.capabilities.into_iter().collect()))
                    .collect();
                json!({ "capabilities": map })
            }
        }
    }
}
