//! Demo participants used by `bcp run`.
//!
//! `search-bot` answers `metrics` requests; `monitor-bot` watches for
//! errors. Both answer the bus heartbeat so they stay active.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use botcomm_core::ProtocolBus;
use botcomm_core::message::BotHandler;
use botcomm_types::bot::{Capability, CapabilityFlags};
use botcomm_types::error::{DeliveryError, ProtocolError};
use botcomm_types::message::{Envelope, EnvelopeInput, MessageType, PROTOCOL_ID};
use serde_json::json;

pub const SEARCH_BOT: &str = "search-bot";
pub const MONITOR_BOT: &str = "monitor-bot";

/// Reply to a bus heartbeat so the liveness check keeps `bot_id` active.
fn answer_heartbeat(bus: &ProtocolBus, bot_id: &str) -> Result<(), DeliveryError> {
    bus.send(EnvelopeInput::new(MessageType::Heartbeat, bot_id, PROTOCOL_ID))
        .map(|_| ())
        .map_err(|e| DeliveryError::new(e.to_string()))
}

pub struct SearchBot {
    started: Instant,
    requests_served: AtomicU64,
}

impl SearchBot {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests_served: AtomicU64::new(0),
        }
    }
}

impl BotHandler for SearchBot {
    fn handle_message(&self, bus: &ProtocolBus, envelope: &Envelope) -> Result<(), DeliveryError> {
        match envelope.message_type {
            MessageType::Heartbeat if envelope.is_protocol_origin() => {
                answer_heartbeat(bus, SEARCH_BOT)
            }
            MessageType::Request => match envelope.data_type() {
                Some("metrics") => {
                    let served = self.requests_served.fetch_add(1, Ordering::Relaxed) + 1;
                    bus.respond(
                        envelope,
                        json!({
                            "uptimeMs": self.started.elapsed().as_millis() as u64,
                            "requestsServed": served,
                            "queueDepth": bus.queue_depth(),
                        }),
                    )
                    .map(|_| ())
                    .map_err(|e| DeliveryError::new(e.to_string()))
                }
                other => Err(DeliveryError::new(format!(
                    "unsupported request: {}",
                    other.unwrap_or("<none>")
                ))),
            },
            _ => Ok(()),
        }
    }
}

pub struct MonitorBot;

impl BotHandler for MonitorBot {
    fn handle_message(&self, bus: &ProtocolBus, envelope: &Envelope) -> Result<(), DeliveryError> {
        match envelope.message_type {
            MessageType::Heartbeat if envelope.is_protocol_origin() => {
                answer_heartbeat(bus, MONITOR_BOT)
            }
            MessageType::Broadcast => {
                tracing::debug!(from = %envelope.from, data = %envelope.data, "monitor saw broadcast");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Register both demo bots and the monitor's error subscription.
pub fn register_demo_bots(bus: &ProtocolBus) -> Result<(), ProtocolError> {
    let search_caps = Capability::probe(&CapabilityFlags {
        search: true,
        nlp: true,
        ..CapabilityFlags::default()
    });
    bus.register(SEARCH_BOT, search_caps, Arc::new(SearchBot::new()))?;
    bus.register(
        MONITOR_BOT,
        [Capability::Monitoring, Capability::Security],
        Arc::new(MonitorBot),
    )?;

    bus.subscribe(MONITOR_BOT, [MessageType::Error], |envelope| {
        tracing::warn!(from = %envelope.from, data = %envelope.data, "monitor observed error");
    });
    Ok(())
}
