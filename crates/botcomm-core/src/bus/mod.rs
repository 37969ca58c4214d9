//! The protocol bus: registry, queue, router, liveness, correlation and
//! history behind one shared object.
//!
//! A `ProtocolBus` is built with [`ProtocolBus::init`], handed to
//! participants as an `Arc`, driven by the periodic tasks spawned from
//! [`ProtocolBus::start`], and torn down with [`ProtocolBus::shutdown`].
//!
//! Locking rules:
//! - state locks are never held across an `.await`
//! - handler and subscription callbacks run with no bus lock held, so they
//!   may call back into `send`, `respond`, `subscribe` and friends

mod correlation;
mod dispatch;
mod liveness;
mod protocol;
mod tasks;

use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use botcomm_types::bot::{BotRegistration, Capability};
use botcomm_types::config::BusConfig;
use botcomm_types::error::ProtocolError;
use botcomm_types::event::BusEvent;
use botcomm_types::insights::{BusState, Insights};
use botcomm_types::message::{BROADCAST_TARGET, Envelope, EnvelopeInput, MessageType, PROTOCOL_ID};
use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event::EventBus;
use crate::history::MessageHistory;
use crate::message::{BotHandler, MessageQueue, envelope};
use crate::registry::{BotRegistry, Registered};
use crate::storage::BoxStateStore;
use crate::subscription::SubscriptionTable;

const EVENT_CAPACITY: usize = 1024;

/// In-process message bus shared by every registered bot.
pub struct ProtocolBus {
    config: BusConfig,
    registry: BotRegistry,
    queue: Mutex<MessageQueue>,
    history: Mutex<MessageHistory>,
    subscriptions: Mutex<SubscriptionTable>,
    events: EventBus,
    store: BoxStateStore,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    draining: AtomicBool,
}

impl ProtocolBus {
    /// Build a bus with empty state. Periodic tasks are not started.
    pub fn new(config: BusConfig, store: BoxStateStore) -> Self {
        let config = config.validated();
        Self {
            registry: BotRegistry::new(),
            queue: Mutex::new(MessageQueue::new(config.priority_ordering)),
            history: Mutex::new(MessageHistory::new(config.history_capacity)),
            subscriptions: Mutex::new(SubscriptionTable::new()),
            events: EventBus::new(EVENT_CAPACITY),
            store,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
            config,
        }
    }

    /// Build a bus and restore the persisted history snapshot.
    ///
    /// A missing or unreadable snapshot is logged and the bus starts with
    /// empty history.
    pub async fn init(config: BusConfig, store: BoxStateStore) -> Arc<Self> {
        let bus = Arc::new(Self::new(config, store));
        let restored = bus.restore_history().await;
        tracing::info!(
            protocol_version = %bus.config.protocol_version,
            restored,
            "protocol bus initialized"
        );
        bus
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register a bot, or replace the handler and capabilities of a known one.
    ///
    /// Announces the registration with a `bot_registered` notification
    /// broadcast from `protocol`.
    pub fn register(
        &self,
        id: &str,
        capabilities: impl IntoIterator<Item = Capability>,
        handler: Arc<dyn BotHandler>,
    ) -> Result<(), ProtocolError> {
        if id.trim().is_empty() {
            return Err(ProtocolError::InvalidRegistration(
                "bot id must not be empty".to_string(),
            ));
        }
        if id == BROADCAST_TARGET || id == PROTOCOL_ID {
            return Err(ProtocolError::InvalidRegistration(format!(
                "'{id}' is a reserved address"
            )));
        }

        let capabilities: BTreeSet<Capability> = capabilities.into_iter().collect();
        let outcome = self
            .registry
            .register(id, capabilities.clone(), handler, Utc::now());

        match outcome {
            Registered::New => tracing::info!(bot_id = id, ?capabilities, "bot registered"),
            Registered::Replaced { was_inactive } => {
                tracing::info!(bot_id = id, was_inactive, "bot re-registered");
                if was_inactive {
                    self.events.publish(BusEvent::BotReactivated {
                        bot_id: id.to_string(),
                    });
                }
            }
        }
        self.events.publish(BusEvent::BotRegistered {
            bot_id: id.to_string(),
        });

        self.send(envelope::protocol_notification(json!({
            "event": "bot_registered",
            "botId": id,
            "capabilities": capabilities,
        })))?;
        Ok(())
    }

    /// Validate and enqueue an envelope. Returns its id.
    ///
    /// The envelope is appended to history immediately and routed on the
    /// next drain. Sending refreshes the sender's heartbeat; a `HEARTBEAT`
    /// from a bot also reactivates it.
    pub fn send(&self, input: EnvelopeInput) -> Result<String, ProtocolError> {
        let envelope = envelope::build(input, &self.config.protocol_version)?;
        let id = envelope.id.clone();

        if envelope.from != PROTOCOL_ID {
            if envelope.message_type == MessageType::Heartbeat {
                if self.registry.reactivate(&envelope.from, envelope.timestamp) == Some(true) {
                    tracing::info!(bot_id = %envelope.from, "bot reactivated by heartbeat");
                    self.events.publish(BusEvent::BotReactivated {
                        bot_id: envelope.from.clone(),
                    });
                }
            } else {
                self.registry.touch(&envelope.from, envelope.timestamp);
            }
        }

        tracing::debug!(
            id = %id,
            message_type = %envelope.message_type,
            from = %envelope.from,
            to = %envelope.to,
            "envelope queued"
        );
        lock(&self.history).push(envelope.clone());
        lock(&self.queue).push(envelope);
        Ok(id)
    }

    /// Subscribe `subscriber` to envelopes of the given types routed to it
    /// (or broadcast by someone else). Returns the subscription id.
    pub fn subscribe<F>(
        &self,
        subscriber: &str,
        types: impl IntoIterator<Item = MessageType>,
        callback: F,
    ) -> String
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let types: Vec<MessageType> = types.into_iter().collect();
        tracing::debug!(subscriber, ?types, "subscription added");
        lock(&self.subscriptions).subscribe(subscriber, types, Arc::new(callback))
    }

    /// Remove `types` from the subscriptions of `subscriber`.
    pub fn unsubscribe(&self, subscriber: &str, types: &[MessageType]) -> usize {
        lock(&self.subscriptions).unsubscribe(subscriber, types)
    }

    /// Listen to the host event surface.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    pub fn registration(&self, id: &str) -> Option<BotRegistration> {
        self.registry.get(id)
    }

    pub fn registrations(&self) -> Vec<BotRegistration> {
        self.registry.list()
    }

    /// Ids of active bots declaring `capability`.
    pub fn bots_with_capability(&self, capability: Capability) -> Vec<String> {
        self.registry.with_capability(capability)
    }

    pub fn queue_depth(&self) -> usize {
        lock(&self.queue).len()
    }

    /// The last `limit` history entries, oldest first.
    pub fn recent_history(&self, limit: usize) -> Vec<Envelope> {
        lock(&self.history).recent(limit)
    }

    /// Aggregate counters over the current registry and history.
    pub fn insights(&self) -> Insights {
        let mut insights = {
            let history = lock(&self.history);
            Insights::from_history(history.iter())
        };
        insights.registered_bots = self.registry.len();
        insights.active_bots = self.registry.active_count();
        insights.inactive_bots = insights.registered_bots - insights.active_bots;
        insights.queue_depth = self.queue_depth();
        {
            let subscriptions = lock(&self.subscriptions);
            insights.pending_requests = subscriptions.pending_count();
            insights.subscriptions = subscriptions.len();
        }
        insights
    }

    /// Diagnostic dump of the full bus state.
    pub fn export_state(&self) -> BusState {
        let history = {
            let history = lock(&self.history);
            history.iter().cloned().collect()
        };
        let subscriptions = lock(&self.subscriptions).infos();
        BusState {
            registrations: self.registry.list(),
            history,
            subscriptions,
            insights: self.insights(),
        }
    }
}

impl std::fmt::Debug for ProtocolBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolBus")
            .field("protocol_version", &self.config.protocol_version)
            .field("registry", &self.registry)
            .field("queue_depth", &self.queue_depth())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Lock a state mutex, recovering the data if a panicking callback
/// poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Best-effort text of a caught panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::message::NoopHandler;
    use botcomm_types::message::Priority;

    #[test]
    fn register_rejects_reserved_and_blank_ids() {
        let bus = bus();
        for id in ["", "  ", "all", "protocol"] {
            let err = bus.register(id, [], Arc::new(NoopHandler)).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidRegistration(_)), "{id:?}");
        }
        assert!(bus.registrations().is_empty());
        assert_eq!(bus.queue_depth(), 0);
    }

    #[test]
    fn register_announces_bot() {
        let bus = bus();
        let mut events = bus.subscribe_events();
        bus.register("a", [Capability::Search], Arc::new(NoopHandler)).unwrap();

        let queued = bus.recent_history(10);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].from, PROTOCOL_ID);
        assert_eq!(queued[0].to, BROADCAST_TARGET);
        assert_eq!(queued[0].data["event"], "bot_registered");
        assert_eq!(queued[0].data["botId"], "a");
        assert_eq!(queued[0].data["capabilities"][0], "search");
        assert!(matches!(
            events.try_recv().unwrap(),
            BusEvent::BotRegistered { ref bot_id } if bot_id == "a"
        ));
    }

    #[test]
    fn send_rejects_invalid_without_mutating_state() {
        let bus = bus();
        let mut input = EnvelopeInput::notification("a", "b", json!({}));
        input.to = None;

        let err = bus.send(input).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
        assert_eq!(bus.queue_depth(), 0);
        assert!(bus.recent_history(10).is_empty());

        let raw = json!({"type": "SHOUT", "from": "a", "to": "b"});
        let parsed = EnvelopeInput::from_json(&raw).map_err(ProtocolError::from);
        assert!(matches!(parsed, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn send_returns_id_and_records_history() {
        let bus = bus();
        let id = bus
            .send(EnvelopeInput::notification("a", "b", json!({"n": 1})))
            .unwrap();

        let history = bus.recent_history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].priority, Priority::Medium);
        assert_eq!(history[0].protocol_version, "1.0.0");
        assert_eq!(bus.queue_depth(), 1);
    }

    #[test]
    fn insights_track_registry_and_history() {
        let bus = bus();
        bus.register("a", [], Arc::new(NoopHandler)).unwrap();
        bus.register("b", [], Arc::new(NoopHandler)).unwrap();
        bus.send(EnvelopeInput::notification("a", "b", json!({})).with_priority(Priority::High))
            .unwrap();
        bus.subscribe("a", [MessageType::Error], |_| {});

        let insights = bus.insights();
        assert_eq!(insights.registered_bots, 2);
        assert_eq!(insights.active_bots, 2);
        assert_eq!(insights.inactive_bots, 0);
        assert_eq!(insights.history_size, 3);
        assert_eq!(insights.queue_depth, 3);
        assert_eq!(insights.count_for_type(MessageType::Notification), 3);
        assert_eq!(insights.count_for_priority(Priority::High), 1);
        assert_eq!(insights.subscriptions, 1);

        bus.drain();
        bus.mark_inactive("b");
        let insights = bus.insights();
        assert_eq!(insights.queue_depth, 1, "bot_inactive notice pending");
        assert_eq!(insights.inactive_bots, 1);
        assert_eq!(insights.history_size, 4);
    }

    #[test]
    fn export_state_includes_everything() {
        let bus = bus();
        bus.register("a", [Capability::Nlp], Arc::new(NoopHandler)).unwrap();
        bus.subscribe("a", [MessageType::Notification], |_| {});
        bus.request("a", "b", "metrics", |_| {}).unwrap();

        let state = bus.export_state();
        assert_eq!(state.registrations.len(), 1);
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.subscriptions.len(), 2);
        assert_eq!(state.insights.pending_requests, 1);

        let dumped = serde_json::to_value(&state).unwrap();
        assert_eq!(dumped["history"][1]["type"], "REQUEST");
    }

    #[test]
    fn panic_message_extracts_text() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 7");
        let caught = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static");
    }
}
