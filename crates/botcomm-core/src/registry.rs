//! Bot registry: registrations, liveness status, and delivery counters.
//!
//! Lookups hand out clones (registrations, handler `Arc`s, id lists) so no
//! map guard is ever held while a handler runs. A handler may therefore
//! re-enter the bus and touch the registry without deadlocking.

use std::collections::BTreeSet;
use std::sync::Arc;

use botcomm_types::bot::{BotRegistration, BotStatus, Capability};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::message::BotHandler;

struct RegistryEntry {
    registration: BotRegistration,
    handler: Arc<dyn BotHandler>,
}

/// Outcome of a `register` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    New,
    /// The id was already known; capabilities and handler were replaced.
    Replaced { was_inactive: bool },
}

/// Concurrent map of registered bots keyed by id.
#[derive(Default)]
pub struct BotRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a registration.
    ///
    /// Re-registration keeps the delivery counters and the original
    /// `registered_at`, reactivates the bot and refreshes its heartbeat.
    pub fn register(
        &self,
        id: &str,
        capabilities: BTreeSet<Capability>,
        handler: Arc<dyn BotHandler>,
        now: DateTime<Utc>,
    ) -> Registered {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                let was_inactive = entry.registration.status == BotStatus::Inactive;
                entry.registration.capabilities = capabilities;
                entry.registration.status = BotStatus::Active;
                entry.registration.last_heartbeat = now;
                entry.handler = handler;
                Registered::Replaced { was_inactive }
            }
            None => {
                self.entries.insert(
                    id.to_string(),
                    RegistryEntry {
                        registration: BotRegistration::new(id, capabilities, now),
                        handler,
                    },
                );
                Registered::New
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<BotRegistration> {
        self.entries.get(id).map(|e| e.registration.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// All registrations, sorted by id.
    pub fn list(&self) -> Vec<BotRegistration> {
        let mut all: Vec<BotRegistration> =
            self.entries.iter().map(|e| e.registration.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Handler of `id`, only if the bot is registered and active.
    pub fn active_handler(&self, id: &str) -> Option<Arc<dyn BotHandler>> {
        self.entries
            .get(id)
            .filter(|e| e.registration.is_active())
            .map(|e| Arc::clone(&e.handler))
    }

    /// Ids of every active bot other than `exclude`, sorted.
    pub fn active_ids_except(&self, exclude: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.registration.is_active() && e.key() != exclude)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Active bots declaring `capability`, sorted.
    pub fn with_capability(&self, capability: Capability) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.registration.is_active() && e.registration.has_capability(capability))
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Refresh the heartbeat of `id`. Returns `false` for unknown bots.
    pub fn touch(&self, id: &str, now: DateTime<Utc>) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.registration.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Refresh the heartbeat of `id` and mark it active.
    ///
    /// Returns `Some(true)` when the bot was inactive before, `None` for
    /// unknown bots.
    pub fn reactivate(&self, id: &str, now: DateTime<Utc>) -> Option<bool> {
        let mut entry = self.entries.get_mut(id)?;
        let was_inactive = entry.registration.status == BotStatus::Inactive;
        entry.registration.last_heartbeat = now;
        entry.registration.status = BotStatus::Active;
        Some(was_inactive)
    }

    /// Mark `id` inactive. Returns `true` only on an active -> inactive transition.
    pub fn mark_inactive(&self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) if entry.registration.is_active() => {
                entry.registration.status = BotStatus::Inactive;
                true
            }
            _ => false,
        }
    }

    /// Active bots whose last heartbeat is older than `timeout` at `now`, sorted.
    pub fn stale_ids(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| {
                e.registration.is_active() && now - e.registration.last_heartbeat > timeout
            })
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn record_delivery(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.registration.message_count += 1;
        }
    }

    pub fn record_failure(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.registration.error_count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.registration.is_active())
            .count()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for BotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRegistry")
            .field("registered", &self.entries.len())
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NoopHandler;

    fn noop() -> Arc<dyn BotHandler> {
        Arc::new(NoopHandler)
    }

    fn caps(list: &[Capability]) -> BTreeSet<Capability> {
        list.iter().copied().collect()
    }

    #[test]
    fn register_new_bot_is_active() {
        let registry = BotRegistry::new();
        let now = Utc::now();
        assert_eq!(
            registry.register("a", caps(&[Capability::Search]), noop(), now),
            Registered::New
        );

        let reg = registry.get("a").unwrap();
        assert_eq!(reg.status, BotStatus::Active);
        assert_eq!(reg.last_heartbeat, now);
        assert!(registry.active_handler("a").is_some());
    }

    #[test]
    fn re_register_keeps_counters_and_reactivates() {
        let registry = BotRegistry::new();
        let t0 = Utc::now();
        registry.register("a", caps(&[Capability::Search]), noop(), t0);
        registry.record_delivery("a");
        registry.record_failure("a");
        registry.mark_inactive("a");

        let t1 = t0 + Duration::seconds(10);
        let outcome = registry.register("a", caps(&[Capability::Nlp]), noop(), t1);
        assert_eq!(outcome, Registered::Replaced { was_inactive: true });

        let reg = registry.get("a").unwrap();
        assert!(reg.is_active());
        assert_eq!(reg.message_count, 1);
        assert_eq!(reg.error_count, 1);
        assert_eq!(reg.registered_at, t0);
        assert_eq!(reg.last_heartbeat, t1);
        assert!(reg.has_capability(Capability::Nlp));
        assert!(!reg.has_capability(Capability::Search));
    }

    #[test]
    fn inactive_bots_have_no_active_handler_and_are_excluded() {
        let registry = BotRegistry::new();
        let now = Utc::now();
        registry.register("a", BTreeSet::new(), noop(), now);
        registry.register("b", BTreeSet::new(), noop(), now);
        registry.register("c", BTreeSet::new(), noop(), now);

        assert!(registry.mark_inactive("b"));
        assert!(!registry.mark_inactive("b"), "second transition is a no-op");

        assert!(registry.active_handler("b").is_none());
        assert_eq!(registry.active_ids_except("a"), vec!["c".to_string()]);
        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn stale_ids_respects_timeout_strictly() {
        let registry = BotRegistry::new();
        let t0 = Utc::now();
        registry.register("old", BTreeSet::new(), noop(), t0);
        registry.register("fresh", BTreeSet::new(), noop(), t0 + Duration::seconds(60));

        let timeout = Duration::seconds(120);
        assert!(registry.stale_ids(t0 + timeout, timeout).is_empty());
        assert_eq!(
            registry.stale_ids(t0 + timeout + Duration::seconds(1), timeout),
            vec!["old".to_string()]
        );
    }

    #[test]
    fn touch_and_reactivate() {
        let registry = BotRegistry::new();
        let t0 = Utc::now();
        registry.register("a", BTreeSet::new(), noop(), t0);
        registry.mark_inactive("a");

        let t1 = t0 + Duration::seconds(5);
        assert!(registry.touch("a", t1));
        let reg = registry.get("a").unwrap();
        assert_eq!(reg.last_heartbeat, t1);
        assert_eq!(reg.status, BotStatus::Inactive, "touch alone does not reactivate");

        assert_eq!(registry.reactivate("a", t1), Some(true));
        assert!(registry.get("a").unwrap().is_active());
        assert_eq!(registry.reactivate("ghost", t1), None);
        assert!(!registry.touch("ghost", t1));
    }

    #[test]
    fn with_capability_lists_active_matches() {
        let registry = BotRegistry::new();
        let now = Utc::now();
        registry.register("s1", caps(&[Capability::Search]), noop(), now);
        registry.register("s2", caps(&[Capability::Search, Capability::Nlp]), noop(), now);
        registry.register("m", caps(&[Capability::Monitoring]), noop(), now);
        registry.mark_inactive("s2");

        assert_eq!(registry.with_capability(Capability::Search), vec!["s1".to_string()]);
        assert!(registry.with_capability(Capability::Security).is_empty());
    }
}
