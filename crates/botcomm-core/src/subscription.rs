//! Subscription table: push callbacks keyed by subscriber and message type.
//!
//! Two kinds of entries share the table:
//! - persistent subscriptions, fired for every matching envelope until
//!   removed with `unsubscribe`
//! - correlated one-shot subscriptions created by `request`, consumed by the
//!   first `RESPONSE` carrying their correlation id or by expiry

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use botcomm_types::error::ProtocolError;
use botcomm_types::insights::SubscriptionInfo;
use botcomm_types::message::{Envelope, MessageType};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Callback of a persistent subscription.
pub type SubscriptionCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Callback of a pending request: the response payload, or the reason no
/// response will arrive.
pub type ResponseCallback = Box<dyn FnOnce(Result<serde_json::Value, ProtocolError>) + Send>;

enum Kind {
    Persistent {
        types: Vec<MessageType>,
        callback: SubscriptionCallback,
    },
    Correlated {
        correlation_id: String,
        callback: ResponseCallback,
        deadline: Option<DateTime<Utc>>,
        timeout: Option<Duration>,
    },
}

struct Subscription {
    subscriber: String,
    kind: Kind,
}

/// A pending request removed because its deadline passed.
pub struct ExpiredRequest {
    pub correlation_id: String,
    pub requester: String,
    pub timeout: Duration,
    pub callback: ResponseCallback,
}

/// Subscriptions keyed by time-sortable subscription id.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: BTreeMap<String, Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a persistent subscription for `subscriber` on `types`.
    pub fn subscribe(
        &mut self,
        subscriber: &str,
        types: Vec<MessageType>,
        callback: SubscriptionCallback,
    ) -> String {
        let id = Uuid::now_v7().to_string();
        self.entries.insert(
            id.clone(),
            Subscription {
                subscriber: subscriber.to_string(),
                kind: Kind::Persistent { types, callback },
            },
        );
        id
    }

    /// Remove `types` from every persistent subscription of `subscriber`.
    ///
    /// Entries left without any type are dropped. Returns how many entries
    /// were dropped.
    pub fn unsubscribe(&mut self, subscriber: &str, types: &[MessageType]) -> usize {
        let mut emptied = Vec::new();
        for (id, sub) in self.entries.iter_mut() {
            if sub.subscriber != subscriber {
                continue;
            }
            if let Kind::Persistent { types: subscribed, .. } = &mut sub.kind {
                subscribed.retain(|t| !types.contains(t));
                if subscribed.is_empty() {
                    emptied.push(id.clone());
                }
            }
        }
        for id in &emptied {
            self.entries.remove(id);
        }
        emptied.len()
    }

    /// Register a one-shot wait for the `RESPONSE` correlated to `correlation_id`.
    pub fn await_response(
        &mut self,
        requester: &str,
        correlation_id: &str,
        callback: ResponseCallback,
        timeout: Option<(Duration, DateTime<Utc>)>,
    ) -> String {
        let id = Uuid::now_v7().to_string();
        self.entries.insert(
            id.clone(),
            Subscription {
                subscriber: requester.to_string(),
                kind: Kind::Correlated {
                    correlation_id: correlation_id.to_string(),
                    callback,
                    deadline: timeout.map(|(_, deadline)| deadline),
                    timeout: timeout.map(|(timeout, _)| timeout),
                },
            },
        );
        id
    }

    /// Persistent callbacks of `subscriber` matching `message_type`.
    pub fn matching(&self, subscriber: &str, message_type: MessageType) -> Vec<SubscriptionCallback> {
        self.entries
            .values()
            .filter(|s| s.subscriber == subscriber)
            .filter_map(|s| match &s.kind {
                Kind::Persistent { types, callback } if types.contains(&message_type) => {
                    Some(Arc::clone(callback))
                }
                _ => None,
            })
            .collect()
    }

    /// Persistent callbacks of every subscriber except `exclude` matching
    /// `message_type`, for broadcast fan-out.
    pub fn matching_except(
        &self,
        exclude: &str,
        message_type: MessageType,
    ) -> Vec<(String, SubscriptionCallback)> {
        self.entries
            .values()
            .filter(|s| s.subscriber != exclude)
            .filter_map(|s| match &s.kind {
                Kind::Persistent { types, callback } if types.contains(&message_type) => {
                    Some((s.subscriber.clone(), Arc::clone(callback)))
                }
                _ => None,
            })
            .collect()
    }

    /// Remove and return the pending callback of `requester` for `correlation_id`.
    pub fn take_response(&mut self, requester: &str, correlation_id: &str) -> Option<ResponseCallback> {
        let id = self.entries.iter().find_map(|(id, s)| match &s.kind {
            Kind::Correlated { correlation_id: c, .. }
                if c == correlation_id && s.subscriber == requester =>
            {
                Some(id.clone())
            }
            _ => None,
        })?;
        match self.entries.remove(&id)?.kind {
            Kind::Correlated { callback, .. } => Some(callback),
            Kind::Persistent { .. } => None,
        }
    }

    /// Drop a pending request without invoking its callback.
    pub fn cancel(&mut self, correlation_id: &str) -> bool {
        let id = self.entries.iter().find_map(|(id, s)| match &s.kind {
            Kind::Correlated { correlation_id: c, .. } if c == correlation_id => Some(id.clone()),
            _ => None,
        });
        match id {
            Some(id) => self.entries.remove(&id).is_some(),
            None => false,
        }
    }

    /// Remove every pending request whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: DateTime<Utc>) -> Vec<ExpiredRequest> {
        let expired_ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, s)| {
                matches!(&s.kind, Kind::Correlated { deadline: Some(d), .. } if *d <= now)
            })
            .map(|(id, _)| id.clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| {
                let sub = self.entries.remove(&id)?;
                match sub.kind {
                    Kind::Correlated {
                        correlation_id,
                        callback,
                        timeout,
                        ..
                    } => Some(ExpiredRequest {
                        correlation_id,
                        requester: sub.subscriber,
                        timeout: timeout.unwrap_or_default(),
                        callback,
                    }),
                    Kind::Persistent { .. } => None,
                }
            })
            .collect()
    }

    /// Remove every pending request, returning their callbacks.
    pub fn drain_pending(&mut self) -> Vec<(String, ResponseCallback)> {
        let pending_ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, s)| matches!(s.kind, Kind::Correlated { .. }))
            .map(|(id, _)| id.clone())
            .collect();

        pending_ids
            .into_iter()
            .filter_map(|id| match self.entries.remove(&id)?.kind {
                Kind::Correlated {
                    correlation_id,
                    callback,
                    ..
                } => Some((correlation_id, callback)),
                Kind::Persistent { .. } => None,
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|s| matches!(s.kind, Kind::Correlated { .. }))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn infos(&self) -> Vec<SubscriptionInfo> {
        self.entries
            .iter()
            .map(|(id, s)| match &s.kind {
                Kind::Persistent { types, .. } => SubscriptionInfo {
                    subscription_id: id.clone(),
                    subscriber: s.subscriber.clone(),
                    types: types.clone(),
                    correlation_id: None,
                },
                Kind::Correlated { correlation_id, .. } => SubscriptionInfo {
                    subscription_id: id.clone(),
                    subscriber: s.subscriber.clone(),
                    types: vec![MessageType::Response],
                    correlation_id: Some(correlation_id.clone()),
                },
            })
            .collect()
    }
}

impl std::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("entries", &self.entries.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn noop_callback() -> SubscriptionCallback {
        Arc::new(|_| {})
    }

    fn recording_response() -> (ResponseCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: ResponseCallback = Box::new(move |result| {
            let label = match result {
                Ok(v) => v.to_string(),
                Err(e) => e.to_string(),
            };
            sink.lock().unwrap().push(label);
        });
        (cb, seen)
    }

    #[test]
    fn matching_filters_by_subscriber_and_type() {
        let mut table = SubscriptionTable::new();
        table.subscribe("a", vec![MessageType::Notification], noop_callback());
        table.subscribe("a", vec![MessageType::Error, MessageType::Notification], noop_callback());
        table.subscribe("b", vec![MessageType::Notification], noop_callback());

        assert_eq!(table.matching("a", MessageType::Notification).len(), 2);
        assert_eq!(table.matching("a", MessageType::Error).len(), 1);
        assert_eq!(table.matching("a", MessageType::Heartbeat).len(), 0);
        assert_eq!(table.matching_except("a", MessageType::Notification).len(), 1);
    }

    #[test]
    fn unsubscribe_removes_types_and_drops_empty_entries() {
        let mut table = SubscriptionTable::new();
        table.subscribe("a", vec![MessageType::Notification], noop_callback());
        table.subscribe("a", vec![MessageType::Error, MessageType::Notification], noop_callback());

        let dropped = table.unsubscribe("a", &[MessageType::Notification]);
        assert_eq!(dropped, 1);
        assert_eq!(table.len(), 1);
        assert!(table.matching("a", MessageType::Notification).is_empty());
        assert_eq!(table.matching("a", MessageType::Error).len(), 1);
    }

    #[test]
    fn take_response_is_one_shot_and_scoped_to_requester() {
        let mut table = SubscriptionTable::new();
        let (cb, seen) = recording_response();
        table.await_response("a", "corr-1", cb, None);

        assert!(table.take_response("b", "corr-1").is_none(), "other requester");
        assert!(table.take_response("a", "corr-2").is_none(), "other correlation");

        let cb = table.take_response("a", "corr-1").expect("pending callback");
        cb(Ok(serde_json::json!({"value": 42})));
        assert!(table.take_response("a", "corr-1").is_none());
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn take_expired_only_returns_past_deadlines() {
        let mut table = SubscriptionTable::new();
        let now = Utc::now();
        let (cb1, _) = recording_response();
        let (cb2, _) = recording_response();
        let (cb3, _) = recording_response();
        table.await_response(
            "a",
            "soon",
            cb1,
            Some((Duration::from_secs(1), now + chrono::Duration::seconds(1))),
        );
        table.await_response(
            "a",
            "later",
            cb2,
            Some((Duration::from_secs(60), now + chrono::Duration::seconds(60))),
        );
        table.await_response("a", "never", cb3, None);

        let expired = table.take_expired(now + chrono::Duration::seconds(2));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].correlation_id, "soon");
        assert_eq!(expired[0].timeout, Duration::from_secs(1));
        assert_eq!(table.pending_count(), 2);
    }

    #[test]
    fn cancel_and_infos() {
        let mut table = SubscriptionTable::new();
        let (cb, seen) = recording_response();
        table.await_response("a", "corr-1", cb, None);
        table.subscribe("b", vec![MessageType::Heartbeat], noop_callback());

        let infos = table.infos();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().any(|i| i.correlation_id.as_deref() == Some("corr-1")));

        assert!(table.cancel("corr-1"));
        assert!(!table.cancel("corr-1"));
        assert!(seen.lock().unwrap().is_empty(), "cancel does not fire the callback");
        assert_eq!(table.len(), 1);
    }
}
