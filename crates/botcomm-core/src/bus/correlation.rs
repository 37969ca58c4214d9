//! Request/response correlation.
//!
//! `request` registers a one-shot wait keyed by the requester and a fresh
//! correlation id, then sends the `REQUEST`. The first `RESPONSE` routed to
//! the requester with that id resolves the wait; later duplicates find
//! nothing to resolve. Waits with a deadline are expired by the drain task.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use botcomm_types::error::ProtocolError;
use botcomm_types::event::BusEvent;
use botcomm_types::message::Envelope;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{ProtocolBus, lock, panic_message};
use crate::message::envelope;
use crate::subscription::ResponseCallback;

impl ProtocolBus {
    /// Send a `REQUEST` for `data_type` and call `on_result` once with the
    /// response payload. Returns the correlation id.
    ///
    /// Uses the configured default request timeout, if any.
    pub fn request<F>(
        &self,
        from: &str,
        to: &str,
        data_type: &str,
        on_result: F,
    ) -> Result<String, ProtocolError>
    where
        F: FnOnce(Result<Value, ProtocolError>) + Send + 'static,
    {
        self.request_with_timeout(
            from,
            to,
            data_type,
            Value::Null,
            self.config.default_request_timeout(),
            on_result,
        )
    }

    /// Like [`request`](Self::request) with extra `params` merged into the
    /// payload and an explicit timeout. With `timeout = None`, or a timeout
    /// too large to place on the calendar, the wait lasts until a response
    /// arrives or the request is cancelled.
    pub fn request_with_timeout<F>(
        &self,
        from: &str,
        to: &str,
        data_type: &str,
        params: Value,
        timeout: Option<Duration>,
        on_result: F,
    ) -> Result<String, ProtocolError>
    where
        F: FnOnce(Result<Value, ProtocolError>) + Send + 'static,
    {
        let correlation_id = Uuid::now_v7().to_string();
        let input = envelope::request(from, to, &correlation_id, data_type, params);
        let deadline = timeout.and_then(|t| {
            let at = chrono::Duration::from_std(t)
                .ok()
                .and_then(|delta| Utc::now().checked_add_signed(delta));
            if at.is_none() {
                tracing::warn!(?t, correlation_id = %correlation_id, "request timeout out of range, waiting without deadline");
            }
            at.map(|at| (t, at))
        });

        lock(&self.subscriptions).await_response(
            from,
            &correlation_id,
            Box::new(on_result),
            deadline,
        );
        if let Err(e) = self.send(input) {
            lock(&self.subscriptions).cancel(&correlation_id);
            return Err(e);
        }

        tracing::debug!(from, to, data_type, correlation_id = %correlation_id, ?timeout, "request sent");
        Ok(correlation_id)
    }

    /// Drop a pending request without invoking its callback.
    pub fn cancel_request(&self, correlation_id: &str) -> bool {
        let cancelled = lock(&self.subscriptions).cancel(correlation_id);
        if cancelled {
            tracing::debug!(correlation_id, "request cancelled");
        }
        cancelled
    }

    /// Send the `RESPONSE` to `original` back to its sender, echoing the
    /// correlation id and data type. Returns the response id.
    pub fn respond(&self, original: &Envelope, payload: Value) -> Result<String, ProtocolError> {
        self.send(envelope::response(original, payload))
    }

    /// Fail every pending request whose deadline is at or before `now`.
    /// Returns the number of expired requests.
    pub fn expire_requests_at(&self, now: DateTime<Utc>) -> usize {
        let expired = lock(&self.subscriptions).take_expired(now);
        let count = expired.len();
        for request in expired {
            tracing::warn!(
                correlation_id = %request.correlation_id,
                requester = %request.requester,
                timeout = ?request.timeout,
                "request timed out"
            );
            self.events.publish(BusEvent::RequestTimedOut {
                correlation_id: request.correlation_id.clone(),
                requester: request.requester.clone(),
            });
            let err = ProtocolError::RequestTimeout {
                correlation_id: request.correlation_id.clone(),
                timeout: request.timeout,
            };
            invoke_response(&request.correlation_id, request.callback, Err(err));
        }
        count
    }

    /// Resolve the pending request matching a routed `RESPONSE`, if any.
    pub(super) fn resolve_response(&self, envelope: &Envelope) {
        let Some(correlation_id) = envelope.correlation_id() else {
            return;
        };
        let pending = lock(&self.subscriptions).take_response(&envelope.to, correlation_id);
        match pending {
            Some(callback) => {
                let payload = envelope.data.get("payload").cloned().unwrap_or(Value::Null);
                invoke_response(correlation_id, callback, Ok(payload));
            }
            None => {
                tracing::debug!(correlation_id, to = %envelope.to, "no pending request for response");
            }
        }
    }
}

fn invoke_response(
    correlation_id: &str,
    callback: ResponseCallback,
    result: Result<Value, ProtocolError>,
) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || callback(result))) {
        tracing::warn!(
            correlation_id,
            "response callback panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use botcomm_types::error::DeliveryError;
    use botcomm_types::message::{EnvelopeInput, MessageType};
    use serde_json::json;

    use super::super::test_support::*;
    use super::*;
    use crate::message::{BotHandler, handler_fn};

    type Results = Arc<Mutex<Vec<Result<Value, String>>>>;

    fn collector() -> (Results, impl FnOnce(Result<Value, ProtocolError>) + Send + 'static) {
        let results: Results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        let callback = move |r: Result<Value, ProtocolError>| {
            sink.lock().unwrap().push(r.map_err(|e| e.to_string()));
        };
        (results, callback)
    }

    /// Bot answering every `REQUEST` with `{value: 42}`, keeping the request.
    fn responder(seen: Arc<Mutex<Vec<Envelope>>>) -> Arc<dyn BotHandler> {
        handler_fn(move |bus, envelope| {
            if envelope.message_type != MessageType::Request {
                return Ok(());
            }
            seen.lock().unwrap().push(envelope.clone());
            bus.respond(envelope, json!({"value": 42}))
                .map(|_| ())
                .map_err(|e| DeliveryError::new(e.to_string()))
        })
    }

    #[test]
    fn request_respond_fires_once_and_ignores_stale_duplicate() {
        let bus = bus();
        let (a, _) = recorder();
        let requests = Arc::new(Mutex::new(Vec::new()));
        bus.register("A", [], a).unwrap();
        bus.register("B", [], responder(Arc::clone(&requests))).unwrap();

        let (results, callback) = collector();
        let correlation_id = bus.request("A", "B", "metrics", callback).unwrap();
        bus.drain();

        let received = requests.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].correlation_id(), Some(correlation_id.as_str()));
        assert_eq!(received[0].data_type(), Some("metrics"));
        assert_eq!(*results.lock().unwrap(), vec![Ok(json!({"value": 42}))]);

        bus.respond(&received[0], json!({"value": 43})).unwrap();
        bus.drain();
        assert_eq!(results.lock().unwrap().len(), 1, "duplicate ignored");
        assert_eq!(bus.insights().pending_requests, 0);
    }

    #[test]
    fn response_with_other_correlation_does_not_resolve() {
        let bus = bus();
        let (results, callback) = collector();
        bus.request("A", "B", "metrics", callback).unwrap();

        let unrelated = envelope::build(
            envelope::request("A", "B", "other-corr", "metrics", Value::Null),
            "1.0.0",
        )
        .unwrap();
        bus.respond(&unrelated, json!({"value": 1})).unwrap();
        bus.drain();

        assert!(results.lock().unwrap().is_empty());
        assert_eq!(bus.insights().pending_requests, 1);
    }

    #[test]
    fn response_for_other_requester_does_not_resolve() {
        let bus = bus();
        let (results, callback) = collector();
        let correlation_id = bus.request("A", "B", "metrics", callback).unwrap();

        bus.send(
            EnvelopeInput::new(MessageType::Response, "B", "C")
                .with_data(json!({"correlationId": correlation_id, "payload": 1})),
        )
        .unwrap();
        bus.drain();
        assert!(results.lock().unwrap().is_empty());
    }

    #[test]
    fn expired_request_fails_once_with_timeout() {
        let bus = bus();
        let mut events = bus.subscribe_events();
        let (results, callback) = collector();
        let correlation_id = bus
            .request_with_timeout(
                "A",
                "B",
                "metrics",
                Value::Null,
                Some(Duration::from_secs(5)),
                callback,
            )
            .unwrap();

        let now = Utc::now();
        assert_eq!(bus.expire_requests_at(now), 0);
        assert_eq!(bus.expire_requests_at(now + chrono::Duration::seconds(6)), 1);
        assert_eq!(bus.expire_requests_at(now + chrono::Duration::seconds(60)), 0);

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().unwrap_err();
        assert!(err.contains("timed out"), "{err}");
        assert!(err.contains(&correlation_id));

        let timed_out = std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| matches!(e, BusEvent::RequestTimedOut { .. }));
        assert!(timed_out);
    }

    #[test]
    fn out_of_range_timeout_waits_without_deadline() {
        let bus = bus();
        let (results, callback) = collector();
        let correlation_id = bus
            .request_with_timeout(
                "A",
                "B",
                "metrics",
                Value::Null,
                Some(Duration::from_secs(10_000_000_000_000)),
                callback,
            )
            .unwrap();

        assert_eq!(bus.insights().pending_requests, 1);
        assert_eq!(bus.expire_requests_at(Utc::now() + chrono::Duration::weeks(520)), 0);
        assert!(bus.cancel_request(&correlation_id));
        assert!(results.lock().unwrap().is_empty());
    }

    #[test]
    fn largest_configured_timeout_still_expires() {
        use crate::storage::{BoxStateStore, InMemoryStateStore};
        use botcomm_types::config::{BusConfig, MAX_INTERVAL_SECS};

        let config = BusConfig {
            default_request_timeout_secs: Some(u64::MAX),
            ..BusConfig::default()
        };
        let bus = ProtocolBus::new(config, BoxStateStore::new(InMemoryStateStore::new()));
        let (results, callback) = collector();
        bus.request("A", "B", "metrics", callback).unwrap();

        let past_cap = Utc::now() + chrono::Duration::seconds(MAX_INTERVAL_SECS as i64 + 60);
        assert_eq!(bus.expire_requests_at(past_cap), 1);
        assert_eq!(results.lock().unwrap().len(), 1);
    }

    #[test]
    fn default_timeout_comes_from_config() {
        use crate::storage::{BoxStateStore, InMemoryStateStore};
        use botcomm_types::config::BusConfig;

        let config = BusConfig {
            default_request_timeout_secs: Some(1),
            ..BusConfig::default()
        };
        let bus = ProtocolBus::new(config, BoxStateStore::new(InMemoryStateStore::new()));
        let (results, callback) = collector();
        bus.request("A", "B", "metrics", callback).unwrap();

        assert_eq!(bus.expire_requests_at(Utc::now() + chrono::Duration::seconds(2)), 1);
        assert_eq!(results.lock().unwrap().len(), 1);
    }

    #[test]
    fn cancel_request_never_fires() {
        let bus = bus();
        let (results, callback) = collector();
        let correlation_id = bus
            .request_with_timeout("A", "B", "metrics", Value::Null, Some(Duration::from_secs(1)), callback)
            .unwrap();

        assert!(bus.cancel_request(&correlation_id));
        assert!(!bus.cancel_request(&correlation_id));
        assert_eq!(bus.expire_requests_at(Utc::now() + chrono::Duration::seconds(10)), 0);
        assert!(results.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_request_leaves_no_pending_entry() {
        let bus = bus();
        let (_, callback) = collector();
        let err = bus.request("", "B", "metrics", callback).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
        assert_eq!(bus.insights().pending_requests, 0);
        assert_eq!(bus.queue_depth(), 0);
    }
}
