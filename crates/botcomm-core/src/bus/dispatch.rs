//! Queue draining and per-recipient delivery.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use botcomm_types::error::{DeliveryError, ProtocolError};
use botcomm_types::event::BusEvent;
use botcomm_types::message::{Envelope, MessageType};

use super::{ProtocolBus, lock, panic_message};
use crate::message::{BotHandler, envelope};

/// Resets the drain flag when the drain pass ends, including by unwinding.
struct DrainGuard<'a>(&'a ProtocolBus);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.draining.store(false, Ordering::Release);
    }
}

impl ProtocolBus {
    /// Route queued envelopes until the queue is empty.
    ///
    /// Envelopes enqueued by handlers during the pass are routed in the same
    /// pass. A call made while another drain is running returns 0 at once.
    /// Returns the number of envelopes routed.
    pub fn drain(&self) -> usize {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }
        let _guard = DrainGuard(self);

        let mut routed = 0;
        loop {
            let next = lock(&self.queue).pop();
            let Some(envelope) = next else { break };
            self.route(&envelope);
            routed += 1;
        }
        if routed > 0 {
            tracing::debug!(routed, "drain pass complete");
        }
        routed
    }

    fn route(&self, envelope: &Envelope) {
        if envelope.is_broadcast() {
            self.route_broadcast(envelope);
        } else if envelope.is_protocol() {
            self.handle_protocol(envelope);
        } else {
            self.route_unicast(envelope);
        }
    }

    fn route_broadcast(&self, envelope: &Envelope) {
        let recipients = self.registry.active_ids_except(&envelope.from);
        tracing::debug!(
            id = %envelope.id,
            from = %envelope.from,
            recipients = recipients.len(),
            "routing broadcast"
        );
        for recipient in &recipients {
            if let Some(handler) = self.registry.active_handler(recipient) {
                self.deliver(recipient, handler, envelope);
            }
        }

        let callbacks = lock(&self.subscriptions).matching_except(&envelope.from, envelope.message_type);
        for (subscriber, callback) in callbacks {
            self.fire_subscription(&subscriber, envelope, |e| callback(e));
        }
    }

    fn route_unicast(&self, envelope: &Envelope) {
        let recipient = envelope.to.as_str();

        match self.registry.active_handler(recipient) {
            Some(handler) => self.deliver(recipient, handler, envelope),
            None => {
                let reason = if self.registry.contains(recipient) {
                    "inactive"
                } else {
                    "not_registered"
                };
                let err = ProtocolError::RecipientUnavailable(recipient.to_string());
                tracing::debug!(id = %envelope.id, reason, "{err}, envelope dropped");
                self.events.publish(BusEvent::MessageDropped {
                    envelope_id: envelope.id.clone(),
                    recipient: recipient.to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        if envelope.message_type == MessageType::Response {
            self.resolve_response(envelope);
        }

        let callbacks = lock(&self.subscriptions).matching(recipient, envelope.message_type);
        for callback in callbacks {
            self.fire_subscription(recipient, envelope, |e| callback(e));
        }
    }

    /// Invoke `handler` for one recipient and account for the outcome.
    ///
    /// Envelopes sent by the bus itself are not counted in the recipient's
    /// message counter. A failed delivery of an `ERROR` envelope, or of a
    /// bus-originated one, is logged without reporting it back.
    pub(super) fn deliver(&self, recipient: &str, handler: Arc<dyn BotHandler>, envelope: &Envelope) {
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle_message(self, envelope)))
            .unwrap_or_else(|payload| {
                Err(DeliveryError::new(format!(
                    "handler panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        match outcome {
            Ok(()) => {
                if !envelope.is_protocol_origin() {
                    self.registry.record_delivery(recipient);
                }
                self.events.publish(BusEvent::MessageDelivered {
                    recipient: recipient.to_string(),
                    envelope: envelope.clone(),
                });
            }
            Err(source) => {
                self.registry.record_failure(recipient);
                let message = source.to_string();
                let err = ProtocolError::Delivery {
                    recipient: recipient.to_string(),
                    source,
                };
                tracing::warn!(id = %envelope.id, message_type = %envelope.message_type, "{err}");
                self.events.publish(BusEvent::DeliveryFailed {
                    envelope_id: envelope.id.clone(),
                    recipient: recipient.to_string(),
                    error: message.clone(),
                });

                if envelope.message_type == MessageType::Error || envelope.is_protocol_origin() {
                    return;
                }
                if let Err(e) = self.send(envelope::delivery_error(envelope, recipient, &message)) {
                    tracing::warn!(id = %envelope.id, "failed to report delivery error: {e}");
                }
            }
        }
    }

    fn fire_subscription(&self, subscriber: &str, envelope: &Envelope, callback: impl Fn(&Envelope)) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(envelope))) {
            tracing::warn!(
                subscriber,
                id = %envelope.id,
                "subscription callback panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}
