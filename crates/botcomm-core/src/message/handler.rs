//! Handler contract for registered bots.
//!
//! Every registered bot supplies a `BotHandler`; the router calls it once per
//! envelope addressed to the bot. Handlers run on the drain task and must not
//! block: long-running work belongs on a spawned task.

use std::sync::Arc;

use botcomm_types::error::DeliveryError;
use botcomm_types::message::Envelope;

use crate::bus::ProtocolBus;

/// Receives envelopes routed to a bot.
///
/// The bus is passed in so handlers can reply (`respond`), send follow-up
/// messages, or manage subscriptions from inside the callback. Returning an
/// error (or panicking) counts as a failed delivery: the bot's error counter
/// is bumped and the sender receives an `ERROR` envelope.
pub trait BotHandler: Send + Sync {
    fn handle_message(&self, bus: &ProtocolBus, envelope: &Envelope) -> Result<(), DeliveryError>;
}

impl<F> BotHandler for F
where
    F: Fn(&ProtocolBus, &Envelope) -> Result<(), DeliveryError> + Send + Sync,
{
    fn handle_message(&self, bus: &ProtocolBus, envelope: &Envelope) -> Result<(), DeliveryError> {
        self(bus, envelope)
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn BotHandler>
where
    F: Fn(&ProtocolBus, &Envelope) -> Result<(), DeliveryError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handler that accepts and ignores every envelope.
pub struct NoopHandler;

impl BotHandler for NoopHandler {
    fn handle_message(&self, _bus: &ProtocolBus, _envelope: &Envelope) -> Result<(), DeliveryError> {
        Ok(())
    }
}
