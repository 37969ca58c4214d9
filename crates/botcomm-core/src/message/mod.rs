//! Message model plumbing: envelope construction, the handler contract, and
//! the pending-message queue.
//!
//! - `envelope` -- validation and helper constructors for `EnvelopeInput`
//! - `handler` -- `BotHandler` trait implemented by registered bots
//! - `queue` -- FIFO (optionally priority-ordered) buffer drained by the bus

pub mod envelope;
pub mod handler;
pub mod queue;

pub use handler::{BotHandler, NoopHandler, handler_fn};
pub use queue::MessageQueue;
