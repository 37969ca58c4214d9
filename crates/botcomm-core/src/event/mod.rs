//! Host event surface.
//!
//! Provides an `EventBus` that distributes `BusEvent` records to passive
//! listeners (CLI, metrics, tests) via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
