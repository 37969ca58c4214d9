//! In-process bot communication bus.
//!
//! Bots register with a [`ProtocolBus`](bus::ProtocolBus), exchange typed
//! envelopes through a periodically drained queue, are tracked for liveness
//! via heartbeats, and can correlate requests with responses. Dispatched
//! envelopes are kept in a bounded history that is snapshotted to a
//! [`StateStore`](storage::StateStore) port; concrete stores live in
//! `botcomm-infra`.

pub mod bus;
pub mod event;
pub mod history;
pub mod message;
pub mod registry;
pub mod storage;
pub mod subscription;

pub use bus::ProtocolBus;
