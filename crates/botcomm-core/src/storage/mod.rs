//! Durable state port.
//!
//! The bus persists its history snapshot through `StateStore`, a minimal
//! string key-value interface. Implementations live in botcomm-infra; an
//! in-memory store is provided here for tests and ephemeral buses.

pub mod kv_store;

pub use kv_store::{BoxStateStore, InMemoryStateStore, StateStore};
