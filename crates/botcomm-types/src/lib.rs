//! Shared domain types for the bot communication protocol.
//!
//! This crate contains the message envelope, bot registration records,
//! bus configuration, observability events, and the error taxonomy used
//! across the workspace.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod bot;
pub mod config;
pub mod error;
pub mod event;
pub mod insights;
pub mod message;
