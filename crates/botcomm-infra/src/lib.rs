//! Infrastructure layer for the bot communication bus.
//!
//! Contains implementations of the `StateStore` port defined in
//! `botcomm-core` (SQLite and JSON files on disk), plus configuration
//! loading and data directory resolution.

pub mod config;
pub mod filesystem;
pub mod sqlite;
pub mod store;
