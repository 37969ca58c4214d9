//! Configuration types for the protocol bus.
//!
//! `BotcommConfig` represents the top-level `config.toml`; the bus settings
//! live under its `[bus]` table.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration file.
///
/// Loaded from `~/.botcomm/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotcommConfig {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where the history snapshot is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per key under `{data_dir}/state/`.
    #[default]
    File,
    /// `protocol_state` table in `{data_dir}/botcomm.db`.
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::File => "file",
            StoreBackend::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(StoreBackend::File),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(format!("unknown store backend: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

/// Timers, bounds and behavior switches of a `ProtocolBus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Version string stamped on every envelope.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Period of the queue drain task.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Period of the heartbeat broadcast and liveness check.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Maximum gap since a bot's last heartbeat before it is marked inactive.
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,

    /// Period of the history snapshot task.
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,

    /// In-memory history bound.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Number of most recent history entries written to the snapshot.
    #[serde(default = "default_persisted_history")]
    pub persisted_history: usize,

    /// Pop higher-priority envelopes first within a drain. Off by default:
    /// delivery is strictly FIFO and priority is informational.
    #[serde(default)]
    pub priority_ordering: bool,

    /// Timeout applied to `request` calls that do not pass one explicitly.
    #[serde(default)]
    pub default_request_timeout_secs: Option<u64>,
}

/// Longest period or timeout accepted for any bus timer (one year).
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

fn default_protocol_version() -> String {
    "1.0.0".to_string()
}

fn default_drain_interval_ms() -> u64 {
    100
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_liveness_timeout_secs() -> u64 {
    120
}

fn default_persist_interval_secs() -> u64 {
    60
}

fn default_history_capacity() -> usize {
    1000
}

fn default_persisted_history() -> usize {
    100
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            drain_interval_ms: default_drain_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            persist_interval_secs: default_persist_interval_secs(),
            history_capacity: default_history_capacity(),
            persisted_history: default_persisted_history(),
            priority_ordering: false,
            default_request_timeout_secs: None,
        }
    }
}

impl BusConfig {
    /// Clamp out-of-range values to usable ones.
    ///
    /// Zero intervals and capacities fall back to their defaults, timers are
    /// capped at [`MAX_INTERVAL_SECS`], and the persisted window never
    /// exceeds the in-memory bound.
    pub fn validated(mut self) -> Self {
        if self.drain_interval_ms == 0 {
            self.drain_interval_ms = default_drain_interval_ms();
        }
        if self.heartbeat_interval_secs == 0 {
            self.heartbeat_interval_secs = default_heartbeat_interval_secs();
        }
        if self.liveness_timeout_secs == 0 {
            self.liveness_timeout_secs = default_liveness_timeout_secs();
        }
        if self.persist_interval_secs == 0 {
            self.persist_interval_secs = default_persist_interval_secs();
        }
        self.drain_interval_ms = self.drain_interval_ms.min(MAX_INTERVAL_SECS * 1000);
        self.heartbeat_interval_secs = self.heartbeat_interval_secs.min(MAX_INTERVAL_SECS);
        self.liveness_timeout_secs = self.liveness_timeout_secs.min(MAX_INTERVAL_SECS);
        self.persist_interval_secs = self.persist_interval_secs.min(MAX_INTERVAL_SECS);
        self.default_request_timeout_secs = self
            .default_request_timeout_secs
            .map(|secs| secs.min(MAX_INTERVAL_SECS));
        if self.history_capacity == 0 {
            self.history_capacity = default_history_capacity();
        }
        if self.persisted_history > self.history_capacity {
            self.persisted_history = self.history_capacity;
        }
        if self.protocol_version.trim().is_empty() {
            self.protocol_version = default_protocol_version();
        }
        self
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    pub fn default_request_timeout(&self) -> Option<Duration> {
        self.default_request_timeout_secs.map(Duration::from_secs)
    }
}
