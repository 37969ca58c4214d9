//! Application state shared by the CLI commands.
//!
//! Resolves the data directory, loads `config.toml`, and opens the state
//! store for whichever backend a command asks for.

use std::path::PathBuf;

use botcomm_core::history::{HISTORY_KEY, parse_snapshot};
use botcomm_core::storage::BoxStateStore;
use botcomm_infra::config::load_config;
use botcomm_infra::filesystem::resolve_data_dir;
use botcomm_infra::store::open_state_store;
use botcomm_types::config::{BotcommConfig, StoreBackend};
use botcomm_types::message::Envelope;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: BotcommConfig,
}

impl AppState {
    /// Resolve the data directory and load its configuration.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;
        let config = load_config(&data_dir).await;
        Ok(Self { data_dir, config })
    }

    /// `requested`, or the configured backend when none was given.
    pub fn backend(&self, requested: Option<StoreBackend>) -> StoreBackend {
        requested.unwrap_or(self.config.storage.backend)
    }

    pub async fn open_store(&self, backend: StoreBackend) -> anyhow::Result<BoxStateStore> {
        Ok(open_state_store(backend, &self.data_dir).await?)
    }

    /// Read the persisted history snapshot. An absent snapshot is empty.
    pub async fn load_history(&self, backend: StoreBackend) -> anyhow::Result<Vec<Envelope>> {
        let store = self.open_store(backend).await?;
        match store.get(HISTORY_KEY).await? {
            Some(raw) => Ok(parse_snapshot(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}
