//! Selection of the configured `StateStore` backend.

use std::path::Path;

use botcomm_core::storage::BoxStateStore;
use botcomm_types::config::StoreBackend;
use botcomm_types::error::RepositoryError;

use crate::filesystem::{JsonFileStateStore, state_dir};
use crate::sqlite::{DatabasePool, SqliteStateStore, pool::database_url};

/// Open the state store for `backend` under `data_dir`.
pub async fn open_state_store(
    backend: StoreBackend,
    data_dir: &Path,
) -> Result<BoxStateStore, RepositoryError> {
    match backend {
        StoreBackend::File => Ok(BoxStateStore::new(JsonFileStateStore::new(state_dir(data_dir)))),
        StoreBackend::Sqlite => {
            tokio::fs::create_dir_all(data_dir)
                .await
                .map_err(|e| RepositoryError::Io(format!("failed to create {}: {e}", data_dir.display())))?;
            let pool = DatabasePool::new(&database_url(data_dir)).await.map_err(|e| {
                tracing::warn!("failed to open state database: {e}");
                RepositoryError::Connection
            })?;
            Ok(BoxStateStore::new(SqliteStateStore::new(pool)))
        }
    }
}
