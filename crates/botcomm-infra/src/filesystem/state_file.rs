//! JSON file state store.
//!
//! Each key is stored as `{dir}/{key}.json`. Writes go to a temporary file
//! in the same directory which is then renamed over the target, so readers
//! never observe a half-written snapshot.

use std::path::{Path, PathBuf};

use botcomm_core::storage::StateStore;
use botcomm_types::error::RepositoryError;
use uuid::Uuid;

/// File-backed implementation of `StateStore`.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    dir: PathBuf,
}

impl JsonFileStateStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, RepositoryError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(RepositoryError::Io(format!("invalid state key: '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StateStore for JsonFileStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RepositoryError::Io(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RepositoryError::Io(format!("failed to create {}: {e}", self.dir.display())))?;

        let tmp = self.dir.join(format!(".{key}.{}.tmp", Uuid::now_v7()));
        if let Err(e) = tokio::fs::write(&tmp, value).await {
            return Err(RepositoryError::Io(format!("failed to write {}: {e}", tmp.display())));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(RepositoryError::Io(format!(
                "failed to replace {}: {e}",
                path.display()
            )));
        }

        tracing::debug!(key, path = %path.display(), bytes = value.len(), "state written");
        Ok(())
    }
}
