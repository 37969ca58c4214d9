//! SQLite state store implementation.
//!
//! Implements `StateStore` from `botcomm-core` on the `protocol_state`
//! table. Values are opaque text; the bus stores its history snapshot as a
//! JSON array.

use botcomm_core::storage::StateStore;
use botcomm_types::error::RepositoryError;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `StateStore`.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: DatabasePool,
}

impl SqliteStateStore {
    /// Create a new state store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Last write time of `key`, if present.
    pub async fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let row = sqlx::query("SELECT updated_at FROM protocol_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("updated_at")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                parse_datetime(&raw).map(Some)
            }
            None => Ok(None),
        }
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT key FROM protocol_state ORDER BY key")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get("key")
                    .map_err(|e| RepositoryError::Query(e.to_string()))
            })
            .collect()
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM protocol_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let value: String = row
                    .try_get("value")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO protocol_state (key, value, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::database_url;

    async fn test_store() -> (SqliteStateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();
        (SqliteStateStore::new(pool), dir)
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_none() {
        let (store, _dir) = test_store().await;
        assert!(store.get("protocol_history").await.unwrap().is_none());
        assert!(store.updated_at("protocol_history").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _dir) = test_store().await;
        let snapshot = serde_json::json!([{"id": "m-1"}]).to_string();

        store.put("protocol_history", &snapshot).await.unwrap();
        assert_eq!(
            store.get("protocol_history").await.unwrap(),
            Some(snapshot)
        );
        assert!(store.updated_at("protocol_history").await.unwrap().unwrap() <= Utc::now());
    }

    #[tokio::test]
    async fn test_put_upserts() {
        let (store, _dir) = test_store().await;
        store.put("k", "1").await.unwrap();
        store.put("k", "2").await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.keys().await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let (store, _dir) = test_store().await;
        store.put("beta", "b").await.unwrap();
        store.put("alpha", "a").await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["alpha", "beta"]);
    }
}
