//! Key-value state store trait and its object-safe wrapper.
//!
//! Follows the blanket-impl pattern used for dynamic dispatch elsewhere:
//! 1. `StateStore` uses native async fn in traits (RPITIT)
//! 2. `StateStoreDyn` is the object-safe twin with boxed futures
//! 3. `BoxStateStore` wraps `Arc<dyn StateStoreDyn>` so the bus stays non-generic

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use botcomm_types::error::RepositoryError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Durable string key-value storage.
///
/// Implementations live in botcomm-infra.
pub trait StateStore: Send + Sync {
    /// Get the value stored under `key`. Returns None if the key does not exist.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, RepositoryError>> + Send;

    /// Store `value` under `key`, overwriting any previous value.
    fn put(
        &self,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Object-safe version of [`StateStore`] with boxed futures.
pub trait StateStoreDyn: Send + Sync {
    fn get_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, RepositoryError>> + Send + 'a>>;

    fn put_boxed<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>>;
}

impl<T: StateStore> StateStoreDyn for T {
    fn get_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, RepositoryError>> + Send + 'a>> {
        Box::pin(self.get(key))
    }

    fn put_boxed<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(self.put(key, value))
    }
}

/// Type-erased state store, cheap to clone.
#[derive(Clone)]
pub struct BoxStateStore {
    inner: Arc<dyn StateStoreDyn>,
}

impl BoxStateStore {
    pub fn new<T: StateStore + 'static>(store: T) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        self.inner.get_boxed(key).await
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        self.inner.put_boxed(key, value).await
    }
}

impl std::fmt::Debug for BoxStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStateStore").finish_non_exhaustive()
    }
}

/// Volatile store backed by a concurrent map.
///
/// Clones share the same map, so a test can keep a handle to inspect what
/// the bus wrote.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    values: Arc<DashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write time of `key`, if present.
    pub fn updated_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.values.get(key).map(|v| v.1)
    }
}

impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.values.get(key).map(|v| v.0.clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        self.values
            .insert(key.to_string(), (value.to_string(), Utc::now()));
        Ok(())
    }
}
