//! In-memory storage backend for testing.
//!
//! This backend stores all data in `BTreeMap`s behind a single `RwLock`. It
//! is not persistent — all data is lost when the process exits. Use this for
//! unit tests and integration tests where you need a real atomic store
//! without touching a network backend.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{AtomicStore, StorageError};

#[derive(Debug, Default)]
struct Inner {
    values: BTreeMap<String, Vec<u8>>,
    sets: BTreeMap<String, BTreeSet<String>>,
}

/// An in-memory atomic store backed by `BTreeMap`s.
///
/// Thread-safe and async-compatible. A single write lock per operation makes
/// every method trivially atomic. Data is sorted by key, which makes prefix
/// listing efficient via `BTreeMap::range`.
///
/// # Examples
///
/// ```
/// # use qvault_storage::{MemoryStore, AtomicStore};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.put("objects/a/meta", b"{}").await.unwrap();
/// assert!(store.exists("objects/a/meta").await.unwrap());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of live keys (plain and set), for test assertions.
    pub async fn key_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.values.len() + inner.sets.len()
    }
}

#[async_trait::async_trait]
impl AtomicStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.values.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        inner.values.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        if inner.values.contains_key(key) {
            return Ok(false);
        }
        inner.values.insert(key.to_owned(), value.to_vec());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        let had_value = inner.values.remove(key).is_some();
        let had_set = inner.sets.remove(key).is_some();
        Ok(had_value || had_set)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let inner = self.inner.read().await;
        let mut keys: Vec<String> = inner
            .values
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(
            inner
                .sets
                .range(prefix.to_owned()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone()),
        );
        keys.sort_unstable();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.values.contains_key(key) || inner.sets.contains_key(key))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .sets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.is_empty() {
            inner.sets.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.sets.get(key).cloned().unwrap_or_default())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.sets.get(key).is_some_and(|s| s.contains(member)))
    }
}
