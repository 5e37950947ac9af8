//! Storage backend abstraction for `QVault`.
//!
//! This crate defines the [`AtomicStore`] trait — a key-value-and-set storage
//! interface that knows nothing about collections, secrets, or tokens. The
//! directory and index layers in `qvault-core` are built entirely on the
//! atomic primitives declared here: they never hold their own locks, so
//! consistency across concurrent requests is exactly as strong as the
//! backend's per-operation atomicity.
//!
//! One implementation is provided: [`MemoryStore`], an in-memory backend used
//! for tests and development. Production deployments supply their own
//! implementation over a backend with equivalent per-operation atomicity,
//! such as Redis.

mod error;
mod memory;

use std::collections::BTreeSet;

pub use error::StorageError;
pub use memory::MemoryStore;

/// A pluggable atomic key-value and set store.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g.
/// `objects/9f61.../meta`). Plain values are opaque byte arrays; set values
/// hold string members.
///
/// Every method is individually atomic: concurrent callers observe each
/// operation either fully applied or not at all. No multi-key transaction is
/// offered — callers that need cross-key consistency must sequence their
/// updates so a crash between operations leaves a recoverable state.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait AtomicStore: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Store a key-value pair only if the key is currently absent.
    ///
    /// Returns `true` if the value was written, `false` if the key already
    /// existed (in which case the stored value is untouched). This is the
    /// atomic create primitive: two concurrent calls on the same key resolve
    /// so that exactly one returns `true`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StorageError>;

    /// Delete a key (plain or set). Returns `true` if the key existed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// List all keys (plain and set) that start with the given prefix.
    ///
    /// Returns keys only, not values. The result is a snapshot of some
    /// consistent store state at the time of the call.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](AtomicStore::get) and checks
    /// for `Some`. Backends may override this with a more efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Add a member to the set stored at `key`, creating the set if absent.
    ///
    /// Returns `true` if the member was newly added, `false` if it was
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// Remove a member from the set stored at `key`.
    ///
    /// Returns `true` if the member was present. Removing from a missing set
    /// or a missing member is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// Return the members of the set stored at `key`.
    ///
    /// A missing set reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, StorageError>;

    /// Check whether `member` is in the set stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StorageError>;
}
