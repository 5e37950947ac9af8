//! Secondary indexes over directory objects.
//!
//! An index is a named set of object keys with an enforced bidirectional
//! relation: `object ∈ index.members ⟺ index ∈ object.indexes`. Indexes do
//! not own their members — objects and indexes are created and destroyed
//! independently, and either side's destroy cascades cleanup to the other.
//!
//! The store only guarantees atomicity per key, so the two sides of the
//! relation are written in a fixed order. The index member set is
//! authoritative: `add` writes the object back-reference first and the
//! member entry second, while `remove`/`destroy` delete the member entry
//! first. A crash between the two writes therefore leaves at most a
//! back-reference without a member entry, which reads as "not a member" and
//! is cleaned up by [`ObjectDirectory::reconcile`](crate::ObjectDirectory::reconcile).

use std::collections::BTreeSet;
use std::sync::Arc;

use qvault_storage::AtomicStore;
use tracing::debug;

use crate::directory::{
    CreatePolicy, index_members_key, index_meta_key, object_indexes_key, object_meta_key,
    validate_key,
};
use crate::error::DirectoryError;

/// Marker value stored at an index's meta key. Existence of the key is what
/// matters; the value is reserved for future metadata.
const INDEX_MARKER: &[u8] = b"{}";

/// Directory of secondary indexes over one atomic store.
#[derive(Clone)]
pub struct IndexDirectory {
    store: Arc<dyn AtomicStore>,
}

impl IndexDirectory {
    /// Create an index directory view over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn AtomicStore>) -> Self {
        Self { store }
    }

    /// Create an index. Same key and policy semantics as
    /// [`ObjectDirectory::create`](crate::ObjectDirectory::create); a `None`
    /// key generates a fresh UUID v4. Returns the index key.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Exists`] under `FailIfExists` when the key
    /// is already present.
    pub async fn create(
        &self,
        key: Option<&str>,
        policy: CreatePolicy,
    ) -> Result<String, DirectoryError> {
        let Some(key) = key else {
            loop {
                let key = uuid::Uuid::new_v4().to_string();
                if self.store.put_if_absent(&index_meta_key(&key), INDEX_MARKER).await? {
                    return Ok(key);
                }
            }
        };

        validate_key(key)?;
        let meta_key = index_meta_key(key);

        match policy {
            CreatePolicy::FailIfExists => {
                if !self.store.put_if_absent(&meta_key, INDEX_MARKER).await? {
                    return Err(DirectoryError::Exists { key: key.to_owned() });
                }
            }
            CreatePolicy::ReuseIfExists => {
                self.store.put_if_absent(&meta_key, INDEX_MARKER).await?;
            }
            CreatePolicy::OverwriteIfExists => {
                self.store.put(&meta_key, INDEX_MARKER).await?;
            }
        }

        debug!(key, "index created");
        Ok(key.to_owned())
    }

    /// Fetch an index key, verifying existence.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the index is absent.
    pub async fn get(&self, key: &str) -> Result<String, DirectoryError> {
        if !self.exists(key).await? {
            return Err(DirectoryError::DoesNotExist { key: key.to_owned() });
        }
        Ok(key.to_owned())
    }

    /// Check whether an index exists. No side effects.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Storage`] if the backend fails.
    pub async fn exists(&self, key: &str) -> Result<bool, DirectoryError> {
        Ok(self.store.exists(&index_meta_key(key)).await?)
    }

    /// Add an object to an index.
    ///
    /// Idempotent: adding an existing member is a no-op. Both the index and
    /// the object must exist.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if either side is absent.
    pub async fn add(&self, index: &str, object: &str) -> Result<(), DirectoryError> {
        self.require(index).await?;
        if !self.store.exists(&object_meta_key(object)).await? {
            return Err(DirectoryError::DoesNotExist { key: object.to_owned() });
        }

        // Back-reference first, authoritative member entry second.
        self.store.set_add(&object_indexes_key(object), index).await?;
        self.store.set_add(&index_members_key(index), object).await?;
        Ok(())
    }

    /// Remove an object from an index. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the index is absent.
    pub async fn remove(&self, index: &str, object: &str) -> Result<(), DirectoryError> {
        self.require(index).await?;

        // Authoritative member entry first, back-reference second.
        self.store.set_remove(&index_members_key(index), object).await?;
        self.store.set_remove(&object_indexes_key(object), index).await?;
        Ok(())
    }

    /// Whether the object is a member of the index (authoritative side).
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the index is absent.
    pub async fn is_member(&self, index: &str, object: &str) -> Result<bool, DirectoryError> {
        self.require(index).await?;
        Ok(self.store.set_contains(&index_members_key(index), object).await?)
    }

    /// The index's current member-key set.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the index is absent.
    pub async fn members(&self, index: &str) -> Result<BTreeSet<String>, DirectoryError> {
        self.require(index).await?;
        Ok(self.store.set_members(&index_members_key(index)).await?)
    }

    /// Destroy an index, removing its key from every member's back-reference
    /// set.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the index is absent.
    pub async fn destroy(&self, index: &str) -> Result<(), DirectoryError> {
        self.require(index).await?;

        let members = self.store.set_members(&index_members_key(index)).await?;
        for object in &members {
            self.store.set_remove(&index_members_key(index), object).await?;
            self.store.set_remove(&object_indexes_key(object), index).await?;
        }

        self.store.delete(&index_members_key(index)).await?;
        self.store.delete(&index_meta_key(index)).await?;
        debug!(key = index, members = members.len(), "index destroyed");
        Ok(())
    }

    async fn require(&self, index: &str) -> Result<(), DirectoryError> {
        if self.exists(index).await? {
            Ok(())
        } else {
            Err(DirectoryError::DoesNotExist { key: index.to_owned() })
        }
    }
}

impl std::fmt::Debug for IndexDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDirectory").finish_non_exhaustive()
    }
}
