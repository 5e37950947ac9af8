//! Persistent object directory.
//!
//! Maps string keys to object existence and user metadata inside the
//! `objects` namespace of one [`AtomicStore`]. The directory is a stateless
//! view over the store: no process-local cache can diverge from it.
//!
//! Every object carries a set of back-references to the indexes it belongs
//! to (see [`crate::index`]). The index member set is the authoritative side
//! of that relation: a back-reference without a matching member entry reads
//! as "not a member" and is dropped by [`ObjectDirectory::reconcile`].

use std::collections::BTreeSet;
use std::sync::Arc;

use qvault_storage::AtomicStore;
use tracing::{debug, warn};

use crate::error::DirectoryError;

/// Free-form per-object user metadata (ordered string → opaque value).
pub type Userdata = serde_json::Map<String, serde_json::Value>;

/// Existence policy for create operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePolicy {
    /// Fail with `Exists` if the key is already present.
    FailIfExists,
    /// Return the existing record untouched if the key is present.
    ReuseIfExists,
    /// Replace the stored userdata if the key is present.
    OverwriteIfExists,
}

/// A snapshot of one directory object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// The object's unique key within the directory namespace.
    pub key: String,
    /// The object's user metadata at read time.
    pub userdata: Userdata,
}

// Storage layout. Object and index keys must not contain '/' because the
// layout uses it as the namespace separator.
pub(crate) fn object_meta_key(key: &str) -> String {
    format!("objects/{key}/meta")
}

pub(crate) fn object_indexes_key(key: &str) -> String {
    format!("objects/{key}/indexes")
}

pub(crate) fn index_meta_key(key: &str) -> String {
    format!("indexes/{key}/meta")
}

pub(crate) fn index_members_key(key: &str) -> String {
    format!("indexes/{key}/members")
}

pub(crate) fn validate_key(key: &str) -> Result<(), DirectoryError> {
    if key.is_empty() {
        return Err(DirectoryError::InvalidKey {
            key: key.to_owned(),
            reason: "key must not be empty".to_owned(),
        });
    }
    if key.contains('/') {
        return Err(DirectoryError::InvalidKey {
            key: key.to_owned(),
            reason: "key must not contain '/'".to_owned(),
        });
    }
    Ok(())
}

/// Directory of persistent objects over one atomic store.
#[derive(Clone)]
pub struct ObjectDirectory {
    store: Arc<dyn AtomicStore>,
}

impl ObjectDirectory {
    /// Create a directory view over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn AtomicStore>) -> Self {
        Self { store }
    }

    /// Create an object.
    ///
    /// With `key: None` a fresh UUID v4 key is generated and guaranteed
    /// unused at creation time. With an explicit key, `policy` decides how an
    /// existing object is handled. Creation is atomic: of two concurrent
    /// `FailIfExists` creates on the same key, exactly one succeeds.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::Exists`] under `FailIfExists` when the key is
    ///   already present.
    /// - [`DirectoryError::InvalidKey`] for empty keys or keys containing `/`.
    /// - [`DirectoryError::Storage`] if the backend fails.
    pub async fn create(
        &self,
        key: Option<&str>,
        userdata: Userdata,
        policy: CreatePolicy,
    ) -> Result<ObjectRecord, DirectoryError> {
        let bytes = encode_userdata(&userdata)?;

        let Some(key) = key else {
            // Generated keys retry until an unused one is claimed. UUID v4
            // collisions are not expected in practice.
            loop {
                let key = uuid::Uuid::new_v4().to_string();
                if self.store.put_if_absent(&object_meta_key(&key), &bytes).await? {
                    debug!(key, "object created with generated key");
                    return Ok(ObjectRecord { key, userdata });
                }
            }
        };

        validate_key(key)?;
        let meta_key = object_meta_key(key);

        match policy {
            CreatePolicy::FailIfExists => {
                if !self.store.put_if_absent(&meta_key, &bytes).await? {
                    return Err(DirectoryError::Exists { key: key.to_owned() });
                }
            }
            CreatePolicy::ReuseIfExists => {
                if !self.store.put_if_absent(&meta_key, &bytes).await? {
                    return self.get(key).await;
                }
            }
            CreatePolicy::OverwriteIfExists => {
                self.store.put(&meta_key, &bytes).await?;
            }
        }

        debug!(key, "object created");
        Ok(ObjectRecord {
            key: key.to_owned(),
            userdata,
        })
    }

    /// Fetch an object by key.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the key is absent.
    pub async fn get(&self, key: &str) -> Result<ObjectRecord, DirectoryError> {
        let bytes = self
            .store
            .get(&object_meta_key(key))
            .await?
            .ok_or_else(|| DirectoryError::DoesNotExist { key: key.to_owned() })?;
        let userdata = decode_userdata(key, &bytes)?;
        Ok(ObjectRecord {
            key: key.to_owned(),
            userdata,
        })
    }

    /// Check whether an object exists. No side effects.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Storage`] if the backend fails.
    pub async fn exists(&self, key: &str) -> Result<bool, DirectoryError> {
        Ok(self.store.exists(&object_meta_key(key)).await?)
    }

    /// Replace an existing object's userdata.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the key is absent.
    pub async fn update(&self, key: &str, userdata: Userdata) -> Result<(), DirectoryError> {
        if !self.exists(key).await? {
            return Err(DirectoryError::DoesNotExist { key: key.to_owned() });
        }
        let bytes = encode_userdata(&userdata)?;
        self.store.put(&object_meta_key(key), &bytes).await?;
        Ok(())
    }

    /// Snapshot of all live object keys. No ordering guarantee beyond the
    /// store's; reflects some consistent store state at call time.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Storage`] if the backend fails.
    pub async fn list(&self) -> Result<Vec<String>, DirectoryError> {
        let keys = self.store.list("objects/").await?;
        Ok(keys
            .iter()
            .filter_map(|k| {
                k.strip_prefix("objects/")
                    .and_then(|rest| rest.strip_suffix("/meta"))
                    .map(str::to_owned)
            })
            .collect())
    }

    /// The set of index keys this object currently belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the object is absent.
    pub async fn index_memberships(&self, key: &str) -> Result<BTreeSet<String>, DirectoryError> {
        if !self.exists(key).await? {
            return Err(DirectoryError::DoesNotExist { key: key.to_owned() });
        }
        Ok(self.store.set_members(&object_indexes_key(key)).await?)
    }

    /// Destroy an object, removing it from every index it belongs to.
    ///
    /// Per index, the authoritative member entry is deleted before the
    /// object-side back-reference, so an interruption mid-cascade leaves at
    /// most back-references that read as "not a member" and are repairable
    /// via [`reconcile`](Self::reconcile).
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the object is absent.
    pub async fn destroy(&self, key: &str) -> Result<(), DirectoryError> {
        if !self.exists(key).await? {
            return Err(DirectoryError::DoesNotExist { key: key.to_owned() });
        }

        let memberships = self.store.set_members(&object_indexes_key(key)).await?;
        for index in &memberships {
            self.store.set_remove(&index_members_key(index), key).await?;
            self.store.set_remove(&object_indexes_key(key), index).await?;
        }

        self.store.delete(&object_indexes_key(key)).await?;
        self.store.delete(&object_meta_key(key)).await?;
        debug!(key, indexes = memberships.len(), "object destroyed");
        Ok(())
    }

    /// Repair pass over the bidirectional membership relation.
    ///
    /// Drops every object back-reference that the index side does not
    /// confirm (missing index, or member entry absent). Returns the number
    /// of dangling references removed. Intended to run after an interrupted
    /// destroy cascade.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Storage`] if the backend fails.
    pub async fn reconcile(&self) -> Result<u64, DirectoryError> {
        let mut repaired = 0u64;
        for key in self.list().await? {
            let backrefs = self.store.set_members(&object_indexes_key(&key)).await?;
            for index in backrefs {
                let confirmed = self.store.exists(&index_meta_key(&index)).await?
                    && self.store.set_contains(&index_members_key(&index), &key).await?;
                if !confirmed {
                    self.store.set_remove(&object_indexes_key(&key), &index).await?;
                    warn!(object = %key, index = %index, "dropped dangling index back-reference");
                    repaired += 1;
                }
            }
        }
        Ok(repaired)
    }
}

impl std::fmt::Debug for ObjectDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDirectory").finish_non_exhaustive()
    }
}

fn encode_userdata(userdata: &Userdata) -> Result<Vec<u8>, DirectoryError> {
    serde_json::to_vec(userdata).map_err(|e| DirectoryError::Corrupt {
        key: String::new(),
        reason: format!("userdata serialization failed: {e}"),
    })
}

fn decode_userdata(key: &str, bytes: &[u8]) -> Result<Userdata, DirectoryError> {
    serde_json::from_slice(bytes).map_err(|e| DirectoryError::Corrupt {
        key: key.to_owned(),
        reason: format!("userdata deserialization failed: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use qvault_storage::MemoryStore;

    fn directory() -> ObjectDirectory {
        ObjectDirectory::new(Arc::new(MemoryStore::new()))
    }

    fn userdata(pairs: &[(&str, &str)]) -> Userdata {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), serde_json::Value::String((*v).to_owned())))
            .collect()
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let dir = directory();
        let created = dir
            .create(Some("obj"), userdata(&[("a", "1")]), CreatePolicy::FailIfExists)
            .await
            .unwrap();
        assert_eq!(created.key, "obj");

        let fetched = dir.get("obj").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_missing_fails() {
        let dir = directory();
        let result = dir.get("nope").await;
        assert!(matches!(result, Err(DirectoryError::DoesNotExist { key }) if key == "nope"));
    }

    #[tokio::test]
    async fn create_fail_if_exists_rejects_duplicate() {
        let dir = directory();
        dir.create(Some("obj"), Userdata::new(), CreatePolicy::FailIfExists)
            .await
            .unwrap();
        let result = dir
            .create(Some("obj"), Userdata::new(), CreatePolicy::FailIfExists)
            .await;
        assert!(matches!(result, Err(DirectoryError::Exists { key }) if key == "obj"));
    }

    #[tokio::test]
    async fn create_reuse_returns_existing_userdata() {
        let dir = directory();
        dir.create(Some("obj"), userdata(&[("a", "old")]), CreatePolicy::FailIfExists)
            .await
            .unwrap();
        let record = dir
            .create(Some("obj"), userdata(&[("a", "new")]), CreatePolicy::ReuseIfExists)
            .await
            .unwrap();
        assert_eq!(record.userdata, userdata(&[("a", "old")]));
    }

    #[tokio::test]
    async fn create_overwrite_replaces_userdata() {
        let dir = directory();
        dir.create(Some("obj"), userdata(&[("a", "old")]), CreatePolicy::FailIfExists)
            .await
            .unwrap();
        dir.create(Some("obj"), userdata(&[("a", "new")]), CreatePolicy::OverwriteIfExists)
            .await
            .unwrap();
        let fetched = dir.get("obj").await.unwrap();
        assert_eq!(fetched.userdata, userdata(&[("a", "new")]));
    }

    #[tokio::test]
    async fn create_generates_fresh_key_when_omitted() {
        let dir = directory();
        let a = dir.create(None, Userdata::new(), CreatePolicy::FailIfExists).await.unwrap();
        let b = dir.create(None, Userdata::new(), CreatePolicy::FailIfExists).await.unwrap();
        assert_ne!(a.key, b.key);
        assert!(dir.exists(&a.key).await.unwrap());
        assert!(dir.exists(&b.key).await.unwrap());
    }

    #[tokio::test]
    async fn create_rejects_invalid_keys() {
        let dir = directory();
        let slash = dir.create(Some("a/b"), Userdata::new(), CreatePolicy::FailIfExists).await;
        assert!(matches!(slash, Err(DirectoryError::InvalidKey { .. })));
        let empty = dir.create(Some(""), Userdata::new(), CreatePolicy::FailIfExists).await;
        assert!(matches!(empty, Err(DirectoryError::InvalidKey { .. })));
    }

    #[tokio::test]
    async fn list_reflects_live_objects() {
        let dir = directory();
        assert!(dir.list().await.unwrap().is_empty());
        for i in 0..5 {
            dir.create(Some(&format!("obj-{i}")), Userdata::new(), CreatePolicy::FailIfExists)
                .await
                .unwrap();
        }
        let mut keys = dir.list().await.unwrap();
        keys.sort_unstable();
        assert_eq!(keys, vec!["obj-0", "obj-1", "obj-2", "obj-3", "obj-4"]);

        dir.destroy("obj-2").await.unwrap();
        assert_eq!(dir.list().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn destroyed_key_reports_absence() {
        let dir = directory();
        dir.create(Some("obj"), Userdata::new(), CreatePolicy::FailIfExists)
            .await
            .unwrap();
        dir.destroy("obj").await.unwrap();
        assert!(!dir.exists("obj").await.unwrap());
        assert!(matches!(dir.get("obj").await, Err(DirectoryError::DoesNotExist { .. })));
        assert!(matches!(dir.destroy("obj").await, Err(DirectoryError::DoesNotExist { .. })));
    }

    #[tokio::test]
    async fn update_requires_existing_object() {
        let dir = directory();
        let result = dir.update("nope", Userdata::new()).await;
        assert!(matches!(result, Err(DirectoryError::DoesNotExist { .. })));

        dir.create(Some("obj"), userdata(&[("a", "1")]), CreatePolicy::FailIfExists)
            .await
            .unwrap();
        dir.update("obj", userdata(&[("a", "2")])).await.unwrap();
        assert_eq!(dir.get("obj").await.unwrap().userdata, userdata(&[("a", "2")]));
    }
}
