//! Collection and secret domain layer.
//!
//! A collection is a directory object carrying its access-control
//! configuration (which AC servers guard it and how many endorsements are
//! needed) plus free-form user metadata. Each collection owns a secrets
//! index; a secret is a directory object that is a member of exactly one
//! collection's index. Parentage is decided by the index (the authoritative
//! side of membership), not by the secret's stored document.
//!
//! Secrets are versioned. Every write appends a version and advances the
//! latest pointer; the read path exposes only the latest version, the
//! history stays in the stored document.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use qvault_storage::AtomicStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::{CreatePolicy, ObjectDirectory, Userdata};
use crate::error::{CollectionError, DirectoryError};
use crate::index::IndexDirectory;
use crate::sigkey::ServerId;

/// Registry index holding every collection key.
const COLLECTIONS_INDEX: &str = "collections";

fn secrets_index_key(collection: &str) -> String {
    format!("{collection}.secrets")
}

// Secrets live in the shared object namespace under a composite key. The
// collection prefix keeps same-named secrets in different collections from
// colliding; it is never parsed back out. Unambiguous because domain keys
// reject ':'.
fn secret_object_key(collection: &str, secret: &str) -> String {
    format!("{collection}:{secret}")
}

/// Stored document for a collection object.
#[derive(Debug, Serialize, Deserialize)]
struct CollectionDoc {
    kind: String,
    ac_servers: Vec<ServerId>,
    ac_required: usize,
    userdata: Userdata,
}

/// Stored document for a secret object.
#[derive(Debug, Serialize, Deserialize)]
struct SecretDoc {
    kind: String,
    collection: String,
    latest: u64,
    versions: Vec<SecretVersion>,
    userdata: Userdata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecretVersion {
    version: u64,
    data: String,
    created_at: DateTime<Utc>,
}

const KIND_COLLECTION: &str = "collection";
const KIND_SECRET: &str = "secret";

fn has_kind(userdata: &Userdata, kind: &str) -> bool {
    userdata.get("kind").and_then(|v| v.as_str()) == Some(kind)
}

// Collection and secret keys additionally reject ':', which the composite
// secret object key reserves as its separator. Without this, collection
// `a` / secret `b:c` and collection `a:b` / secret `c` would collide on the
// same object key.
fn validate_domain_key(key: &str) -> Result<(), DirectoryError> {
    if key.contains(':') {
        return Err(DirectoryError::InvalidKey {
            key: key.to_owned(),
            reason: "key must not contain ':'".to_owned(),
        });
    }
    Ok(())
}

/// A collection with its access-control configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRecord {
    pub key: String,
    pub userdata: Userdata,
    /// AC servers eligible to endorse operations on this collection.
    pub ac_servers: Vec<ServerId>,
    /// Distinct endorsements required.
    pub ac_required: usize,
}

/// The latest version of a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub key: String,
    pub collection: String,
    /// Opaque payload of the latest version.
    pub data: String,
    pub userdata: Userdata,
    /// Version number of the exposed payload, starting at 1.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

/// Collection and secret operations composed over the directory and index
/// layers.
#[derive(Debug, Clone)]
pub struct CollectionStore {
    directory: ObjectDirectory,
    indexes: IndexDirectory,
}

impl CollectionStore {
    /// Open the store over a backend, creating the collection registry
    /// index if it is not present.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::Directory`] if the backend fails.
    pub async fn open(store: Arc<dyn AtomicStore>) -> Result<Self, CollectionError> {
        let directory = ObjectDirectory::new(Arc::clone(&store));
        let indexes = IndexDirectory::new(store);
        indexes
            .create(Some(COLLECTIONS_INDEX), CreatePolicy::ReuseIfExists)
            .await?;
        Ok(Self { directory, indexes })
    }

    /// Create a collection.
    ///
    /// `ac_required` defaults to the full server list. A `None` key
    /// generates a fresh one.
    ///
    /// # Errors
    ///
    /// - [`CollectionError::InvalidConfig`] if `ac_servers` is empty or
    ///   `ac_required` is outside `1..=len(ac_servers)`.
    /// - [`DirectoryError::Exists`] if the key is already taken.
    pub async fn create_collection(
        &self,
        key: Option<&str>,
        userdata: Userdata,
        ac_servers: Vec<ServerId>,
        ac_required: Option<usize>,
    ) -> Result<CollectionRecord, CollectionError> {
        if let Some(key) = key {
            validate_domain_key(key)?;
        }
        if ac_servers.is_empty() {
            return Err(CollectionError::InvalidConfig {
                reason: "at least one AC server is required".to_owned(),
            });
        }
        let ac_required = ac_required.unwrap_or(ac_servers.len());
        if ac_required == 0 || ac_required > ac_servers.len() {
            return Err(CollectionError::InvalidConfig {
                reason: format!(
                    "ac_required {ac_required} outside 1..={}",
                    ac_servers.len()
                ),
            });
        }

        let doc = CollectionDoc {
            kind: KIND_COLLECTION.to_owned(),
            ac_servers: ac_servers.clone(),
            ac_required,
            userdata: userdata.clone(),
        };
        let record = self
            .directory
            .create(key, encode_doc(&doc)?, CreatePolicy::FailIfExists)
            .await?;
        let key = record.key;

        self.indexes
            .create(Some(&secrets_index_key(&key)), CreatePolicy::FailIfExists)
            .await?;
        self.indexes.add(COLLECTIONS_INDEX, &key).await?;

        debug!(collection = %key, servers = ac_servers.len(), ac_required, "collection created");
        Ok(CollectionRecord { key, userdata, ac_servers, ac_required })
    }

    /// Fetch a collection.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the key is absent or not
    /// a collection.
    pub async fn get_collection(&self, key: &str) -> Result<CollectionRecord, CollectionError> {
        let record = self.directory.get(key).await?;
        // Check the kind tag before decoding the full document: a key
        // holding some other object kind reads as "no such collection",
        // while a document that claims to be a collection but fails to
        // decode is corrupt.
        if !has_kind(&record.userdata, KIND_COLLECTION) {
            return Err(DirectoryError::DoesNotExist { key: key.to_owned() }.into());
        }
        let doc: CollectionDoc = decode_doc(key, &record.userdata)?;
        Ok(CollectionRecord {
            key: key.to_owned(),
            userdata: doc.userdata,
            ac_servers: doc.ac_servers,
            ac_required: doc.ac_required,
        })
    }

    /// All live collection keys, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::Directory`] if the backend fails.
    pub async fn list_collections(&self) -> Result<Vec<String>, CollectionError> {
        let members = self.indexes.members(COLLECTIONS_INDEX).await?;
        Ok(members.into_iter().collect())
    }

    /// Destroy a collection and everything it contains: each secret, the
    /// secrets index, then the collection object itself.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the collection is absent.
    pub async fn destroy_collection(&self, key: &str) -> Result<(), CollectionError> {
        // Fails early for missing or non-collection keys.
        self.get_collection(key).await?;

        let secrets_index = secrets_index_key(key);
        let secrets = self.indexes.members(&secrets_index).await?;
        for object_key in &secrets {
            self.directory.destroy(object_key).await?;
        }
        self.indexes.destroy(&secrets_index).await?;
        self.directory.destroy(key).await?;

        debug!(collection = %key, secrets = secrets.len(), "collection destroyed");
        Ok(())
    }

    /// Create a secret in a collection with its first version.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::DoesNotExist`] if the collection is absent.
    /// - [`DirectoryError::Exists`] if the secret key is taken.
    pub async fn create_secret(
        &self,
        collection: &str,
        key: Option<&str>,
        data: &str,
        userdata: Userdata,
    ) -> Result<SecretRecord, CollectionError> {
        self.get_collection(collection).await?;

        let secret_key = match key {
            Some(key) => {
                validate_domain_key(key)?;
                key.to_owned()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        let created_at = Utc::now();
        let doc = SecretDoc {
            kind: KIND_SECRET.to_owned(),
            collection: collection.to_owned(),
            latest: 1,
            versions: vec![SecretVersion {
                version: 1,
                data: data.to_owned(),
                created_at,
            }],
            userdata: userdata.clone(),
        };

        let object_key = secret_object_key(collection, &secret_key);
        match self
            .directory
            .create(Some(&object_key), encode_doc(&doc)?, CreatePolicy::FailIfExists)
            .await
        {
            Ok(_) => {}
            // Surface the caller-facing key, not the composite one.
            Err(DirectoryError::Exists { .. }) => {
                return Err(DirectoryError::Exists { key: secret_key }.into());
            }
            Err(err) => return Err(err.into()),
        }
        self.indexes.add(&secrets_index_key(collection), &object_key).await?;

        debug!(collection, secret = %secret_key, "secret created");
        Ok(SecretRecord {
            key: secret_key,
            collection: collection.to_owned(),
            data: data.to_owned(),
            userdata,
            version: 1,
            created_at,
        })
    }

    /// Append a new version to an existing secret and advance the latest
    /// pointer.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the secret is absent
    /// from the collection.
    pub async fn update_secret(
        &self,
        collection: &str,
        secret: &str,
        data: &str,
    ) -> Result<SecretRecord, CollectionError> {
        let object_key = self.require_secret(collection, secret).await?;
        let record = self.directory.get(&object_key).await?;
        let mut doc: SecretDoc = decode_doc(&object_key, &record.userdata)?;

        let version = doc.latest + 1;
        let created_at = Utc::now();
        doc.versions.push(SecretVersion {
            version,
            data: data.to_owned(),
            created_at,
        });
        doc.latest = version;
        let userdata = doc.userdata.clone();
        self.directory.update(&object_key, encode_doc(&doc)?).await?;

        debug!(collection, secret, version, "secret version appended");
        Ok(SecretRecord {
            key: secret.to_owned(),
            collection: collection.to_owned(),
            data: data.to_owned(),
            userdata,
            version,
            created_at,
        })
    }

    /// Fetch the latest version of a secret.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the secret is absent
    /// from the collection, or [`DirectoryError::Corrupt`] if the stored
    /// document's latest pointer matches no version.
    pub async fn get_secret_latest(
        &self,
        collection: &str,
        secret: &str,
    ) -> Result<SecretRecord, CollectionError> {
        let object_key = self.require_secret(collection, secret).await?;
        let record = self.directory.get(&object_key).await?;
        let doc: SecretDoc = decode_doc(&object_key, &record.userdata)?;

        let latest = doc
            .versions
            .iter()
            .find(|v| v.version == doc.latest)
            .ok_or_else(|| DirectoryError::Corrupt {
                key: object_key.clone(),
                reason: format!("latest pointer {} matches no stored version", doc.latest),
            })?;

        Ok(SecretRecord {
            key: secret.to_owned(),
            collection: collection.to_owned(),
            data: latest.data.clone(),
            userdata: doc.userdata,
            version: latest.version,
            created_at: latest.created_at,
        })
    }

    /// Destroy a secret. The directory cascade removes it from the
    /// collection's secrets index.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the secret is absent
    /// from the collection.
    pub async fn destroy_secret(&self, collection: &str, secret: &str) -> Result<(), CollectionError> {
        let object_key = self.require_secret(collection, secret).await?;
        self.directory.destroy(&object_key).await?;
        debug!(collection, secret, "secret destroyed");
        Ok(())
    }

    /// All secret keys in a collection, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DoesNotExist`] if the collection is absent.
    pub async fn list_secrets(&self, collection: &str) -> Result<Vec<String>, CollectionError> {
        self.get_collection(collection).await?;
        let members = self.indexes.members(&secrets_index_key(collection)).await?;
        let prefix = secret_object_key(collection, "");
        Ok(members
            .iter()
            .filter_map(|m| m.strip_prefix(&prefix).map(str::to_owned))
            .collect())
    }

    /// Resolve a secret's object key, requiring index membership. The index
    /// is the authoritative side, so a secret whose member entry is gone
    /// reads as absent even if the object still exists.
    async fn require_secret(
        &self,
        collection: &str,
        secret: &str,
    ) -> Result<String, CollectionError> {
        let object_key = secret_object_key(collection, secret);
        if self
            .indexes
            .is_member(&secrets_index_key(collection), &object_key)
            .await?
        {
            Ok(object_key)
        } else {
            Err(DirectoryError::DoesNotExist { key: secret.to_owned() }.into())
        }
    }
}

fn encode_doc<T: Serialize>(doc: &T) -> Result<Userdata, CollectionError> {
    match serde_json::to_value(doc) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) | Err(_) => Err(CollectionError::InvalidConfig {
            reason: "document did not serialize to an object".to_owned(),
        }),
    }
}

fn decode_doc<T: for<'de> Deserialize<'de>>(
    key: &str,
    userdata: &Userdata,
) -> Result<T, CollectionError> {
    serde_json::from_value(serde_json::Value::Object(userdata.clone())).map_err(|e| {
        DirectoryError::Corrupt {
            key: key.to_owned(),
            reason: format!("document decode: {e}"),
        }
        .into()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use qvault_storage::MemoryStore;

    async fn store() -> CollectionStore {
        CollectionStore::open(Arc::new(MemoryStore::new())).await.unwrap()
    }

    fn servers(ids: &[&str]) -> Vec<ServerId> {
        ids.iter().map(|id| ServerId::from(*id)).collect()
    }

    fn userdata(pairs: &[(&str, &str)]) -> Userdata {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), serde_json::Value::String((*v).to_owned())))
            .collect()
    }

    #[tokio::test]
    async fn collection_roundtrip() {
        let cs = store().await;
        let created = cs
            .create_collection(
                Some("col"),
                userdata(&[("owner", "ops")]),
                servers(&["ac1", "ac2", "ac3"]),
                Some(2),
            )
            .await
            .unwrap();
        assert_eq!(created.ac_required, 2);

        let fetched = cs.get_collection("col").await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(cs.list_collections().await.unwrap(), vec!["col"]);
    }

    #[tokio::test]
    async fn ac_required_defaults_to_full_list() {
        let cs = store().await;
        let created = cs
            .create_collection(Some("col"), Userdata::new(), servers(&["ac1", "ac2"]), None)
            .await
            .unwrap();
        assert_eq!(created.ac_required, 2);
    }

    #[tokio::test]
    async fn invalid_ac_config_is_rejected() {
        let cs = store().await;

        let empty = cs
            .create_collection(Some("a"), Userdata::new(), vec![], None)
            .await;
        assert!(matches!(empty, Err(CollectionError::InvalidConfig { .. })));

        let too_high = cs
            .create_collection(Some("b"), Userdata::new(), servers(&["ac1"]), Some(2))
            .await;
        assert!(matches!(too_high, Err(CollectionError::InvalidConfig { .. })));

        let zero = cs
            .create_collection(Some("c"), Userdata::new(), servers(&["ac1"]), Some(0))
            .await;
        assert!(matches!(zero, Err(CollectionError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn duplicate_collection_fails() {
        let cs = store().await;
        cs.create_collection(Some("col"), Userdata::new(), servers(&["ac1"]), None)
            .await
            .unwrap();
        let dup = cs
            .create_collection(Some("col"), Userdata::new(), servers(&["ac1"]), None)
            .await;
        assert!(matches!(
            dup,
            Err(CollectionError::Directory(DirectoryError::Exists { .. }))
        ));
    }

    #[tokio::test]
    async fn secret_lifecycle() {
        let cs = store().await;
        cs.create_collection(Some("col"), Userdata::new(), servers(&["ac1"]), None)
            .await
            .unwrap();

        let created = cs
            .create_secret("col", Some("db-pass"), "hunter2", userdata(&[("env", "prod")]))
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let fetched = cs.get_secret_latest("col", "db-pass").await.unwrap();
        assert_eq!(fetched.data, "hunter2");
        assert_eq!(fetched.userdata, userdata(&[("env", "prod")]));
        assert_eq!(cs.list_secrets("col").await.unwrap(), vec!["db-pass"]);

        cs.destroy_secret("col", "db-pass").await.unwrap();
        assert!(matches!(
            cs.get_secret_latest("col", "db-pass").await,
            Err(CollectionError::Directory(DirectoryError::DoesNotExist { .. }))
        ));
        assert!(cs.list_secrets("col").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_appends_versions_and_read_exposes_latest() {
        let cs = store().await;
        cs.create_collection(Some("col"), Userdata::new(), servers(&["ac1"]), None)
            .await
            .unwrap();
        cs.create_secret("col", Some("s"), "v1", Userdata::new()).await.unwrap();

        let second = cs.update_secret("col", "s", "v2").await.unwrap();
        assert_eq!(second.version, 2);
        let third = cs.update_secret("col", "s", "v3").await.unwrap();
        assert_eq!(third.version, 3);

        let latest = cs.get_secret_latest("col", "s").await.unwrap();
        assert_eq!(latest.data, "v3");
        assert_eq!(latest.version, 3);
    }

    #[tokio::test]
    async fn same_secret_key_in_two_collections() {
        let cs = store().await;
        for col in ["a", "b"] {
            cs.create_collection(Some(col), Userdata::new(), servers(&["ac1"]), None)
                .await
                .unwrap();
        }
        cs.create_secret("a", Some("shared"), "from-a", Userdata::new()).await.unwrap();
        cs.create_secret("b", Some("shared"), "from-b", Userdata::new()).await.unwrap();

        assert_eq!(cs.get_secret_latest("a", "shared").await.unwrap().data, "from-a");
        assert_eq!(cs.get_secret_latest("b", "shared").await.unwrap().data, "from-b");
    }

    #[tokio::test]
    async fn secret_in_missing_collection_fails() {
        let cs = store().await;
        let result = cs.create_secret("nope", Some("s"), "x", Userdata::new()).await;
        assert!(matches!(
            result,
            Err(CollectionError::Directory(DirectoryError::DoesNotExist { .. }))
        ));
    }

    #[tokio::test]
    async fn destroy_collection_cascades() {
        let cs = store().await;
        cs.create_collection(Some("col"), Userdata::new(), servers(&["ac1"]), None)
            .await
            .unwrap();
        for i in 0..3 {
            cs.create_secret("col", Some(&format!("s{i}")), "x", Userdata::new())
                .await
                .unwrap();
        }

        cs.destroy_collection("col").await.unwrap();
        assert!(matches!(
            cs.get_collection("col").await,
            Err(CollectionError::Directory(DirectoryError::DoesNotExist { .. }))
        ));
        assert!(cs.list_collections().await.unwrap().is_empty());

        // The key is reusable afterwards, with a clean secrets index.
        cs.create_collection(Some("col"), Userdata::new(), servers(&["ac1"]), None)
            .await
            .unwrap();
        assert!(cs.list_secrets("col").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn generated_secret_keys_are_distinct() {
        let cs = store().await;
        cs.create_collection(Some("col"), Userdata::new(), servers(&["ac1"]), None)
            .await
            .unwrap();
        let a = cs.create_secret("col", None, "x", Userdata::new()).await.unwrap();
        let b = cs.create_secret("col", None, "x", Userdata::new()).await.unwrap();
        assert_ne!(a.key, b.key);
        assert_eq!(cs.list_secrets("col").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn secret_key_is_not_a_collection() {
        let cs = store().await;
        cs.create_collection(Some("col"), Userdata::new(), servers(&["ac1"]), None)
            .await
            .unwrap();
        cs.create_secret("col", Some("s"), "x", Userdata::new()).await.unwrap();

        // The secret's object key exists in the directory, but collection
        // lookups must report absence, not a corrupt document.
        let result = cs.get_collection("col:s").await;
        assert!(matches!(
            result,
            Err(CollectionError::Directory(DirectoryError::DoesNotExist { .. }))
        ));
        let destroyed = cs.destroy_collection("col:s").await;
        assert!(matches!(
            destroyed,
            Err(CollectionError::Directory(DirectoryError::DoesNotExist { .. }))
        ));
    }

    #[tokio::test]
    async fn keys_containing_colon_are_rejected() {
        let cs = store().await;

        let col = cs
            .create_collection(Some("a:b"), Userdata::new(), servers(&["ac1"]), None)
            .await;
        assert!(matches!(
            col,
            Err(CollectionError::Directory(DirectoryError::InvalidKey { .. }))
        ));

        cs.create_collection(Some("a"), Userdata::new(), servers(&["ac1"]), None)
            .await
            .unwrap();
        let sec = cs.create_secret("a", Some("b:c"), "x", Userdata::new()).await;
        assert!(matches!(
            sec,
            Err(CollectionError::Directory(DirectoryError::InvalidKey { .. }))
        ));
    }
}
