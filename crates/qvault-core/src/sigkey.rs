//! AC-server signing-key resolution.
//!
//! Maps an AC server identifier to its current Ed25519 verification key.
//! Resolution goes through a [`SigkeySource`] (the external key-distribution
//! mechanism) fronted by a TTL cache so token verification does not hit the
//! source on every request. The validity window is re-checked on every cache
//! hit, so a key is never served past `valid_until` no matter how fresh the
//! cache entry is.
//!
//! The resolver is an explicitly constructed, explicitly lifetimed object —
//! never ambient global state — so tests substitute a deterministic
//! [`StaticSigkeySource`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, VerifyingKey};
use qvault_storage::StorageError;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::SigkeyError;

/// Default TTL for cached verification keys (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of cached keys.
pub const DEFAULT_CACHE_CAPACITY: u64 = 1_024;

/// Identifier of an independent access-control server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Wrap a raw server identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// A published verification key with its validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigkeyRecord {
    /// The AC server this key belongs to.
    pub server: ServerId,
    /// Ed25519 public key, base64url-encoded without padding.
    pub public_key: String,
    /// Start of the validity window.
    pub valid_from: DateTime<Utc>,
    /// End of the validity window (`None` = no expiry).
    pub valid_until: Option<DateTime<Utc>>,
}

impl SigkeyRecord {
    /// Build a record from a raw verification key, valid from now with no
    /// expiry.
    #[must_use]
    pub fn current(server: ServerId, key: &VerifyingKey) -> Self {
        Self {
            server,
            public_key: URL_SAFE_NO_PAD.encode(key.as_bytes()),
            valid_from: Utc::now(),
            valid_until: None,
        }
    }
}

/// External key-distribution lookup. Implementations may block on the
/// network; the caller bounds each lookup with a timeout.
#[async_trait::async_trait]
pub trait SigkeySource: Send + Sync + 'static {
    /// Fetch the current key record for a server, or `None` if the server
    /// is unknown to the distribution mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the distribution backend fails.
    async fn fetch(&self, server: &ServerId) -> Result<Option<SigkeyRecord>, StorageError>;
}

/// In-memory key source for tests and config-bootstrapped deployments.
#[derive(Debug, Default)]
pub struct StaticSigkeySource {
    keys: RwLock<HashMap<ServerId, SigkeyRecord>>,
}

impl StaticSigkeySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a server's key record.
    pub async fn insert(&self, record: SigkeyRecord) {
        self.keys.write().await.insert(record.server.clone(), record);
    }

    /// Remove a server's key record.
    pub async fn remove(&self, server: &ServerId) {
        self.keys.write().await.remove(server);
    }
}

#[async_trait::async_trait]
impl SigkeySource for StaticSigkeySource {
    async fn fetch(&self, server: &ServerId) -> Result<Option<SigkeyRecord>, StorageError> {
        Ok(self.keys.read().await.get(server).cloned())
    }
}

#[derive(Clone)]
struct CachedKey {
    key: VerifyingKey,
    valid_until: Option<DateTime<Utc>>,
}

/// Caching resolver from [`ServerId`] to Ed25519 verification key.
pub struct SigkeyResolver {
    cache: moka::future::Cache<ServerId, CachedKey>,
    source: Arc<dyn SigkeySource>,
}

impl SigkeyResolver {
    /// Create a resolver with the default TTL and capacity.
    #[must_use]
    pub fn new(source: Arc<dyn SigkeySource>) -> Self {
        Self::with_ttl(source, DEFAULT_CACHE_TTL)
    }

    /// Create a resolver with a custom cache TTL.
    #[must_use]
    pub fn with_ttl(source: Arc<dyn SigkeySource>, ttl: Duration) -> Self {
        Self {
            cache: moka::future::Cache::builder()
                .time_to_live(ttl)
                .max_capacity(DEFAULT_CACHE_CAPACITY)
                .build(),
            source,
        }
    }

    /// Resolve a server's current verification key.
    ///
    /// Cache hits are re-validated against the key's `valid_until` before
    /// being returned; entries past their window are evicted and re-fetched.
    ///
    /// # Errors
    ///
    /// - [`SigkeyError::UnknownServer`] if the source has no record.
    /// - [`SigkeyError::OutsideValidity`] if the key is outside its window.
    /// - [`SigkeyError::InvalidKey`] if the stored key fails to decode.
    /// - [`SigkeyError::Storage`] if the source backend fails.
    pub async fn resolve(&self, server: &ServerId) -> Result<VerifyingKey, SigkeyError> {
        if let Some(entry) = self.cache.get(server).await {
            let expired = entry.valid_until.is_some_and(|until| Utc::now() > until);
            if expired {
                self.cache.invalidate(server).await;
            } else {
                return Ok(entry.key);
            }
        }

        let record = self
            .source
            .fetch(server)
            .await?
            .ok_or_else(|| SigkeyError::UnknownServer { server: server.to_string() })?;

        let now = Utc::now();
        if now < record.valid_from || record.valid_until.is_some_and(|until| now > until) {
            return Err(SigkeyError::OutsideValidity { server: server.to_string() });
        }

        let key = decode_verifying_key(server, &record.public_key)?;
        self.cache
            .insert(
                server.clone(),
                CachedKey {
                    key,
                    valid_until: record.valid_until,
                },
            )
            .await;
        debug!(server = %server, "verification key resolved and cached");
        Ok(key)
    }

    /// Drop a server's cached key so the next resolve re-fetches. Call when
    /// a key is known to have rotated or been revoked.
    pub async fn invalidate(&self, server: &ServerId) {
        self.cache.invalidate(server).await;
    }
}

impl fmt::Debug for SigkeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigkeyResolver").finish_non_exhaustive()
    }
}

/// Decode a base64url Ed25519 public key.
fn decode_verifying_key(server: &ServerId, encoded: &str) -> Result<VerifyingKey, SigkeyError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|e| SigkeyError::InvalidKey {
            server: server.to_string(),
            reason: format!("base64 decode: {e}"),
        })?;

    let bytes: [u8; PUBLIC_KEY_LENGTH] =
        bytes.as_slice().try_into().map_err(|_| SigkeyError::InvalidKey {
            server: server.to_string(),
            reason: format!("expected {PUBLIC_KEY_LENGTH} bytes, got {}", bytes.len()),
        })?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| SigkeyError::InvalidKey {
        server: server.to_string(),
        reason: format!("invalid Ed25519 key: {e}"),
    })
}
