//! Error types for `qvault-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Token errors never include signature bytes or key material —
//! only issuer identifiers and claim descriptions.

use qvault_storage::StorageError;

/// Errors from the object directory and index layers.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The key is already present and the create policy forbids reuse.
    #[error("object already exists: {key}")]
    Exists { key: String },

    /// The key is not present in the directory.
    #[error("object does not exist: {key}")]
    DoesNotExist { key: String },

    /// The key uses characters the storage layout reserves.
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// A stored record failed to deserialize.
    #[error("corrupt record for key '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// The underlying storage backend returned an error.
    #[error("directory storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from signing-key resolution.
#[derive(Debug, thiserror::Error)]
pub enum SigkeyError {
    /// No verification key is known for the given AC server.
    #[error("unknown AC server: {server}")]
    UnknownServer { server: String },

    /// The stored verification key could not be decoded.
    #[error("invalid verification key for server '{server}': {reason}")]
    InvalidKey { server: String, reason: String },

    /// The key exists but is outside its validity window.
    #[error("verification key for server '{server}' is outside its validity window")]
    OutsideValidity { server: String },

    /// The key-distribution backend returned an error.
    #[error("sigkey storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from single-token verification.
///
/// Inside a quorum decision these are swallowed into the count; they surface
/// individually only from direct [`TokenVerifier`](crate::TokenVerifier)
/// calls.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token string is not decodable as a signed capability token.
    #[error("malformed token: {reason}")]
    Malformed { reason: String },

    /// The declared issuer is not in the candidate server pool.
    #[error("token issuer '{issuer}' is not a candidate for this request")]
    IssuerNotCandidate { issuer: String },

    /// The signature does not verify against the issuer's key.
    #[error("token signature invalid for issuer '{issuer}'")]
    SignatureInvalid { issuer: String },

    /// The token's expiry has passed.
    #[error("token expired at {expired_at}")]
    Expired { expired_at: String },

    /// The token grants a different permission than the one required.
    #[error("token grants permission '{granted}' but '{required}' is required")]
    PermissionMismatch { granted: String, required: String },

    /// The token targets a different object type than the one required.
    #[error("token targets object type '{granted}' but '{required}' is required")]
    TypeMismatch { granted: String, required: String },

    /// The token's object scope does not cover the requested object.
    #[error("token scope does not cover the requested object")]
    ScopeMismatch,

    /// Key resolution did not complete within the per-verification timeout.
    #[error("token verification timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Signing-key resolution failed.
    #[error("token sigkey error: {0}")]
    Sigkey(#[from] SigkeyError),
}

/// Errors from quorum authorization.
#[derive(Debug, thiserror::Error)]
pub enum QuorumError {
    /// The token bundle contained no tokens.
    #[error("no tokens supplied")]
    EmptyBundle,

    /// The required threshold is zero or exceeds the candidate pool.
    #[error("invalid quorum threshold {required} for {candidates} candidate servers")]
    InvalidThreshold { required: usize, candidates: usize },

    /// Not enough distinct AC servers endorsed the request.
    #[error("insufficient quorum: verified {verified} of {required} required endorsements")]
    InsufficientQuorum { verified: usize, required: usize },
}

/// Errors from the collection/secret domain layer.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// The collection's AC configuration is invalid.
    #[error("invalid collection config: {reason}")]
    InvalidConfig { reason: String },

    /// The directory layer returned an error.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
