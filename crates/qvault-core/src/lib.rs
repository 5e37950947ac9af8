//! Core library for `QVault`.
//!
//! Contains the persistent object directory, the bidirectional index layer,
//! signing-key resolution, capability-token verification, the quorum
//! authorizer, and the collection/secret domain layer. This crate depends on
//! `qvault-storage` for the atomic store trait and knows nothing about HTTP.

pub mod collections;
pub mod directory;
pub mod error;
pub mod index;
pub mod quorum;
pub mod sigkey;
pub mod token;

pub use collections::{CollectionRecord, CollectionStore, SecretRecord};
pub use directory::{CreatePolicy, ObjectDirectory, ObjectRecord, Userdata};
pub use error::{CollectionError, DirectoryError, QuorumError, SigkeyError, TokenError};
pub use index::IndexDirectory;
pub use quorum::{AuthzDecision, AuthzRequest, QuorumAuthorizer};
pub use sigkey::{ServerId, SigkeyRecord, SigkeyResolver, SigkeySource, StaticSigkeySource};
pub use token::{ObjectScope, ObjectType, Permission, Requirement, TokenClaims, TokenVerifier};
