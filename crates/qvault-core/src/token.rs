//! Signed capability tokens.
//!
//! A token is a bearer credential issued by an AC server, binding a single
//! permission to an object type and scope for a limited time. The wire form
//! is `base64url(claims JSON) || '.' || base64url(signature)` with an
//! Ed25519 signature over the encoded claims bytes, so the signed payload is
//! exactly the bytes that travel and verification never depends on JSON
//! re-serialization.
//!
//! Verification runs a fixed short-circuit sequence: decode, candidate
//! membership, signature, expiry, claims. The order matters for the error a
//! caller observes; an expired token with a bad signature reports the
//! signature, not the expiry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TokenError;
use crate::sigkey::{ServerId, SigkeyResolver};

/// Default bound on a single verification, covering key resolution.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// The action a token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Create,
    Read,
    Modify,
    Delete,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Modify => "modify",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// The kind of object a token targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Collection,
    Secret,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Collection => "collection",
            Self::Secret => "secret",
        };
        f.write_str(s)
    }
}

/// Which object instances a token covers. Serialized as the object key, with
/// `"*"` for the wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectScope {
    /// Any object of the declared type. Used for create, where no key
    /// exists yet.
    Any,
    /// One specific object key.
    Object(String),
}

impl ObjectScope {
    /// Whether a granted scope covers a required scope. Wildcard grants
    /// cover everything; a specific grant covers only itself.
    #[must_use]
    pub fn covers(&self, required: &Self) -> bool {
        match (self, required) {
            (Self::Any, _) => true,
            (Self::Object(granted), Self::Object(required)) => granted == required,
            (Self::Object(_), Self::Any) => false,
        }
    }
}

impl Serialize for ObjectScope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Any => serializer.serialize_str("*"),
            Self::Object(key) => serializer.serialize_str(key),
        }
    }
}

impl<'de> Deserialize<'de> for ObjectScope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(if s == "*" { Self::Any } else { Self::Object(s) })
    }
}

/// The signed claims of a capability token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuing AC server.
    pub issuer: ServerId,
    /// Granted permission.
    pub permission: Permission,
    /// Target object type.
    pub object_type: ObjectType,
    /// Target object scope.
    pub object_scope: ObjectScope,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// Expiry time. Tokens are compared against the wall clock at
    /// verification.
    pub expires_at: DateTime<Utc>,
}

impl TokenClaims {
    /// Encode and sign the claims into wire form. Used by AC servers and by
    /// tests; this service itself never issues tokens.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Malformed`] if the claims fail to serialize.
    pub fn sign(&self, key: &SigningKey) -> Result<String, TokenError> {
        let claims_json = serde_json::to_vec(self)
            .map_err(|e| TokenError::Malformed { reason: format!("claims encode: {e}") })?;
        let payload = URL_SAFE_NO_PAD.encode(&claims_json);
        let signature = key.sign(payload.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());
        Ok(format!("{payload}.{sig_b64}"))
    }
}

/// A token split into its claims and detached signature, before any
/// cryptographic or semantic checks.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    /// Parsed claims.
    pub claims: TokenClaims,
    payload: String,
    signature: Signature,
}

impl DecodedToken {
    /// Parse a wire-form token. Performs structural checks only; the
    /// signature is not verified here.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Malformed`] on any structural defect.
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let (payload, sig_b64) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed { reason: "missing '.' separator".to_owned() })?;

        let claims_json = URL_SAFE_NO_PAD
            .decode(payload.as_bytes())
            .map_err(|e| TokenError::Malformed { reason: format!("payload base64: {e}") })?;
        let claims: TokenClaims = serde_json::from_slice(&claims_json)
            .map_err(|e| TokenError::Malformed { reason: format!("claims decode: {e}") })?;

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_b64.as_bytes())
            .map_err(|e| TokenError::Malformed { reason: format!("signature base64: {e}") })?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|e| TokenError::Malformed { reason: format!("signature bytes: {e}") })?;

        Ok(Self { claims, payload: payload.to_owned(), signature })
    }

    /// Verify the detached signature against the issuer's key.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::SignatureInvalid`] on verification failure.
    pub fn verify_signature(&self, key: &ed25519_dalek::VerifyingKey) -> Result<(), TokenError> {
        key.verify_strict(self.payload.as_bytes(), &self.signature)
            .map_err(|_| TokenError::SignatureInvalid {
                issuer: self.claims.issuer.to_string(),
            })
    }
}

/// What a request demands of a token: the permission, object type, and
/// object scope the token must cover.
#[derive(Debug, Clone)]
pub struct Requirement {
    pub permission: Permission,
    pub object_type: ObjectType,
    pub object_scope: ObjectScope,
}

impl Requirement {
    #[must_use]
    pub fn new(permission: Permission, object_type: ObjectType, object_scope: ObjectScope) -> Self {
        Self { permission, object_type, object_scope }
    }
}

/// Verifies single tokens against a requirement and a candidate pool.
pub struct TokenVerifier {
    resolver: Arc<SigkeyResolver>,
    timeout: Duration,
}

impl TokenVerifier {
    /// Create a verifier with the default per-verification timeout.
    #[must_use]
    pub fn new(resolver: Arc<SigkeyResolver>) -> Self {
        Self::with_timeout(resolver, DEFAULT_VERIFY_TIMEOUT)
    }

    /// Create a verifier with an explicit per-verification timeout. The
    /// timeout bounds key resolution; a slow key source fails that token,
    /// not the caller.
    #[must_use]
    pub fn with_timeout(resolver: Arc<SigkeyResolver>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    /// Verify one token string. Returns the verified issuer on success.
    ///
    /// Checks run in a fixed order, short-circuiting on the first failure:
    /// structural decode, candidate membership, signature, expiry, then
    /// claim comparison against the requirement.
    ///
    /// # Errors
    ///
    /// Returns the [`TokenError`] variant for the first failed check.
    pub async fn verify(
        &self,
        token: &str,
        requirement: &Requirement,
        candidates: &[ServerId],
    ) -> Result<ServerId, TokenError> {
        let decoded = DecodedToken::decode(token)?;
        let issuer = decoded.claims.issuer.clone();

        if !candidates.contains(&issuer) {
            return Err(TokenError::IssuerNotCandidate { issuer: issuer.to_string() });
        }

        let key = tokio::time::timeout(self.timeout, self.resolver.resolve(&issuer))
            .await
            .map_err(|_| TokenError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })??;
        decoded.verify_signature(&key)?;

        let claims = &decoded.claims;
        if Utc::now() > claims.expires_at {
            return Err(TokenError::Expired { expired_at: claims.expires_at.to_rfc3339() });
        }

        if claims.permission != requirement.permission {
            return Err(TokenError::PermissionMismatch {
                granted: claims.permission.to_string(),
                required: requirement.permission.to_string(),
            });
        }
        if claims.object_type != requirement.object_type {
            return Err(TokenError::TypeMismatch {
                granted: claims.object_type.to_string(),
                required: requirement.object_type.to_string(),
            });
        }
        if !claims.object_scope.covers(&requirement.object_scope) {
            return Err(TokenError::ScopeMismatch);
        }

        debug!(issuer = %issuer, permission = %claims.permission, "token verified");
        Ok(issuer)
    }
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
