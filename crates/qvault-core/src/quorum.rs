//! Quorum authorization over capability-token bundles.
//!
//! A request is authorized when at least `required_count` distinct AC
//! servers have each issued a valid token for it. Tokens arrive as a single
//! `:`-delimited bundle; verification of the bundle fans out concurrently
//! with bounded parallelism, and the results are then reduced in bundle
//! order on a single thread. Only the first success per distinct issuer
//! counts, so duplicate or replayed tokens from one server never inflate the
//! tally, and the decision is deterministic regardless of verification
//! completion order.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::QuorumError;
use crate::sigkey::ServerId;
use crate::token::{Requirement, TokenVerifier};

/// Separator between tokens in a bundle.
pub const TOKEN_DELIMITER: char = ':';

/// Bound on concurrently running token verifications per authorize call.
const MAX_CONCURRENT_VERIFICATIONS: usize = 8;

/// Split a raw bundle into individual token strings, dropping empty
/// segments from stray delimiters.
#[must_use]
pub fn split_bundle(bundle: &str) -> Vec<String> {
    bundle
        .split(TOKEN_DELIMITER)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// One authorization question: what is being attempted, which servers may
/// endorse it, how many endorsements are needed, and the presented tokens.
#[derive(Debug, Clone)]
pub struct AuthzRequest {
    /// The permission, object type, and scope every token must cover.
    pub requirement: Requirement,
    /// AC servers eligible to endorse this request.
    pub candidates: Vec<ServerId>,
    /// Distinct endorsements needed. `None` requires every candidate.
    pub required_count: Option<usize>,
    /// Token strings, in bundle order.
    pub tokens: Vec<String>,
}

impl AuthzRequest {
    /// Effective threshold after applying the default.
    #[must_use]
    pub fn effective_required(&self) -> usize {
        self.required_count.unwrap_or(self.candidates.len())
    }
}

/// A granted authorization. Constructed only by
/// [`QuorumAuthorizer::authorize`]; holding one proves the quorum check
/// passed.
#[derive(Debug, Clone)]
pub struct AuthzDecision {
    /// Distinct servers whose tokens verified.
    pub verified_servers: BTreeSet<ServerId>,
    /// Threshold that was met.
    pub required: usize,
}

/// Stateless quorum evaluator over a shared [`TokenVerifier`].
#[derive(Clone)]
pub struct QuorumAuthorizer {
    verifier: Arc<TokenVerifier>,
}

impl QuorumAuthorizer {
    #[must_use]
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Evaluate a quorum request.
    ///
    /// All tokens are verified concurrently with bounded fan-out, then
    /// reduced in bundle order: each token's success counts only if its
    /// issuer has not already been counted. Individual token failures are
    /// logged and swallowed; only the final tally decides.
    ///
    /// # Errors
    ///
    /// - [`QuorumError::EmptyBundle`] if no tokens were supplied.
    /// - [`QuorumError::InvalidThreshold`] if the threshold is zero or
    ///   exceeds the candidate pool.
    /// - [`QuorumError::InsufficientQuorum`] if fewer distinct servers
    ///   verified than required.
    pub async fn authorize(&self, request: &AuthzRequest) -> Result<AuthzDecision, QuorumError> {
        if request.tokens.is_empty() {
            return Err(QuorumError::EmptyBundle);
        }

        let required = request.effective_required();
        if required == 0 || required > request.candidates.len() {
            return Err(QuorumError::InvalidThreshold {
                required,
                candidates: request.candidates.len(),
            });
        }

        let results = self.verify_all(request).await;

        // Deterministic reduction in bundle order. First success per
        // distinct issuer counts; everything else is ignored.
        let mut verified_servers = BTreeSet::new();
        for (position, issuer) in results {
            match issuer {
                Ok(issuer) => {
                    if !verified_servers.insert(issuer.clone()) {
                        debug!(position, issuer = %issuer, "duplicate endorsement ignored");
                    }
                }
                Err(err) => {
                    warn!(position, error = %err, "token failed verification");
                }
            }
        }

        let verified = verified_servers.len();
        if verified >= required {
            debug!(verified, required, "quorum met");
            Ok(AuthzDecision { verified_servers, required })
        } else {
            Err(QuorumError::InsufficientQuorum { verified, required })
        }
    }

    /// Run every verification with bounded concurrency; returns results
    /// keyed by bundle position, sorted by position.
    async fn verify_all(
        &self,
        request: &AuthzRequest,
    ) -> Vec<(usize, Result<ServerId, crate::error::TokenError>)> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_VERIFICATIONS));
        let candidates = Arc::new(request.candidates.clone());
        let requirement = Arc::new(request.requirement.clone());

        let mut set = JoinSet::new();
        for (position, token) in request.tokens.iter().cloned().enumerate() {
            let verifier = Arc::clone(&self.verifier);
            let semaphore = Arc::clone(&semaphore);
            let candidates = Arc::clone(&candidates);
            let requirement = Arc::clone(&requirement);
            set.spawn(async move {
                // Holding a permit for the duration bounds the fan-out.
                let _permit = semaphore.acquire().await;
                let result = verifier.verify(&token, &requirement, &candidates).await;
                (position, result)
            });
        }

        let mut results = Vec::with_capacity(request.tokens.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(err) => warn!(error = %err, "verification task failed to join"),
            }
        }
        results.sort_by_key(|(position, _)| *position);
        results
    }
}

impl fmt::Debug for QuorumAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuorumAuthorizer").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sigkey::{SigkeyRecord, SigkeyResolver, StaticSigkeySource};
    use crate::token::{ObjectScope, ObjectType, Permission, TokenClaims};
    use chrono::{Duration as ChronoDuration, Utc};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    struct Fixture {
        authorizer: QuorumAuthorizer,
        keys: Vec<(ServerId, SigningKey)>,
    }

    async fn fixture(servers: &[&str]) -> Fixture {
        let source = Arc::new(StaticSigkeySource::new());
        let mut keys = Vec::new();
        for id in servers {
            let key = SigningKey::generate(&mut OsRng);
            let server = ServerId::from(*id);
            source
                .insert(SigkeyRecord::current(server.clone(), &key.verifying_key()))
                .await;
            keys.push((server, key));
        }
        let verifier = TokenVerifier::new(Arc::new(SigkeyResolver::new(source)));
        Fixture { authorizer: QuorumAuthorizer::new(Arc::new(verifier)), keys }
    }

    impl Fixture {
        fn token(&self, server: &str) -> String {
            self.token_with(server, |_| {})
        }

        fn token_with(&self, server: &str, adjust: impl FnOnce(&mut TokenClaims)) -> String {
            let (_, key) = self
                .keys
                .iter()
                .find(|(id, _)| id.as_str() == server)
                .unwrap();
            let mut claims = TokenClaims {
                issuer: ServerId::from(server),
                permission: Permission::Read,
                object_type: ObjectType::Secret,
                object_scope: ObjectScope::Object("sec-1".to_owned()),
                issued_at: Utc::now(),
                expires_at: Utc::now() + ChronoDuration::minutes(5),
            };
            adjust(&mut claims);
            claims.sign(key).unwrap()
        }

        fn request(&self, tokens: Vec<String>, required: Option<usize>) -> AuthzRequest {
            AuthzRequest {
                requirement: Requirement::new(
                    Permission::Read,
                    ObjectType::Secret,
                    ObjectScope::Object("sec-1".to_owned()),
                ),
                candidates: self.keys.iter().map(|(id, _)| id.clone()).collect(),
                required_count: required,
                tokens,
            }
        }
    }

    #[tokio::test]
    async fn two_of_three_distinct_servers_authorize() {
        let fx = fixture(&["ac1", "ac2", "ac3"]).await;
        let request = fx.request(vec![fx.token("ac1"), fx.token("ac3")], Some(2));

        let decision = fx.authorizer.authorize(&request).await.unwrap();
        assert_eq!(decision.verified_servers.len(), 2);
        assert!(decision.verified_servers.contains(&ServerId::from("ac1")));
        assert!(decision.verified_servers.contains(&ServerId::from("ac3")));
    }

    #[tokio::test]
    async fn duplicate_issuer_counts_once() {
        let fx = fixture(&["ac1", "ac2"]).await;
        // Two distinct valid tokens, same issuer.
        let request = fx.request(vec![fx.token("ac1"), fx.token("ac1")], Some(2));

        let result = fx.authorizer.authorize(&request).await;
        assert!(matches!(
            result,
            Err(QuorumError::InsufficientQuorum { verified: 1, required: 2 })
        ));
    }

    #[tokio::test]
    async fn replayed_identical_token_counts_once() {
        let fx = fixture(&["ac1", "ac2"]).await;
        let token = fx.token("ac1");
        let request = fx.request(vec![token.clone(), token], Some(2));

        let result = fx.authorizer.authorize(&request).await;
        assert!(matches!(
            result,
            Err(QuorumError::InsufficientQuorum { verified: 1, required: 2 })
        ));
    }

    #[tokio::test]
    async fn expired_token_does_not_count() {
        let fx = fixture(&["ac1", "ac2"]).await;
        let expired = fx.token_with("ac2", |c| {
            c.expires_at = Utc::now() - ChronoDuration::seconds(1);
        });
        let request = fx.request(vec![fx.token("ac1"), expired], Some(2));

        let result = fx.authorizer.authorize(&request).await;
        assert!(matches!(
            result,
            Err(QuorumError::InsufficientQuorum { verified: 1, required: 2 })
        ));
    }

    #[tokio::test]
    async fn garbage_tokens_are_skipped_not_fatal() {
        let fx = fixture(&["ac1", "ac2"]).await;
        let request = fx.request(
            vec!["not-a-token".to_owned(), fx.token("ac1"), fx.token("ac2")],
            Some(2),
        );

        let decision = fx.authorizer.authorize(&request).await.unwrap();
        assert_eq!(decision.verified_servers.len(), 2);
    }

    #[tokio::test]
    async fn empty_bundle_is_rejected() {
        let fx = fixture(&["ac1"]).await;
        let request = fx.request(vec![], Some(1));
        assert!(matches!(
            fx.authorizer.authorize(&request).await,
            Err(QuorumError::EmptyBundle)
        ));
    }

    #[tokio::test]
    async fn default_threshold_is_every_candidate() {
        let fx = fixture(&["ac1", "ac2", "ac3"]).await;

        // Two of three with no explicit threshold: all three are required.
        let partial = fx.request(vec![fx.token("ac1"), fx.token("ac2")], None);
        assert!(matches!(
            fx.authorizer.authorize(&partial).await,
            Err(QuorumError::InsufficientQuorum { verified: 2, required: 3 })
        ));

        let full = fx.request(
            vec![fx.token("ac1"), fx.token("ac2"), fx.token("ac3")],
            None,
        );
        let decision = fx.authorizer.authorize(&full).await.unwrap();
        assert_eq!(decision.verified_servers.len(), 3);
    }

    #[tokio::test]
    async fn threshold_larger_than_pool_is_invalid() {
        let fx = fixture(&["ac1"]).await;
        let request = fx.request(vec![fx.token("ac1")], Some(2));
        assert!(matches!(
            fx.authorizer.authorize(&request).await,
            Err(QuorumError::InvalidThreshold { required: 2, candidates: 1 })
        ));
    }

    #[tokio::test]
    async fn zero_threshold_is_invalid() {
        let fx = fixture(&["ac1"]).await;
        let request = fx.request(vec![fx.token("ac1")], Some(0));
        assert!(matches!(
            fx.authorizer.authorize(&request).await,
            Err(QuorumError::InvalidThreshold { required: 0, .. })
        ));
    }

    #[tokio::test]
    async fn non_candidate_issuer_does_not_count() {
        let fx = fixture(&["ac1", "ac2"]).await;
        let outsider_key = SigningKey::generate(&mut OsRng);
        let outsider_token = TokenClaims {
            issuer: ServerId::from("outsider"),
            permission: Permission::Read,
            object_type: ObjectType::Secret,
            object_scope: ObjectScope::Object("sec-1".to_owned()),
            issued_at: Utc::now(),
            expires_at: Utc::now() + ChronoDuration::minutes(5),
        }
        .sign(&outsider_key)
        .unwrap();

        let request = fx.request(vec![fx.token("ac1"), outsider_token], Some(2));
        let result = fx.authorizer.authorize(&request).await;
        assert!(matches!(
            result,
            Err(QuorumError::InsufficientQuorum { verified: 1, required: 2 })
        ));
    }

    #[test]
    fn bundle_splitting_drops_empty_segments() {
        assert_eq!(split_bundle("a:b:c"), vec!["a", "b", "c"]);
        assert_eq!(split_bundle(":a::b:"), vec!["a", "b"]);
        assert!(split_bundle("").is_empty());
        assert!(split_bundle(":::").is_empty());
    }
}
