//! Shared application state for `QVault` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the collection store, the quorum
//! authorizer, and the server-scoped AC configuration.

use qvault_core::{CollectionStore, QuorumAuthorizer, ServerId};

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Collection and secret operations.
    pub collections: CollectionStore,
    /// Quorum evaluation over the shared token verifier.
    pub authorizer: QuorumAuthorizer,
    /// AC servers guarding server-scoped operations (collection create).
    /// Collection-scoped operations use the collection's own list.
    pub ac_servers: Vec<ServerId>,
    /// Default endorsement threshold for server-scoped operations.
    pub ac_required: Option<usize>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
