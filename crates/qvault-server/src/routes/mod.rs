//! HTTP routes for the `QVault` API.
//!
//! Every mutating or reading route demands quorum authorization before the
//! core operation runs. Tokens arrive in the `quorum-tokens` header as one
//! `:`-delimited bundle.

pub mod collections;
pub mod secrets;

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use qvault_core::quorum::{AuthzRequest, split_bundle};
use qvault_core::{Requirement, ServerId};
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

/// Request header carrying the `:`-delimited token bundle.
pub const TOKENS_HEADER: &str = "quorum-tokens";

/// Build the full API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(status))
        .merge(collections::router())
        .merge(secrets::router())
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    name: &'static str,
    version: &'static str,
    status: &'static str,
}

/// Service status. Unauthenticated.
async fn status(State(_state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        name: "qvault",
        version: env!("CARGO_PKG_VERSION"),
        status: "ok",
    })
}

/// Run quorum authorization for one request.
///
/// Pulls the token bundle from the `quorum-tokens` header and evaluates it
/// against the given requirement, candidate pool, and threshold. A missing
/// header is an authorization failure, not a bad request.
pub(crate) async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    requirement: Requirement,
    candidates: Vec<ServerId>,
    required_count: Option<usize>,
) -> Result<(), AppError> {
    let bundle = headers
        .get(TOKENS_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing {TOKENS_HEADER} header")))?;

    let request = AuthzRequest {
        requirement,
        candidates,
        required_count,
        tokens: split_bundle(bundle),
    };
    state.authorizer.authorize(&request).await?;
    Ok(())
}
