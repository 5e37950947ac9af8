//! Secret routes: `/v1/collections/{cid}/secrets`.
//!
//! All secret operations are collection-scoped: the token must target the
//! secret object type with the collection's key as its scope, and the quorum
//! is evaluated against that collection's AC list and threshold.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use qvault_core::token::{ObjectScope, ObjectType, Permission};
use qvault_core::{CollectionRecord, Requirement, Userdata};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::routes::authorize;
use crate::state::AppState;

/// Build the secrets router.
///
/// Paths:
/// - `POST   /v1/collections/{cid}/secrets` — create a secret
/// - `GET    /v1/collections/{cid}/secrets/{sid}/versions/latest` — read latest
/// - `DELETE /v1/collections/{cid}/secrets/{sid}` — destroy a secret
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/collections/{cid}/secrets", post(create_secret))
        .route(
            "/v1/collections/{cid}/secrets/{sid}/versions/latest",
            get(read_latest),
        )
        .route("/v1/collections/{cid}/secrets/{sid}", delete(destroy_secret))
}

#[derive(Debug, Deserialize)]
pub struct CreateSecretRequest {
    /// Explicit key; omit to generate one.
    pub key: Option<String>,
    /// Opaque secret payload.
    pub data: String,
    #[serde(default)]
    pub userdata: Userdata,
}

#[derive(Debug, Serialize)]
pub struct SecretCreatedResponse {
    pub key: String,
    pub collection: String,
    pub version: u64,
}

#[derive(Debug, Serialize)]
pub struct SecretResponse {
    pub key: String,
    pub collection: String,
    pub data: String,
    pub userdata: Userdata,
    pub version: u64,
    pub created_at: String,
}

/// Fetch the collection and run collection-scoped authorization against its
/// AC list.
async fn authorize_on_collection(
    state: &AppState,
    headers: &HeaderMap,
    cid: &str,
    permission: Permission,
) -> Result<CollectionRecord, AppError> {
    let collection = state.collections.get_collection(cid).await?;
    authorize(
        state,
        headers,
        Requirement::new(
            permission,
            ObjectType::Secret,
            ObjectScope::Object(cid.to_owned()),
        ),
        collection.ac_servers.clone(),
        Some(collection.ac_required),
    )
    .await?;
    Ok(collection)
}

/// Create a secret in a collection.
async fn create_secret(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(cid): Path<String>,
    Json(body): Json<CreateSecretRequest>,
) -> Result<(StatusCode, Json<SecretCreatedResponse>), AppError> {
    authorize_on_collection(&state, &headers, &cid, Permission::Create).await?;

    let record = state
        .collections
        .create_secret(&cid, body.key.as_deref(), &body.data, body.userdata)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SecretCreatedResponse {
            key: record.key,
            collection: record.collection,
            version: record.version,
        }),
    ))
}

/// Read the latest version of a secret.
async fn read_latest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((cid, sid)): Path<(String, String)>,
) -> Result<Json<SecretResponse>, AppError> {
    authorize_on_collection(&state, &headers, &cid, Permission::Read).await?;

    let record = state.collections.get_secret_latest(&cid, &sid).await?;

    Ok(Json(SecretResponse {
        key: record.key,
        collection: record.collection,
        data: record.data,
        userdata: record.userdata,
        version: record.version,
        created_at: record.created_at.to_rfc3339(),
    }))
}

/// Destroy a secret.
async fn destroy_secret(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((cid, sid)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    authorize_on_collection(&state, &headers, &cid, Permission::Delete).await?;

    state.collections.destroy_secret(&cid, &sid).await?;
    Ok(StatusCode::NO_CONTENT)
}
