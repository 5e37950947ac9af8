//! Collection routes: `/v1/collections`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, post};
use axum::{Json, Router};
use qvault_core::token::{ObjectScope, ObjectType, Permission};
use qvault_core::{Requirement, ServerId, Userdata};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::routes::authorize;
use crate::state::AppState;

/// Build the collections router.
///
/// Paths:
/// - `POST   /v1/collections` — create a collection
/// - `DELETE /v1/collections/{cid}` — destroy a collection and its secrets
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/collections", post(create_collection))
        .route("/v1/collections/{cid}", delete(destroy_collection))
}

#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    /// Explicit key; omit to generate one.
    pub key: Option<String>,
    #[serde(default)]
    pub userdata: Userdata,
    /// AC servers guarding this collection. Defaults to the server's
    /// configured list.
    pub ac_servers: Option<Vec<String>>,
    /// Endorsement threshold. Defaults to the full server list.
    pub ac_required: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CollectionResponse {
    pub key: String,
    pub ac_servers: Vec<String>,
    pub ac_required: usize,
}

/// Create a collection. Server-scoped: authorized against the configured
/// AC list, since the collection's own list does not exist yet.
async fn create_collection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateCollectionRequest>,
) -> Result<(StatusCode, Json<CollectionResponse>), AppError> {
    authorize(
        &state,
        &headers,
        Requirement::new(Permission::Create, ObjectType::Collection, ObjectScope::Any),
        state.ac_servers.clone(),
        state.ac_required,
    )
    .await?;

    let ac_servers = body
        .ac_servers
        .map_or_else(
            || state.ac_servers.clone(),
            |ids| ids.into_iter().map(ServerId::new).collect(),
        );

    let record = state
        .collections
        .create_collection(body.key.as_deref(), body.userdata, ac_servers, body.ac_required)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CollectionResponse {
            key: record.key,
            ac_servers: record.ac_servers.iter().map(ToString::to_string).collect(),
            ac_required: record.ac_required,
        }),
    ))
}

/// Destroy a collection. Authorized against the collection's own AC list
/// and threshold.
async fn destroy_collection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(cid): Path<String>,
) -> Result<StatusCode, AppError> {
    let collection = state.collections.get_collection(&cid).await?;

    authorize(
        &state,
        &headers,
        Requirement::new(
            Permission::Delete,
            ObjectType::Collection,
            ObjectScope::Object(cid.clone()),
        ),
        collection.ac_servers,
        Some(collection.ac_required),
    )
    .await?;

    state.collections.destroy_collection(&cid).await?;
    Ok(StatusCode::NO_CONTENT)
}
