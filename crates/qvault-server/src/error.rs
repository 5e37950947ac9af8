//! HTTP error types for `QVault` server.
//!
//! Maps domain errors from `qvault-core` into appropriate HTTP responses.
//! Every error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use qvault_core::{CollectionError, DirectoryError, QuorumError};
use qvault_storage::StorageError;
use serde::Serialize;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Quorum authorization failed or no tokens were presented.
    Unauthorized(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// The key already exists.
    Conflict(String),
    /// The storage backend is unreachable.
    Unavailable(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Exists { .. } => Self::Conflict(err.to_string()),
            DirectoryError::DoesNotExist { .. } => Self::NotFound(err.to_string()),
            DirectoryError::InvalidKey { .. } => Self::BadRequest(err.to_string()),
            DirectoryError::Corrupt { .. } => Self::Internal(err.to_string()),
            DirectoryError::Storage(ref inner) => match inner {
                StorageError::Unavailable { .. } => Self::Unavailable(err.to_string()),
                _ => Self::Internal(err.to_string()),
            },
        }
    }
}

impl From<CollectionError> for AppError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::InvalidConfig { .. } => Self::BadRequest(err.to_string()),
            CollectionError::Directory(inner) => inner.into(),
        }
    }
}

impl From<QuorumError> for AppError {
    fn from(err: QuorumError) -> Self {
        match err {
            QuorumError::InvalidThreshold { .. } => Self::BadRequest(err.to_string()),
            QuorumError::EmptyBundle | QuorumError::InsufficientQuorum { .. } => {
                Self::Unauthorized(err.to_string())
            }
        }
    }
}
