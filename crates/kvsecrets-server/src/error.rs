//! HTTP error types for the `kvsecrets` server.
//!
//! Every error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use kvsecrets_storage::StorageError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Missing or wrong bearer token.
    Unauthorized(String),
    /// No secret under the requested key.
    NotFound(String),
    /// Client sent an invalid key or body.
    BadRequest(String),
    /// Storage or plugin failure.
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
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey { .. } => Self::BadRequest(err.to_string()),
            StorageError::Open { .. }
            | StorageError::Read { .. }
            | StorageError::Write { .. }
            | StorageError::Delete { .. }
            | StorageError::List { .. }
            | StorageError::Rename { .. }
            | StorageError::Cipher { .. }
            | StorageError::Plugin { .. } => {
                tracing::error!(error = %err, "secrets store operation failed");
                Self::Internal(err.to_string())
            }
        }
    }
}
