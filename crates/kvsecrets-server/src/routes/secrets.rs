//! Secrets routes: `/v1/secrets/*` and `/v1/keys`.
//!
//! Thin JSON wrappers over the cached store. Key validation happens in the
//! store; invalid keys surface as `400`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use kvsecrets_storage::{Key, SecretsKvStore};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/secrets` router.
///
/// Paths:
/// - `GET    /v1/secrets/{org_id}/{type}/{namespace}`: read
/// - `PUT    /v1/secrets/{org_id}/{type}/{namespace}`: write
/// - `DELETE /v1/secrets/{org_id}/{type}/{namespace}`: delete
/// - `POST   /v1/secrets/{org_id}/{type}/{namespace}/rename`: rename
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/{org_id}/{secret_type}/{namespace}",
            get(read_secret).put(write_secret).delete(delete_secret),
        )
        .route(
            "/{org_id}/{secret_type}/{namespace}/rename",
            post(rename_secret),
        )
}

// ── Request / response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WriteSecretRequest {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameSecretRequest {
    pub new_namespace: String,
}

#[derive(Debug, Deserialize)]
pub struct KeysQuery {
    pub org_id: i64,
    pub namespace: String,
    #[serde(rename = "type")]
    pub secret_type: String,
}

#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub org_id: i64,
    pub namespace: String,
    #[serde(rename = "type")]
    pub secret_type: String,
}

impl From<Key> for KeyResponse {
    fn from(key: Key) -> Self {
        Self {
            org_id: key.org_id,
            namespace: key.namespace,
            secret_type: key.secret_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SecretResponse {
    #[serde(flatten)]
    pub key: KeyResponse,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<KeyResponse>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn read_secret(
    State(state): State<Arc<AppState>>,
    Path((org_id, secret_type, namespace)): Path<(i64, String, String)>,
) -> Result<Json<SecretResponse>, AppError> {
    let value = state
        .store
        .get(org_id, &namespace, &secret_type)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("no secret at {org_id}/{secret_type}/{namespace}"))
        })?;

    Ok(Json(SecretResponse {
        key: KeyResponse {
            org_id,
            namespace,
            secret_type,
        },
        value,
    }))
}

async fn write_secret(
    State(state): State<Arc<AppState>>,
    Path((org_id, secret_type, namespace)): Path<(i64, String, String)>,
    Json(body): Json<WriteSecretRequest>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .set(org_id, &namespace, &secret_type, &body.value)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Path((org_id, secret_type, namespace)): Path<(i64, String, String)>,
) -> Result<StatusCode, AppError> {
    state.store.del(org_id, &namespace, &secret_type).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rename_secret(
    State(state): State<Arc<AppState>>,
    Path((org_id, secret_type, namespace)): Path<(i64, String, String)>,
    Json(body): Json<RenameSecretRequest>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .rename(org_id, &namespace, &secret_type, &body.new_namespace)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/keys?org_id=&namespace=&type=`
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<KeysResponse>, AppError> {
    let keys = state
        .store
        .keys(query.org_id, &query.namespace, &query.secret_type)
        .await?;

    Ok(Json(KeysResponse {
        keys: keys.into_iter().map(KeyResponse::from).collect(),
    }))
}
