//! System routes: `/v1/sys/*`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use kvsecrets_storage::SecretsKvStore;

use crate::state::AppState;

/// Build the `/v1/sys` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Concrete store behind the cache, e.g. `sql-postgres` or `plugin`.
    pub backend: &'static str,
    /// Selector outcome: `sql` or `plugin`.
    pub selected: &'static str,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.store.inner().backend_name(),
        selected: state.backend.as_str(),
    })
}
