//! Shared application state for the `kvsecrets` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::sync::Arc;

use kvsecrets_core::cache::CachedStore;
use kvsecrets_core::selector::{BackendKind, ProvidedStore};

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// The cached store chosen at startup.
    pub store: Arc<CachedStore>,
    /// Which backend the selector picked.
    pub backend: BackendKind,
    /// Expected bearer token; `None` disables auth.
    pub api_token: Option<String>,
}

impl AppState {
    #[must_use]
    pub fn new(provided: ProvidedStore, api_token: Option<String>) -> Self {
        Self {
            store: provided.store,
            backend: provided.kind,
            api_token,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.backend)
            .field("auth", &self.api_token.is_some())
            .finish_non_exhaustive()
    }
}
