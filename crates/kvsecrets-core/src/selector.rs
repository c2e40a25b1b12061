//! Startup selection between the SQL and remote plugin backends.
//!
//! Selection runs once. The outcome is one of:
//!
//! - plugin requested and started → plugin backend;
//! - plugin requested but the client could not be acquired → SQL backend,
//!   logged as an error but not fatal;
//! - the plugin check itself failed → fatal if the failure was recorded as
//!   fatal (or that cannot be determined), otherwise SQL backend;
//! - plugin not requested → SQL backend.
//!
//! A fatal outcome aborts startup.

use std::sync::Arc;

use kvsecrets_storage::{PluginStore, SecretsKvStore, SecretsPlugin, StorageError};
use tracing::{debug, error, warn};

use crate::cache::CachedStore;
use crate::config::SecretsConfig;
use crate::error::{PluginStartupError, SelectError};

/// Tenant under which the fatal-plugin flag is stored.
const FATAL_FLAG_ORG_ID: i64 = 0;
const FATAL_FLAG_NAMESPACE: &str = "secretsmanagerplugin";
const FATAL_FLAG_TYPE: &str = "fatal_plugin_error";

/// Capability and health probe for the remote secrets plugin.
#[async_trait::async_trait]
pub trait RemotePluginCheck: Send + Sync {
    /// Whether the plugin should be used. An error means the plugin was
    /// requested but failed to start.
    async fn should_use_remote_plugin(&self) -> Result<bool, PluginStartupError>;

    /// Acquire the started plugin client.
    async fn plugin(&self) -> Result<Arc<dyn SecretsPlugin>, PluginStartupError>;
}

/// Persisted classification of plugin startup failures.
#[async_trait::async_trait]
pub trait FatalErrorRegistry: Send + Sync {
    /// Whether a plugin startup failure must abort the process.
    async fn is_plugin_error_fatal(&self) -> Result<bool, StorageError>;
}

/// Plugin check used when no plugin integration is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRemotePlugin;

#[async_trait::async_trait]
impl RemotePluginCheck for DisabledRemotePlugin {
    async fn should_use_remote_plugin(&self) -> Result<bool, PluginStartupError> {
        Ok(false)
    }

    async fn plugin(&self) -> Result<Arc<dyn SecretsPlugin>, PluginStartupError> {
        Err(PluginStartupError {
            reason: "no secrets plugin is configured".to_owned(),
        })
    }
}

/// [`FatalErrorRegistry`] that keeps its flag as a record in a secrets store.
///
/// Meant to be given the SQL store, which is always available even when the
/// plugin is not.
#[derive(Clone)]
pub struct StoreFatalRegistry {
    store: Arc<dyn SecretsKvStore>,
}

impl std::fmt::Debug for StoreFatalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFatalRegistry")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

impl StoreFatalRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn SecretsKvStore>) -> Self {
        Self { store }
    }

    /// Record whether plugin startup failures are fatal.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the flag cannot be written.
    pub async fn set_plugin_error_fatal(&self, fatal: bool) -> Result<(), StorageError> {
        if fatal {
            self.store
                .set(FATAL_FLAG_ORG_ID, FATAL_FLAG_NAMESPACE, FATAL_FLAG_TYPE, "true")
                .await
        } else {
            self.store
                .del(FATAL_FLAG_ORG_ID, FATAL_FLAG_NAMESPACE, FATAL_FLAG_TYPE)
                .await
        }
    }
}

#[async_trait::async_trait]
impl FatalErrorRegistry for StoreFatalRegistry {
    async fn is_plugin_error_fatal(&self) -> Result<bool, StorageError> {
        let flag = self
            .store
            .get(FATAL_FLAG_ORG_ID, FATAL_FLAG_NAMESPACE, FATAL_FLAG_TYPE)
            .await?;
        Ok(flag.as_deref() == Some("true"))
    }
}

/// Which backend won the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sql,
    Plugin,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Plugin => "plugin",
        }
    }
}

/// A selected, uncached backend.
pub struct SelectedBackend {
    pub kind: BackendKind,
    pub store: Arc<dyn SecretsKvStore>,
}

impl std::fmt::Debug for SelectedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedBackend")
            .field("kind", &self.kind)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

/// The cached store handed to the rest of the process.
#[derive(Debug, Clone)]
pub struct ProvidedStore {
    pub kind: BackendKind,
    pub store: Arc<CachedStore>,
}

/// Choose the backend for this process.
///
/// # Errors
///
/// - [`SelectError::FatalPlugin`] if the plugin check failed and the failure
///   is recorded as fatal.
/// - [`SelectError::FatalCheck`] if the fatal classification itself failed.
pub async fn select_backend(
    sql: Arc<dyn SecretsKvStore>,
    check: &dyn RemotePluginCheck,
    registry: &dyn FatalErrorRegistry,
) -> Result<SelectedBackend, SelectError> {
    match check.should_use_remote_plugin().await {
        Ok(true) => {
            debug!("secrets store is using a remote plugin for secrets management");
            match check.plugin().await {
                Ok(plugin) => Ok(SelectedBackend {
                    kind: BackendKind::Plugin,
                    store: Arc::new(PluginStore::new(plugin)),
                }),
                Err(e) => {
                    error!(error = %e, "secrets plugin client unavailable, falling back to SQL implementation");
                    Ok(sql_backend(sql))
                }
            }
        }
        Ok(false) => {
            debug!("secrets store is using the default SQL implementation");
            Ok(sql_backend(sql))
        }
        Err(check_err) => match registry.is_plugin_error_fatal().await {
            Ok(false) => {
                warn!(error = %check_err, "secrets plugin failed to start, continuing with SQL implementation");
                Ok(sql_backend(sql))
            }
            Ok(true) => {
                error!(error = %check_err, "secrets management plugin is required to start, exiting");
                Err(SelectError::FatalPlugin(check_err))
            }
            Err(classify_err) => {
                error!(
                    error = %check_err,
                    classify_error = %classify_err,
                    "secrets management plugin is required to start, exiting"
                );
                Err(SelectError::FatalCheck(classify_err))
            }
        },
    }
}

fn sql_backend(store: Arc<dyn SecretsKvStore>) -> SelectedBackend {
    SelectedBackend {
        kind: BackendKind::Sql,
        store,
    }
}

/// Select a backend and wrap it in the read cache configured by `config`.
///
/// The sweeper is not started; call [`CachedStore::spawn_sweeper`] with
/// `config.cache_sweep_interval` once a runtime and shutdown signal exist.
///
/// # Errors
///
/// Same as [`select_backend`].
pub async fn provide_store(
    config: &SecretsConfig,
    sql: Arc<dyn SecretsKvStore>,
    check: &dyn RemotePluginCheck,
    registry: &dyn FatalErrorRegistry,
) -> Result<ProvidedStore, SelectError> {
    let selected = select_backend(sql, check, registry).await?;
    Ok(ProvidedStore {
        kind: selected.kind,
        store: Arc::new(CachedStore::new(selected.store, config.cache_ttl)),
    })
}
