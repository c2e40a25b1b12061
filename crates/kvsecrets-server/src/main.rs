//! `kvsecrets` server entry point.
//!
//! Bootstraps the SQL backend, runs the backend selector, wraps the result in
//! the read cache, then starts the Axum HTTP server with graceful shutdown.
//! The cache sweeper runs alongside the server and is cancelled on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use kvsecrets_core::selector::{DisabledRemotePlugin, StoreFatalRegistry, provide_store};
use kvsecrets_storage::{MemoryStore, SecretsKvStore};

use kvsecrets_server::config::{ServerConfig, StorageBackendType};
use kvsecrets_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment.
    let config = ServerConfig::from_env();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "kvsecrets starting");

    let sql = open_sql_store(&config).await?;

    // Standalone: no plugin host, so the check always answers "no plugin".
    let registry = StoreFatalRegistry::new(Arc::clone(&sql));
    let provided = provide_store(&config.secrets, sql, &DisabledRemotePlugin, &registry)
        .await
        .context("failed to select secrets backend")?;

    info!(
        selected = provided.kind.as_str(),
        cache_ttl_secs = config.secrets.cache_ttl.as_secs(),
        "secrets store ready"
    );

    // Shutdown signal channel.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper_handle = provided
        .store
        .spawn_sweeper(config.secrets.cache_sweep_interval, shutdown_rx);

    if config.api_token.is_none() {
        warn!("KVSECRETS_API_TOKEN is not set, the secrets API is unauthenticated");
    }

    let state = Arc::new(AppState::new(provided, config.api_token.clone()));
    let app = kvsecrets_server::app(state);

    // Bind and serve.
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "kvsecrets server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), sweeper_handle).await;

    info!("kvsecrets server stopped");
    Ok(())
}

/// Open the SQL backend named by the configuration.
async fn open_sql_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn SecretsKvStore>> {
    match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            info!(url = %"[redacted]", "using PostgreSQL storage");
            let cipher = load_cipher(config)?;
            Ok(Arc::new(
                kvsecrets_storage::PostgresStore::connect(url, cipher)
                    .await
                    .context("failed to connect to PostgreSQL storage")?,
            ))
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!(
                "PostgreSQL backend requested but feature 'postgres-backend' is not enabled"
            );
        }
    }
}

/// Build the value cipher, generating a throwaway key if none is configured.
#[cfg(feature = "postgres-backend")]
fn load_cipher(
    config: &ServerConfig,
) -> anyhow::Result<Arc<dyn kvsecrets_storage::SecretsCipher>> {
    use kvsecrets_core::crypto::{AesGcmCipher, EncryptionKey};

    let key = if let Some(encoded) = config.encryption_key.as_deref() {
        EncryptionKey::from_base64(encoded).context("invalid KVSECRETS_ENCRYPTION_KEY")?
    } else {
        warn!(
            "KVSECRETS_ENCRYPTION_KEY is not set, generated a key for this process; \
             stored secrets will be unreadable after restart"
        );
        EncryptionKey::generate()
    };

    Ok(Arc::new(AesGcmCipher::new(key)))
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
