//! Server configuration for `kvsecrets`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Store-level settings (cache TTL, sweep interval, migration flags) are
//! parsed by [`SecretsConfig`]; this module adds the process-level ones.

use std::net::SocketAddr;

use kvsecrets_core::config::SecretsConfig;

const DEFAULT_PORT: u16 = 8300;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// SQL backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Base64 value-cipher key. Generated at startup when absent.
    pub encryption_key: Option<String>,
    /// Bearer token required on the API. Auth is off when absent.
    pub api_token: Option<String>,
    /// Store-level settings.
    pub secrets: SecretsConfig,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("storage_backend", &self.storage_backend)
            .field("log_level", &self.log_level)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "[redacted]"))
            .field("api_token", &self.api_token.as_ref().map(|_| "[redacted]"))
            .field("secrets", &self.secrets)
            .finish()
    }
}

/// Supported SQL backend types.
#[derive(Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// PostgreSQL persistent storage.
    Postgres { url: String },
}

impl std::fmt::Debug for StorageBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            // The URL may embed credentials.
            Self::Postgres { .. } => f.write_str("Postgres"),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on, binds to `0.0.0.0`
    /// - `KVSECRETS_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8300`)
    /// - `KVSECRETS_STORAGE`: `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL`: PostgreSQL connection string (default: `postgres://localhost/kvsecrets`)
    /// - `KVSECRETS_ENCRYPTION_KEY`: base64 32-byte key for stored values
    /// - `KVSECRETS_API_TOKEN`: bearer token for `/v1/secrets` and `/v1/keys`
    /// - `KVSECRETS_LOG_LEVEL`: log filter (default: `info`)
    ///
    /// plus everything read by [`SecretsConfig::from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Priority: KVSECRETS_BIND_ADDR > PORT > default 127.0.0.1:8300
        let bind_addr = if let Some(addr) = lookup("KVSECRETS_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
        } else if let Some(port_str) = lookup("PORT") {
            let port: u16 = port_str.parse().unwrap_or(DEFAULT_PORT);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
        };

        let storage_backend = match lookup("KVSECRETS_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => {
                let url = lookup("DATABASE_URL")
                    .unwrap_or_else(|| "postgres://localhost/kvsecrets".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let log_level = lookup("KVSECRETS_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            bind_addr,
            storage_backend,
            log_level,
            encryption_key: non_empty("KVSECRETS_ENCRYPTION_KEY"),
            api_token: non_empty("KVSECRETS_API_TOKEN"),
            secrets: SecretsConfig::from_lookup(&lookup),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.bind_addr, SocketAddr::from(([127, 0, 0, 1], 8300)));
        assert_eq!(cfg.storage_backend, StorageBackendType::Memory);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.api_token.is_none());
        assert!(cfg.encryption_key.is_none());
        assert_eq!(cfg.secrets.cache_ttl, Duration::from_secs(5));
    }

    #[test]
    fn bind_addr_beats_port() {
        let cfg = config(&[("KVSECRETS_BIND_ADDR", "10.0.0.1:9000"), ("PORT", "7000")]);
        assert_eq!(cfg.bind_addr, SocketAddr::from(([10, 0, 0, 1], 9000)));

        let cfg = config(&[("PORT", "7000")]);
        assert_eq!(cfg.bind_addr, SocketAddr::from(([0, 0, 0, 0], 7000)));
    }

    #[test]
    fn postgres_backend_reads_database_url() {
        let cfg = config(&[
            ("KVSECRETS_STORAGE", "Postgres"),
            ("DATABASE_URL", "postgres://u:p@db/secrets"),
        ]);
        assert_eq!(
            cfg.storage_backend,
            StorageBackendType::Postgres {
                url: "postgres://u:p@db/secrets".to_owned()
            }
        );
        assert!(!format!("{cfg:?}").contains("u:p@db"));
    }

    #[test]
    fn blank_token_disables_auth_and_secrets_are_redacted() {
        assert!(config(&[("KVSECRETS_API_TOKEN", "  ")]).api_token.is_none());

        let cfg = config(&[
            ("KVSECRETS_API_TOKEN", "s3cret-token"),
            ("KVSECRETS_CACHE_TTL_SECS", "30"),
        ]);
        assert_eq!(cfg.api_token.as_deref(), Some("s3cret-token"));
        assert_eq!(cfg.secrets.cache_ttl, Duration::from_secs(30));
        assert!(!format!("{cfg:?}").contains("s3cret-token"));
    }
}
