//! Error types for `kvsecrets-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Errors never include secret values or key material, only
//! key triples, record identifiers, or operation descriptions.

use kvsecrets_storage::StorageError;

/// Errors from the value cipher.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// Ciphertext is too short to contain a valid nonce + tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// Key material could not be decoded.
    #[error("invalid encryption key: {reason}")]
    InvalidKey { reason: String },
}

impl From<CryptoError> for StorageError {
    fn from(err: CryptoError) -> Self {
        Self::Cipher {
            reason: err.to_string(),
        }
    }
}

/// Error reported while starting or probing the remote secrets plugin.
#[derive(Debug, Clone, thiserror::Error)]
#[error("secrets plugin startup failed: {reason}")]
pub struct PluginStartupError {
    pub reason: String,
}

/// Fatal errors from backend selection. Startup must abort.
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// The plugin failed to start and a prior failure was recorded as fatal.
    #[error("secrets management plugin is required to start: {0}")]
    FatalPlugin(#[source] PluginStartupError),

    /// Whether the plugin failure is fatal could not be determined.
    #[error("could not determine whether the plugin error is fatal: {0}")]
    FatalCheck(#[source] StorageError),
}

/// Errors from the external data-source record service.
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    /// The record no longer exists.
    #[error("data source not found: {uid}")]
    NotFound { uid: String },

    /// Legacy secure fields could not be decrypted.
    #[error("failed to decrypt legacy secrets of data source '{uid}': {reason}")]
    Decrypt { uid: String, reason: String },

    /// The record service or its transaction failed.
    #[error("data source service error: {reason}")]
    Backend { reason: String },
}

/// Errors that abort a migration run. The whole unit of work is rolled back.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The data-source service failed.
    #[error("migration data source error: {0}")]
    DataSource(#[from] DataSourceError),

    /// Decrypted secrets could not be serialized.
    #[error("failed to serialize secrets of data source '{name}': {reason}")]
    Serialize { name: String, reason: String },

    /// Writing to the secrets store failed.
    #[error("failed to store secrets of data source '{name}': {source}")]
    Store {
        name: String,
        #[source]
        source: StorageError,
    },
}
