//! Secrets KV store abstraction for `kvsecrets`.
//!
//! This crate defines the [`SecretsKvStore`] trait, a tenant-scoped
//! key-value contract for sensitive configuration values. A record is
//! addressed by `(org_id, namespace, type)` and holds an opaque string.
//!
//! Two families of backends are provided:
//!
//! - SQL: [`MemoryStore`] (an in-process table, for development and tests)
//!   and [`PostgresStore`] (feature `postgres-backend`), which encrypts every
//!   value through a [`SecretsCipher`] before it reaches the database.
//! - Plugin: [`PluginStore`] adapts an out-of-process [`SecretsPlugin`] to
//!   the same contract.
//!
//! Caching and backend selection live above this layer, in `kvsecrets-core`.

mod error;
mod key;
mod memory;
mod plugin;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;

pub use error::StorageError;
pub use key::{
    ALL_ORGANIZATIONS, Key, validate_namespace, validate_query_key, validate_record_key,
};
pub use memory::MemoryStore;
pub use plugin::{PluginError, PluginStore, SecretsPlugin};
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresStore;

/// A pluggable, tenant-scoped secrets key-value store.
///
/// At most one record exists per `(org_id, namespace, secret_type)` triple.
/// Implementations must be safe to share across async tasks (`Send + Sync`)
/// and must reject malformed keys with [`StorageError::InvalidKey`].
#[async_trait::async_trait]
pub trait SecretsKvStore: Send + Sync + 'static {
    /// Retrieve a secret value.
    ///
    /// Returns `Ok(None)` if no record exists for the triple.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Option<String>, StorageError>;

    /// Create or overwrite a secret value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn set(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
        value: &str,
    ) -> Result<(), StorageError>;

    /// Delete a secret. Deleting a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn del(&self, org_id: i64, namespace: &str, secret_type: &str)
    -> Result<(), StorageError>;

    /// List the keys matching `namespace` and `secret_type` exactly.
    ///
    /// Pass [`ALL_ORGANIZATIONS`] as `org_id` to match every tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn keys(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Vec<Key>, StorageError>;

    /// Move a secret to `new_namespace` within the same tenant and type.
    ///
    /// The old key ceases to exist; a record already at the new key is
    /// replaced. Renaming a missing record is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Rename`] if the underlying backend fails.
    async fn rename(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
        new_namespace: &str,
    ) -> Result<(), StorageError>;

    /// Short backend identifier for logs and health output.
    fn backend_name(&self) -> &'static str;
}

/// Symmetric cipher used by SQL backends to protect values at rest.
///
/// The algorithm is up to the implementation; the store only requires that
/// `decrypt(encrypt(x)) == x`.
pub trait SecretsCipher: Send + Sync + 'static {
    /// Encrypt a plaintext value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cipher`] if encryption fails.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError>;

    /// Decrypt a value produced by [`encrypt`](SecretsCipher::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cipher`] if the ciphertext is corrupt or was
    /// produced with another key.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StorageError>;
}
