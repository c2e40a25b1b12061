//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger. Variants name the secret key they failed on, never
//! the secret value.

/// Errors that can occur during secret store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to open or migrate the storage backend.
    #[error("failed to open storage at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// Failed to read a secret.
    #[error("failed to read secret '{key}': {reason}")]
    Read { key: String, reason: String },

    /// Failed to write a secret.
    #[error("failed to write secret '{key}': {reason}")]
    Write { key: String, reason: String },

    /// Failed to delete a secret.
    #[error("failed to delete secret '{key}': {reason}")]
    Delete { key: String, reason: String },

    /// Failed to list secret keys.
    #[error("failed to list secrets matching '{key}': {reason}")]
    List { key: String, reason: String },

    /// Failed to move a secret to a new namespace.
    #[error("failed to rename secret '{key}' to namespace '{new_namespace}': {reason}")]
    Rename {
        key: String,
        new_namespace: String,
        reason: String,
    },

    /// The caller supplied a malformed key triple.
    #[error("invalid secret key: {reason}")]
    InvalidKey { reason: String },

    /// Encrypting or decrypting a stored value failed.
    #[error("secret cipher error: {reason}")]
    Cipher { reason: String },

    /// The remote secrets plugin rejected or failed the request.
    #[error("secrets plugin {operation} failed: {reason}")]
    Plugin {
        operation: &'static str,
        reason: String,
    },
}
