//! Secret key triple and validation rules shared by every backend.

use std::fmt;

use crate::StorageError;

/// Organization sentinel that matches every tenant in [`keys`] queries.
///
/// [`keys`]: crate::SecretsKvStore::keys
pub const ALL_ORGANIZATIONS: i64 = -1;

/// Identifies one secret record: tenant, namespace and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Owning organization (tenant).
    pub org_id: i64,
    /// Resource-scoped identifier, e.g. a data source name.
    pub namespace: String,
    /// Category tag, e.g. `datasource`.
    pub secret_type: String,
}

impl Key {
    #[must_use]
    pub fn new(org_id: i64, namespace: &str, secret_type: &str) -> Self {
        Self {
            org_id,
            namespace: namespace.to_owned(),
            secret_type: secret_type.to_owned(),
        }
    }

    /// Copy of this key with a different namespace.
    #[must_use]
    pub fn with_namespace(&self, namespace: &str) -> Self {
        Self {
            org_id: self.org_id,
            namespace: namespace.to_owned(),
            secret_type: self.secret_type.clone(),
        }
    }

    /// Whether this key is matched by a `keys` query for `org_id`.
    #[must_use]
    pub fn matches(&self, org_id: i64, namespace: &str, secret_type: &str) -> bool {
        (org_id == ALL_ORGANIZATIONS || self.org_id == org_id)
            && self.namespace == namespace
            && self.secret_type == secret_type
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org_id, self.secret_type, self.namespace)
    }
}

/// Validate a key addressing a single record (`get`, `set`, `del`, `rename`).
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] if the organization is negative
/// (including [`ALL_ORGANIZATIONS`]) or the namespace or type is empty.
pub fn validate_record_key(
    org_id: i64,
    namespace: &str,
    secret_type: &str,
) -> Result<(), StorageError> {
    if org_id < 0 {
        return Err(StorageError::InvalidKey {
            reason: format!("organization id must not be negative, got {org_id}"),
        });
    }
    validate_parts(namespace, secret_type)
}

/// Validate a `keys` query. [`ALL_ORGANIZATIONS`] is accepted here.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] for any other negative organization,
/// or an empty namespace or type.
pub fn validate_query_key(
    org_id: i64,
    namespace: &str,
    secret_type: &str,
) -> Result<(), StorageError> {
    if org_id < 0 && org_id != ALL_ORGANIZATIONS {
        return Err(StorageError::InvalidKey {
            reason: format!("organization id must be {ALL_ORGANIZATIONS} or positive, got {org_id}"),
        });
    }
    validate_parts(namespace, secret_type)
}

/// Validate the target namespace of a rename.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] if the namespace is empty.
pub fn validate_namespace(namespace: &str) -> Result<(), StorageError> {
    if namespace.is_empty() {
        return Err(StorageError::InvalidKey {
            reason: "namespace must not be empty".to_owned(),
        });
    }
    if namespace.contains('\0') {
        return Err(StorageError::InvalidKey {
            reason: "null bytes are not allowed in namespaces".to_owned(),
        });
    }
    Ok(())
}

fn validate_parts(namespace: &str, secret_type: &str) -> Result<(), StorageError> {
    validate_namespace(namespace)?;
    if secret_type.is_empty() {
        return Err(StorageError::InvalidKey {
            reason: "secret type must not be empty".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_rejects_all_organizations() {
        let err = validate_record_key(ALL_ORGANIZATIONS, "ns", "datasource");
        assert!(matches!(err, Err(StorageError::InvalidKey { .. })));
    }

    #[test]
    fn query_key_accepts_all_organizations() {
        assert!(validate_query_key(ALL_ORGANIZATIONS, "ns", "datasource").is_ok());
        assert!(validate_query_key(-2, "ns", "datasource").is_err());
    }

    #[test]
    fn empty_parts_are_rejected() {
        assert!(validate_record_key(1, "", "datasource").is_err());
        assert!(validate_record_key(1, "ns", "").is_err());
        assert!(validate_namespace("a\0b").is_err());
    }

    #[test]
    fn matches_respects_wildcard() {
        let key = Key::new(7, "influx-1", "datasource");
        assert!(key.matches(7, "influx-1", "datasource"));
        assert!(key.matches(ALL_ORGANIZATIONS, "influx-1", "datasource"));
        assert!(!key.matches(8, "influx-1", "datasource"));
        assert!(!key.matches(7, "influx-2", "datasource"));
    }

    #[test]
    fn display_orders_type_before_namespace() {
        assert_eq!(Key::new(1, "a", "x").to_string(), "1/x/a");
    }
}
