//! In-memory SQL-equivalent secret table.
//!
//! Stores all records in a `BTreeMap` keyed by [`Key`] behind a `RwLock`.
//! It is not persistent: all data is lost when the process exits. Use this
//! for development servers and tests where you need a real store without a
//! database.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::key::{validate_namespace, validate_query_key, validate_record_key};
use crate::{Key, SecretsKvStore, StorageError};

#[derive(Debug, Clone)]
struct StoredSecret {
    value: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

/// An in-memory secret store with the same semantics as the SQL backend.
///
/// Clones share state, so a test can keep a handle to mutate the table
/// behind the back of a decorator.
///
/// # Examples
///
/// ```
/// # use kvsecrets_storage::{MemoryStore, SecretsKvStore};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.set(1, "prometheus", "datasource", "{}").await.unwrap();
/// let val = store.get(1, "prometheus", "datasource").await.unwrap();
/// assert_eq!(val.as_deref(), Some("{}"));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<Key, StoredSecret>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all tenants.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Creation time of a record, if it exists. Preserved across renames.
    pub async fn created_at(&self, key: &Key) -> Option<DateTime<Utc>> {
        self.data.read().await.get(key).map(|s| s.created)
    }

    /// Last-modified time of a record, if it exists.
    pub async fn updated_at(&self, key: &Key) -> Option<DateTime<Utc>> {
        self.data.read().await.get(key).map(|s| s.updated)
    }
}

#[async_trait::async_trait]
impl SecretsKvStore for MemoryStore {
    async fn get(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Option<String>, StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;
        let data = self.data.read().await;
        Ok(data
            .get(&Key::new(org_id, namespace, secret_type))
            .map(|s| s.value.clone()))
    }

    async fn set(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;
        let now = Utc::now();
        let mut data = self.data.write().await;
        data.entry(Key::new(org_id, namespace, secret_type))
            .and_modify(|s| {
                value.clone_into(&mut s.value);
                s.updated = now;
            })
            .or_insert_with(|| StoredSecret {
                value: value.to_owned(),
                created: now,
                updated: now,
            });
        Ok(())
    }

    async fn del(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<(), StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;
        let mut data = self.data.write().await;
        data.remove(&Key::new(org_id, namespace, secret_type));
        Ok(())
    }

    async fn keys(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Vec<Key>, StorageError> {
        validate_query_key(org_id, namespace, secret_type)?;
        let data = self.data.read().await;
        Ok(data
            .keys()
            .filter(|k| k.matches(org_id, namespace, secret_type))
            .cloned()
            .collect())
    }

    async fn rename(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
        new_namespace: &str,
    ) -> Result<(), StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;
        validate_namespace(new_namespace)?;
        let old = Key::new(org_id, namespace, secret_type);
        let mut data = self.data.write().await;
        if let Some(mut secret) = data.remove(&old) {
            secret.updated = Utc::now();
            data.insert(old.with_namespace(new_namespace), secret);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sql-memory"
    }
}
