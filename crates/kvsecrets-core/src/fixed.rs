//! A secrets store view bound to one `(org, namespace, type)` triple.

use std::sync::Arc;

use kvsecrets_storage::{Key, SecretsKvStore, StorageError};

/// Addresses a single logical secret through a shared store.
///
/// Holds no state beyond the bound triple; caching and error handling are
/// whatever the wrapped store does.
#[derive(Clone)]
pub struct FixedKvStore {
    store: Arc<dyn SecretsKvStore>,
    org_id: i64,
    namespace: String,
    secret_type: String,
}

impl std::fmt::Debug for FixedKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedKvStore")
            .field("org_id", &self.org_id)
            .field("namespace", &self.namespace)
            .field("secret_type", &self.secret_type)
            .finish_non_exhaustive()
    }
}

impl FixedKvStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn SecretsKvStore>,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Self {
        Self {
            store,
            org_id,
            namespace: namespace.to_owned(),
            secret_type: secret_type.to_owned(),
        }
    }

    #[must_use]
    pub fn org_id(&self) -> i64 {
        self.org_id
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn secret_type(&self) -> &str {
        &self.secret_type
    }

    /// # Errors
    ///
    /// Propagates the wrapped store's error unchanged.
    pub async fn get(&self) -> Result<Option<String>, StorageError> {
        self.store
            .get(self.org_id, &self.namespace, &self.secret_type)
            .await
    }

    /// # Errors
    ///
    /// Propagates the wrapped store's error unchanged.
    pub async fn set(&self, value: &str) -> Result<(), StorageError> {
        self.store
            .set(self.org_id, &self.namespace, &self.secret_type, value)
            .await
    }

    /// # Errors
    ///
    /// Propagates the wrapped store's error unchanged.
    pub async fn del(&self) -> Result<(), StorageError> {
        self.store
            .del(self.org_id, &self.namespace, &self.secret_type)
            .await
    }

    /// # Errors
    ///
    /// Propagates the wrapped store's error unchanged.
    pub async fn keys(&self) -> Result<Vec<Key>, StorageError> {
        self.store
            .keys(self.org_id, &self.namespace, &self.secret_type)
            .await
    }

    /// Move the secret and re-point this view at `new_namespace`.
    ///
    /// The view keeps its old namespace if the store rejects the rename.
    ///
    /// # Errors
    ///
    /// Propagates the wrapped store's error unchanged.
    pub async fn rename(&mut self, new_namespace: &str) -> Result<(), StorageError> {
        self.store
            .rename(self.org_id, &self.namespace, &self.secret_type, new_namespace)
            .await?;
        new_namespace.clone_into(&mut self.namespace);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use kvsecrets_storage::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn operations_use_bound_triple() {
        let store = MemoryStore::new();
        let view = FixedKvStore::new(Arc::new(store.clone()), 4, "graphite", "datasource");

        view.set("s3cret").await.unwrap();
        assert_eq!(
            store.get(4, "graphite", "datasource").await.unwrap().as_deref(),
            Some("s3cret")
        );
        assert_eq!(view.get().await.unwrap().as_deref(), Some("s3cret"));
        assert_eq!(
            view.keys().await.unwrap(),
            vec![Key::new(4, "graphite", "datasource")]
        );

        view.del().await.unwrap();
        assert_eq!(view.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn rename_follows_the_secret() {
        let store = MemoryStore::new();
        let mut view = FixedKvStore::new(Arc::new(store.clone()), 4, "graphite", "datasource");
        view.set("s3cret").await.unwrap();

        view.rename("graphite-prod").await.unwrap();

        assert_eq!(view.namespace(), "graphite-prod");
        assert_eq!(view.get().await.unwrap().as_deref(), Some("s3cret"));
        assert_eq!(store.get(4, "graphite", "datasource").await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_rename_keeps_namespace() {
        let store = MemoryStore::new();
        let mut view = FixedKvStore::new(Arc::new(store), 4, "graphite", "datasource");
        view.set("s3cret").await.unwrap();

        assert!(view.rename("").await.is_err());
        assert_eq!(view.namespace(), "graphite");
        assert_eq!(view.get().await.unwrap().as_deref(), Some("s3cret"));
    }
}
