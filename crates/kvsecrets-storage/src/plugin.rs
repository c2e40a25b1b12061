//! Remote secrets-management plugin backend.
//!
//! [`SecretsPlugin`] is the client contract for an out-of-process secrets
//! manager. How the client talks to the process is up to the implementor;
//! [`PluginStore`] only adapts it to [`SecretsKvStore`], validating keys
//! locally and normalizing plugin failures into [`StorageError::Plugin`].

use std::sync::Arc;

use crate::key::{validate_namespace, validate_query_key, validate_record_key};
use crate::{Key, SecretsKvStore, StorageError};

/// Errors reported by a secrets plugin client.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The plugin process could not be reached or crashed mid-call.
    #[error("plugin unavailable: {reason}")]
    Unavailable { reason: String },

    /// The plugin handled the call and rejected it with a user-facing message.
    #[error("{message}")]
    Rejected { message: String },
}

/// Client for an out-of-process secrets manager.
#[async_trait::async_trait]
pub trait SecretsPlugin: Send + Sync + 'static {
    /// Fetch a secret; `Ok(None)` if the plugin has no record.
    async fn get_secret(&self, key: &Key) -> Result<Option<String>, PluginError>;

    /// Create or overwrite a secret.
    async fn set_secret(&self, key: &Key, value: &str) -> Result<(), PluginError>;

    /// Delete a secret.
    async fn delete_secret(&self, key: &Key) -> Result<(), PluginError>;

    /// List keys matching namespace and type; `org_id` may be the wildcard.
    async fn list_secrets(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Vec<Key>, PluginError>;

    /// Move a secret to a new namespace.
    async fn rename_secret(&self, key: &Key, new_namespace: &str) -> Result<(), PluginError>;
}

/// [`SecretsKvStore`] backed by a remote [`SecretsPlugin`].
#[derive(Clone)]
pub struct PluginStore {
    plugin: Arc<dyn SecretsPlugin>,
}

impl std::fmt::Debug for PluginStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginStore")
            .field("plugin", &"[SecretsPlugin]")
            .finish()
    }
}

impl PluginStore {
    #[must_use]
    pub fn new(plugin: Arc<dyn SecretsPlugin>) -> Self {
        Self { plugin }
    }
}

fn plugin_error(operation: &'static str, err: &PluginError) -> StorageError {
    StorageError::Plugin {
        operation,
        reason: err.to_string(),
    }
}

#[async_trait::async_trait]
impl SecretsKvStore for PluginStore {
    async fn get(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Option<String>, StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;
        self.plugin
            .get_secret(&Key::new(org_id, namespace, secret_type))
            .await
            .map_err(|e| plugin_error("get", &e))
    }

    async fn set(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;
        self.plugin
            .set_secret(&Key::new(org_id, namespace, secret_type), value)
            .await
            .map_err(|e| plugin_error("set", &e))
    }

    async fn del(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<(), StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;
        self.plugin
            .delete_secret(&Key::new(org_id, namespace, secret_type))
            .await
            .map_err(|e| plugin_error("delete", &e))
    }

    async fn keys(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Vec<Key>, StorageError> {
        validate_query_key(org_id, namespace, secret_type)?;
        self.plugin
            .list_secrets(org_id, namespace, secret_type)
            .await
            .map_err(|e| plugin_error("list", &e))
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
        self.plugin
            .rename_secret(&Key::new(org_id, namespace, secret_type), new_namespace)
            .await
            .map_err(|e| plugin_error("rename", &e))
    }

    fn backend_name(&self) -> &'static str {
        "plugin"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct FakePlugin {
        data: Mutex<BTreeMap<Key, String>>,
        offline: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakePlugin {
        fn check(&self) -> Result<(), PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(PluginError::Unavailable {
                    reason: "connection refused".to_owned(),
                });
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl SecretsPlugin for FakePlugin {
        async fn get_secret(&self, key: &Key) -> Result<Option<String>, PluginError> {
            self.check()?;
            Ok(self.data.lock().await.get(key).cloned())
        }

        async fn set_secret(&self, key: &Key, value: &str) -> Result<(), PluginError> {
            self.check()?;
            if value.is_empty() {
                return Err(PluginError::Rejected {
                    message: "secret value must not be empty".to_owned(),
                });
            }
            self.data.lock().await.insert(key.clone(), value.to_owned());
            Ok(())
        }

        async fn delete_secret(&self, key: &Key) -> Result<(), PluginError> {
            self.check()?;
            self.data.lock().await.remove(key);
            Ok(())
        }

        async fn list_secrets(
            &self,
            org_id: i64,
            namespace: &str,
            secret_type: &str,
        ) -> Result<Vec<Key>, PluginError> {
            self.check()?;
            Ok(self
                .data
                .lock()
                .await
                .keys()
                .filter(|k| k.matches(org_id, namespace, secret_type))
                .cloned()
                .collect())
        }

        async fn rename_secret(&self, key: &Key, new_namespace: &str) -> Result<(), PluginError> {
            self.check()?;
            let mut data = self.data.lock().await;
            if let Some(v) = data.remove(key) {
                data.insert(key.with_namespace(new_namespace), v);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn delegates_to_plugin() {
        let plugin = Arc::new(FakePlugin::default());
        let store = PluginStore::new(Arc::clone(&plugin) as Arc<dyn SecretsPlugin>);

        store.set(3, "mysql", "datasource", "pw").await.unwrap();
        store.rename(3, "mysql", "datasource", "mysql-2").await.unwrap();

        assert_eq!(store.get(3, "mysql", "datasource").await.unwrap(), None);
        assert_eq!(
            store.get(3, "mysql-2", "datasource").await.unwrap().as_deref(),
            Some("pw")
        );
        assert_eq!(
            store.keys(3, "mysql-2", "datasource").await.unwrap(),
            vec![Key::new(3, "mysql-2", "datasource")]
        );
        assert_eq!(store.backend_name(), "plugin");
    }

    #[tokio::test]
    async fn plugin_failures_become_storage_errors() {
        let plugin = Arc::new(FakePlugin::default());
        plugin.offline.store(true, Ordering::SeqCst);
        let store = PluginStore::new(plugin);

        let err = store.get(1, "a", "datasource").await.unwrap_err();
        assert!(matches!(err, StorageError::Plugin { operation: "get", .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn rejection_message_is_surfaced() {
        let store = PluginStore::new(Arc::new(FakePlugin::default()));
        let err = store.set(1, "a", "datasource", "").await.unwrap_err();
        assert!(err.to_string().contains("secret value must not be empty"));
    }

    #[tokio::test]
    async fn invalid_keys_never_reach_the_plugin() {
        let plugin = Arc::new(FakePlugin::default());
        let store = PluginStore::new(Arc::clone(&plugin) as Arc<dyn SecretsPlugin>);

        assert!(store.del(1, "", "datasource").await.is_err());
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);
    }
}
