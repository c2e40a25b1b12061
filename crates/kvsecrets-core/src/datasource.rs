//! Contracts for the external data-source record service.
//!
//! Data sources are owned elsewhere; the secrets layer only reads them, sets
//! the migration marker in their settings, and clears their legacy secure
//! payload. All access goes through one unit of work so a failed migration
//! can be rolled back as a whole.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DataSourceError;

/// Settings key marking that a record's secrets live in the KV store.
pub const SECRET_MIGRATION_COMPLETE: &str = "secretMigrationComplete";

/// A data-source record as seen by the secrets layer.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: i64,
    pub uid: String,
    pub org_id: i64,
    pub name: String,
    /// Free-form settings; may carry the migration marker.
    #[serde(default)]
    pub json_data: Map<String, Value>,
    /// Legacy inline secrets: field name to encrypted bytes.
    #[serde(default)]
    pub secure_json_data: HashMap<String, Vec<u8>>,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut secure_fields: Vec<&str> =
            self.secure_json_data.keys().map(String::as_str).collect();
        secure_fields.sort_unstable();
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .field("org_id", &self.org_id)
            .field("name", &self.name)
            .field("json_data", &self.json_data)
            .field("secure_fields", &secure_fields)
            .finish()
    }
}

impl DataSource {
    /// Whether this record's secrets were already migrated.
    #[must_use]
    pub fn secret_migration_complete(&self) -> bool {
        self.json_data
            .get(SECRET_MIGRATION_COMPLETE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Set the migration marker in the settings.
    pub fn mark_secret_migration_complete(&mut self) {
        self.json_data
            .insert(SECRET_MIGRATION_COMPLETE.to_owned(), Value::Bool(true));
    }

    /// Whether the record still carries a legacy inline payload.
    #[must_use]
    pub fn has_legacy_secrets(&self) -> bool {
        !self.secure_json_data.is_empty()
    }
}

/// Which records to list. `org_id: None` lists every tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataSourceQuery {
    pub org_id: Option<i64>,
}

/// Replace the settings of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDataSourceCommand {
    pub id: i64,
    pub uid: String,
    pub org_id: i64,
    pub json_data: Map<String, Value>,
}

/// Clear the legacy secure payload of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteDataSourceSecretsCommand {
    pub id: i64,
    pub uid: String,
    pub org_id: i64,
}

/// Decrypted legacy secrets, ordered so serialization is stable.
pub type DecryptedSecrets = BTreeMap<String, String>;

/// Opens units of work over the data-source records.
#[async_trait::async_trait]
pub trait DataSourceStore: Send + Sync {
    /// Begin a unit of work. Nothing done through it is durable until
    /// [`DataSourceTransaction::commit`].
    async fn begin(&self) -> Result<Box<dyn DataSourceTransaction>, DataSourceError>;
}

/// Record operations inside one unit of work.
#[async_trait::async_trait]
pub trait DataSourceTransaction: Send {
    async fn list_data_sources(
        &mut self,
        query: &DataSourceQuery,
    ) -> Result<Vec<DataSource>, DataSourceError>;

    async fn update_data_source(
        &mut self,
        cmd: &UpdateDataSourceCommand,
    ) -> Result<(), DataSourceError>;

    async fn delete_data_source_secrets(
        &mut self,
        cmd: &DeleteDataSourceSecretsCommand,
    ) -> Result<(), DataSourceError>;

    /// Decrypt a record's legacy secure payload.
    async fn decrypt_legacy_secrets(
        &mut self,
        ds: &DataSource,
    ) -> Result<DecryptedSecrets, DataSourceError>;

    async fn commit(self: Box<Self>) -> Result<(), DataSourceError>;

    async fn rollback(self: Box<Self>) -> Result<(), DataSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn influx() -> DataSource {
        DataSource {
            id: 1,
            uid: "abc".to_owned(),
            org_id: 7,
            name: "influx-1".to_owned(),
            json_data: Map::new(),
            secure_json_data: HashMap::from([("password".to_owned(), b"sealed".to_vec())]),
        }
    }

    #[test]
    fn marker_defaults_to_false() {
        let mut ds = influx();
        assert!(!ds.secret_migration_complete());

        ds.json_data
            .insert(SECRET_MIGRATION_COMPLETE.to_owned(), Value::String("yes".to_owned()));
        assert!(!ds.secret_migration_complete());

        ds.mark_secret_migration_complete();
        assert!(ds.secret_migration_complete());
    }

    #[test]
    fn debug_hides_secure_payload() {
        let debug = format!("{:?}", influx());
        assert!(debug.contains("password"));
        assert!(!debug.contains("115, 101"));
    }
}
