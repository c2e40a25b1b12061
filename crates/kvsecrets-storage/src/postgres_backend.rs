//! PostgreSQL secret store, the production SQL backend.
//!
//! Stores all records in a single `secrets` table with a unique constraint
//! on `(org_id, namespace, type)`. Values are encrypted through a
//! [`SecretsCipher`] and stored base64-encoded; the database never sees
//! plaintext.
//!
//! Decrypted values are memoized per row id together with the ciphertext
//! they came from, so re-reading an unchanged row skips the cipher.
//!
//! Feature-gated behind `postgres-backend`. Uses `sqlx` with the Tokio
//! runtime for fully async operations.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::key::{validate_namespace, validate_query_key, validate_record_key};
use crate::{ALL_ORGANIZATIONS, Key, SecretsCipher, SecretsKvStore, StorageError};

/// Plaintexts keyed by row id.
///
/// An entry only answers for the exact ciphertext it was decrypted from.
/// Every write seals the value under a fresh nonce, so a changed row never
/// matches an old entry even when its timestamp does.
#[derive(Default)]
struct DecryptedMemo {
    rows: HashMap<i64, MemoEntry>,
}

struct MemoEntry {
    stored: String,
    value: String,
}

impl DecryptedMemo {
    fn lookup(&self, id: i64, stored: &str) -> Option<&str> {
        self.rows
            .get(&id)
            .filter(|entry| entry.stored == stored)
            .map(|entry| entry.value.as_str())
    }

    fn remember(&mut self, id: i64, stored: String, value: String) {
        self.rows.insert(id, MemoEntry { stored, value });
    }

    fn evict(&mut self, id: i64) {
        self.rows.remove(&id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// A secret store backed by PostgreSQL.
///
/// Thread-safe via `PgPool` (connection pool). All operations are fully async.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use kvsecrets_storage::{PostgresStore, SecretsCipher};
/// # async fn open(cipher: Arc<dyn SecretsCipher>) {
/// let store = PostgresStore::connect("postgres://localhost/kvsecrets", cipher)
///     .await
///     .unwrap();
/// # }
/// ```
pub struct PostgresStore {
    pool: PgPool,
    cipher: Arc<dyn SecretsCipher>,
    decrypted: Mutex<DecryptedMemo>,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"[PgPool]")
            .field("cipher", &"[SecretsCipher]")
            .finish_non_exhaustive()
    }
}

impl PostgresStore {
    /// Connect to PostgreSQL and create the `secrets` table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the connection or migration fails.
    pub async fn connect(
        database_url: &str,
        cipher: Arc<dyn SecretsCipher>,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Open {
                path: "[redacted database url]".to_owned(),
                reason: e.to_string(),
            })?;

        Self::with_pool(pool, cipher).await
    }

    /// Use an existing pool, creating the `secrets` table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the migration fails.
    pub async fn with_pool(
        pool: PgPool,
        cipher: Arc<dyn SecretsCipher>,
    ) -> Result<Self, StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS secrets (\
                id        BIGSERIAL   PRIMARY KEY, \
                org_id    BIGINT      NOT NULL, \
                namespace TEXT        NOT NULL, \
                type      TEXT        NOT NULL, \
                value     TEXT        NOT NULL, \
                created   TIMESTAMPTZ NOT NULL, \
                updated   TIMESTAMPTZ NOT NULL, \
                UNIQUE (org_id, namespace, type)\
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Open {
            path: "secrets".to_owned(),
            reason: format!("migration failed: {e}"),
        })?;
        debug!("secrets table ready");

        Ok(Self {
            pool,
            cipher,
            decrypted: Mutex::new(DecryptedMemo::default()),
        })
    }

    /// Return a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn decrypt_value(&self, key: &Key, stored: &str) -> Result<String, StorageError> {
        let ciphertext = BASE64.decode(stored).map_err(|e| StorageError::Read {
            key: key.to_string(),
            reason: format!("stored value is not valid base64: {e}"),
        })?;
        let plaintext = self.cipher.decrypt(&ciphertext)?;
        String::from_utf8(plaintext).map_err(|e| StorageError::Read {
            key: key.to_string(),
            reason: format!("decrypted value is not valid UTF-8: {e}"),
        })
    }
}

#[async_trait::async_trait]
impl SecretsKvStore for PostgresStore {
    async fn get(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Option<String>, StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;
        let key = Key::new(org_id, namespace, secret_type);

        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT id, value FROM secrets \
             WHERE org_id = $1 AND namespace = $2 AND type = $3",
        )
        .bind(org_id)
        .bind(namespace)
        .bind(secret_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Read {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let Some((id, stored)) = row else {
            return Ok(None);
        };

        let mut decrypted = self.decrypted.lock().await;
        if let Some(value) = decrypted.lookup(id, &stored) {
            return Ok(Some(value.to_owned()));
        }

        let value = self.decrypt_value(&key, &stored)?;
        decrypted.remember(id, stored, value.clone());
        Ok(Some(value))
    }

    async fn set(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;
        let encrypted = BASE64.encode(self.cipher.encrypt(value.as_bytes())?);
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO secrets (org_id, namespace, type, value, created, updated) \
             VALUES ($1, $2, $3, $4, $5, $5) \
             ON CONFLICT (org_id, namespace, type) \
             DO UPDATE SET value = EXCLUDED.value, updated = EXCLUDED.updated",
        )
        .bind(org_id)
        .bind(namespace)
        .bind(secret_type)
        .bind(encrypted)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let key = Key::new(org_id, namespace, secret_type);
            warn!(%key, error = %e, "secret upsert failed");
            StorageError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(())
    }

    async fn del(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<(), StorageError> {
        validate_record_key(org_id, namespace, secret_type)?;

        let removed: Option<(i64,)> = sqlx::query_as(
            "DELETE FROM secrets WHERE org_id = $1 AND namespace = $2 AND type = $3 \
             RETURNING id",
        )
        .bind(org_id)
        .bind(namespace)
        .bind(secret_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Delete {
            key: Key::new(org_id, namespace, secret_type).to_string(),
            reason: e.to_string(),
        })?;

        if let Some((id,)) = removed {
            self.decrypted.lock().await.evict(id);
        }
        Ok(())
    }

    async fn keys(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Vec<Key>, StorageError> {
        validate_query_key(org_id, namespace, secret_type)?;

        let query = if org_id == ALL_ORGANIZATIONS {
            sqlx::query_as(
                "SELECT org_id, namespace, type FROM secrets \
                 WHERE namespace = $1 AND type = $2 ORDER BY org_id",
            )
            .bind(namespace)
            .bind(secret_type)
        } else {
            sqlx::query_as(
                "SELECT org_id, namespace, type FROM secrets \
                 WHERE namespace = $1 AND type = $2 AND org_id = $3",
            )
            .bind(namespace)
            .bind(secret_type)
            .bind(org_id)
        };

        let rows: Vec<(i64, String, String)> =
            query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::List {
                    key: Key::new(org_id, namespace, secret_type).to_string(),
                    reason: e.to_string(),
                })?;

        Ok(rows
            .into_iter()
            .map(|(org_id, namespace, secret_type)| Key {
                org_id,
                namespace,
                secret_type,
            })
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
        if namespace == new_namespace {
            return Ok(());
        }

        let key = Key::new(org_id, namespace, secret_type);
        let rename_err = |e: sqlx::Error| {
            warn!(%key, new_namespace, error = %e, "secret rename failed");
            StorageError::Rename {
                key: key.to_string(),
                new_namespace: new_namespace.to_owned(),
                reason: e.to_string(),
            }
        };

        let mut tx = self.pool.begin().await.map_err(rename_err)?;

        let exists: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM secrets WHERE org_id = $1 AND namespace = $2 AND type = $3",
        )
        .bind(org_id)
        .bind(namespace)
        .bind(secret_type)
        .fetch_optional(&mut *tx)
        .await
        .map_err(rename_err)?;

        if exists.is_none() {
            tx.rollback().await.map_err(rename_err)?;
            return Ok(());
        }

        let replaced: Option<(i64,)> = sqlx::query_as(
            "DELETE FROM secrets WHERE org_id = $1 AND namespace = $2 AND type = $3 \
             RETURNING id",
        )
        .bind(org_id)
        .bind(new_namespace)
        .bind(secret_type)
        .fetch_optional(&mut *tx)
        .await
        .map_err(rename_err)?;

        sqlx::query(
            "UPDATE secrets SET namespace = $1, updated = $2 \
             WHERE org_id = $3 AND namespace = $4 AND type = $5",
        )
        .bind(new_namespace)
        .bind(Utc::now())
        .bind(org_id)
        .bind(namespace)
        .bind(secret_type)
        .execute(&mut *tx)
        .await
        .map_err(rename_err)?;

        tx.commit().await.map_err(rename_err)?;

        if let Some((id,)) = replaced {
            self.decrypted.lock().await.evict(id);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sql-postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memo_hits_only_for_the_same_ciphertext() {
        let mut memo = DecryptedMemo::default();
        memo.remember(7, "c2VhbGVkLTE=".to_owned(), "v1".to_owned());

        assert_eq!(memo.lookup(7, "c2VhbGVkLTE="), Some("v1"));
        assert_eq!(memo.lookup(8, "c2VhbGVkLTE="), None);
    }

    #[test]
    fn rewritten_row_is_decrypted_again() {
        let mut memo = DecryptedMemo::default();
        memo.remember(7, "c2VhbGVkLTE=".to_owned(), "v1".to_owned());

        // Same row id, new ciphertext: the old plaintext must not be served.
        assert_eq!(memo.lookup(7, "c2VhbGVkLTI="), None);

        memo.remember(7, "c2VhbGVkLTI=".to_owned(), "v2".to_owned());
        assert_eq!(memo.lookup(7, "c2VhbGVkLTI="), Some("v2"));
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn evicted_row_is_forgotten() {
        let mut memo = DecryptedMemo::default();
        memo.remember(7, "c2VhbGVkLTE=".to_owned(), "v1".to_owned());
        memo.remember(9, "b3RoZXI=".to_owned(), "other".to_owned());

        memo.evict(7);
        assert_eq!(memo.lookup(7, "c2VhbGVkLTE="), None);
        assert_eq!(memo.lookup(9, "b3RoZXI="), Some("other"));
        assert_eq!(memo.len(), 1);

        memo.evict(42);
        assert_eq!(memo.len(), 1);
    }
}
