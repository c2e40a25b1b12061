//! PostgreSQL backend tests.
//!
//! Run against a live database by setting `DATABASE_URL`; every test returns
//! early when it is unset. Each test works in its own namespaces so they can
//! share one `secrets` table.

#![cfg(feature = "postgres-backend")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use kvsecrets_storage::{PostgresStore, SecretsCipher, SecretsKvStore, StorageError};

/// Reversible test cipher: an 8-byte counter prefix stands in for a nonce so
/// sealing the same plaintext twice gives different bytes.
#[derive(Default)]
struct CountingCipher {
    seals: AtomicU64,
    opens: AtomicUsize,
    fail_open: AtomicBool,
}

impl SecretsCipher for CountingCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let nonce = self.seals.fetch_add(1, Ordering::SeqCst);
        let mut sealed = nonce.to_be_bytes().to_vec();
        sealed.extend(plaintext.iter().map(|b| b ^ 0x5a));
        Ok(sealed)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StorageError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StorageError::Cipher {
                reason: "authentication failed".to_owned(),
            });
        }
        let body = ciphertext.get(8..).ok_or_else(|| StorageError::Cipher {
            reason: "ciphertext too short".to_owned(),
        })?;
        Ok(body.iter().map(|b| b ^ 0x5a).collect())
    }
}

async fn open() -> Option<(PostgresStore, Arc<CountingCipher>)> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        return None;
    };
    let cipher = Arc::new(CountingCipher::default());
    let store = PostgresStore::connect(&url, cipher.clone()).await.unwrap();
    Some((store, cipher))
}

/// Namespace unique to this test run.
fn ns(name: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{name}-{}-{nanos}", std::process::id())
}

async fn overwrite_stored(store: &PostgresStore, org_id: i64, namespace: &str, stored: &str) {
    // Leaves `updated` untouched on purpose.
    sqlx::query(
        "UPDATE secrets SET value = $1 \
         WHERE org_id = $2 AND namespace = $3 AND type = 'datasource'",
    )
    .bind(stored)
    .bind(org_id)
    .bind(namespace)
    .execute(store.pool())
    .await
    .unwrap();
}

#[tokio::test]
async fn set_upserts_in_place() {
    let Some((store, _)) = open().await else { return };
    let namespace = ns("upsert");

    assert_eq!(store.get(1, &namespace, "datasource").await.unwrap(), None);
    store.set(1, &namespace, "datasource", "v1").await.unwrap();
    store.set(1, &namespace, "datasource", "v2").await.unwrap();

    assert_eq!(
        store.get(1, &namespace, "datasource").await.unwrap().as_deref(),
        Some("v2")
    );
    let keys = store.keys(1, &namespace, "datasource").await.unwrap();
    assert_eq!(keys.len(), 1);
}

#[tokio::test]
async fn values_are_stored_encrypted() {
    let Some((store, _)) = open().await else { return };
    let namespace = ns("sealed");
    store.set(1, &namespace, "datasource", "plain").await.unwrap();

    let (stored,): (String,) = sqlx::query_as(
        "SELECT value FROM secrets WHERE org_id = 1 AND namespace = $1 AND type = 'datasource'",
    )
    .bind(&namespace)
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_ne!(stored, "plain");
    assert!(BASE64.decode(&stored).is_ok());
}

#[tokio::test]
async fn unchanged_row_is_decrypted_once() {
    let Some((store, cipher)) = open().await else { return };
    let namespace = ns("memo");
    store.set(1, &namespace, "datasource", "v").await.unwrap();

    for _ in 0..3 {
        assert_eq!(
            store.get(1, &namespace, "datasource").await.unwrap().as_deref(),
            Some("v")
        );
    }
    assert_eq!(cipher.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_ciphertext_with_same_timestamp_is_not_served_stale() {
    let Some((store, cipher)) = open().await else { return };
    let namespace = ns("same-updated");
    store.set(1, &namespace, "datasource", "v1").await.unwrap();
    assert_eq!(
        store.get(1, &namespace, "datasource").await.unwrap().as_deref(),
        Some("v1")
    );

    let sealed = BASE64.encode(cipher.encrypt(b"v2").unwrap());
    overwrite_stored(&store, 1, &namespace, &sealed).await;

    assert_eq!(
        store.get(1, &namespace, "datasource").await.unwrap().as_deref(),
        Some("v2")
    );
}

#[tokio::test]
async fn deleted_then_recreated_reads_new_value() {
    let Some((store, _)) = open().await else { return };
    let namespace = ns("del");
    store.set(1, &namespace, "datasource", "old").await.unwrap();
    store.get(1, &namespace, "datasource").await.unwrap();

    store.del(1, &namespace, "datasource").await.unwrap();
    assert_eq!(store.get(1, &namespace, "datasource").await.unwrap(), None);
    store.del(1, &namespace, "datasource").await.unwrap();

    store.set(1, &namespace, "datasource", "new").await.unwrap();
    assert_eq!(
        store.get(1, &namespace, "datasource").await.unwrap().as_deref(),
        Some("new")
    );
}

#[tokio::test]
async fn rename_replaces_existing_target() {
    let Some((store, _)) = open().await else { return };
    let from = ns("rename-from");
    let to = ns("rename-to");
    store.set(1, &from, "datasource", "moved").await.unwrap();
    store.set(1, &to, "datasource", "replaced").await.unwrap();
    store.get(1, &to, "datasource").await.unwrap();

    store.rename(1, &from, "datasource", &to).await.unwrap();

    assert_eq!(store.get(1, &from, "datasource").await.unwrap(), None);
    assert_eq!(
        store.get(1, &to, "datasource").await.unwrap().as_deref(),
        Some("moved")
    );
    assert_eq!(store.keys(1, &to, "datasource").await.unwrap().len(), 1);
}

#[tokio::test]
async fn rename_to_same_namespace_or_missing_source_is_noop() {
    let Some((store, _)) = open().await else { return };
    let namespace = ns("rename-same");
    store.set(1, &namespace, "datasource", "v").await.unwrap();

    store
        .rename(1, &namespace, "datasource", &namespace)
        .await
        .unwrap();
    assert_eq!(
        store.get(1, &namespace, "datasource").await.unwrap().as_deref(),
        Some("v")
    );

    let missing = ns("rename-missing");
    let target = ns("rename-target");
    store.rename(1, &missing, "datasource", &target).await.unwrap();
    assert_eq!(store.get(1, &target, "datasource").await.unwrap(), None);
}

#[tokio::test]
async fn corrupt_base64_is_a_read_error() {
    let Some((store, _)) = open().await else { return };
    let namespace = ns("corrupt");
    store.set(1, &namespace, "datasource", "v").await.unwrap();
    overwrite_stored(&store, 1, &namespace, "not base64!!").await;

    let err = store.get(1, &namespace, "datasource").await.unwrap_err();
    assert!(
        matches!(&err, StorageError::Read { reason, .. } if reason.contains("base64")),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn cipher_failure_is_propagated() {
    let Some((store, cipher)) = open().await else { return };
    let namespace = ns("cipher-fail");
    store.set(1, &namespace, "datasource", "v").await.unwrap();
    cipher.fail_open.store(true, Ordering::SeqCst);

    let err = store.get(1, &namespace, "datasource").await.unwrap_err();
    assert!(matches!(err, StorageError::Cipher { .. }));
}
