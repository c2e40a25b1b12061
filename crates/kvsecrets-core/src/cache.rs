//! TTL read cache in front of a [`SecretsKvStore`].
//!
//! Reads are served from an in-process table until their entry expires.
//! Writes (`set`, `del`, `rename`) always go to the wrapped store first and
//! only invalidate the affected entries once the store has accepted them, so
//! a failed write never touches the cache and a successful one is visible to
//! the very next `get`. `keys` is never cached.
//!
//! Expiry is checked on every read; the periodic sweep spawned by
//! [`CachedStore::spawn_sweeper`] only bounds memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use kvsecrets_storage::{Key, SecretsKvStore, StorageError};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Option<String>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Reads of one key currently fetching from the store, and how many writes
/// to that key completed since the first of them started.
#[derive(Debug, Default)]
struct InFlight {
    readers: usize,
    generation: u64,
}

/// Registration of one read in the in-flight map, released on drop
/// so a cancelled or failed read does not leave its key behind.
struct ReadTicket<'a> {
    cache: &'a CachedStore,
    key: Key,
    generation: u64,
}

impl ReadTicket<'_> {
    /// Whether no write to this key completed since the ticket was taken.
    fn is_current(&self) -> bool {
        self.cache
            .lock_in_flight()
            .get(&self.key)
            .is_some_and(|flight| flight.generation == self.generation)
    }
}

impl Drop for ReadTicket<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.cache.lock_in_flight();
        if let Some(flight) = in_flight.get_mut(&self.key) {
            flight.readers = flight.readers.saturating_sub(1);
            if flight.readers == 0 {
                in_flight.remove(&self.key);
            }
        }
    }
}

/// A [`SecretsKvStore`] decorator with a bounded-lifetime read cache.
pub struct CachedStore {
    store: Arc<dyn SecretsKvStore>,
    ttl: Duration,
    entries: RwLock<HashMap<Key, CacheEntry>>,
    /// Only keys with a read in progress are tracked, so the map stays as
    /// small as the number of concurrent readers.
    in_flight: Mutex<HashMap<Key, InFlight>>,
}

impl std::fmt::Debug for CachedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStore")
            .field("backend", &self.store.backend_name())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CachedStore {
    /// Wrap `store` with entries that live for `ttl`.
    #[must_use]
    pub fn new(store: Arc<dyn SecretsKvStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn SecretsKvStore> {
        &self.store
    }

    /// Number of entries held in the table.
    ///
    /// Expired entries count until a [`sweep`](Self::sweep) removes them;
    /// they are never served.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the table is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Evict every expired entry and return how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(entries.len())
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; nothing can be expired yet.
            ticker.tick().await;
            info!(interval_secs = interval.as_secs(), "secrets cache sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = cache.sweep().await;
                        if evicted > 0 {
                            debug!(evicted, "evicted expired secrets cache entries");
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("secrets cache sweeper shutting down");
                        return;
                    }
                }
            }
        })
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<Key, InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_read(&self, key: &Key) -> ReadTicket<'_> {
        let mut in_flight = self.lock_in_flight();
        let flight = in_flight.entry(key.clone()).or_default();
        flight.readers = flight.readers.saturating_add(1);
        ReadTicket {
            cache: self,
            key: key.clone(),
            generation: flight.generation,
        }
    }

    async fn invalidate(&self, keys: &[Key]) {
        let mut entries = self.entries.write().await;
        let mut in_flight = self.lock_in_flight();
        for key in keys {
            entries.remove(key);
            if let Some(flight) = in_flight.get_mut(key) {
                flight.generation = flight.generation.wrapping_add(1);
            }
        }
    }
}

#[async_trait::async_trait]
impl SecretsKvStore for CachedStore {
    async fn get(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Option<String>, StorageError> {
        let key = Key::new(org_id, namespace, secret_type);

        if let Some(entry) = self.entries.read().await.get(&key) {
            if !entry.is_expired(Instant::now()) {
                return Ok(entry.value.clone());
            }
        }

        let ticket = self.begin_read(&key);
        let value = self.store.get(org_id, namespace, secret_type).await?;

        // A write to this key that finished during the fetch may have
        // replaced what we read.
        let mut entries = self.entries.write().await;
        if ticket.is_current() {
            entries.insert(
                key,
                CacheEntry {
                    value: value.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
        Ok(value)
    }

    async fn set(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        self.store.set(org_id, namespace, secret_type, value).await?;
        self.invalidate(&[Key::new(org_id, namespace, secret_type)])
            .await;
        Ok(())
    }

    async fn del(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<(), StorageError> {
        self.store.del(org_id, namespace, secret_type).await?;
        self.invalidate(&[Key::new(org_id, namespace, secret_type)])
            .await;
        Ok(())
    }

    async fn keys(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
    ) -> Result<Vec<Key>, StorageError> {
        self.store.keys(org_id, namespace, secret_type).await
    }

    async fn rename(
        &self,
        org_id: i64,
        namespace: &str,
        secret_type: &str,
        new_namespace: &str,
    ) -> Result<(), StorageError> {
        self.store
            .rename(org_id, namespace, secret_type, new_namespace)
            .await?;
        let old = Key::new(org_id, namespace, secret_type);
        let new = old.with_namespace(new_namespace);
        self.invalidate(&[old, new]).await;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }
}
