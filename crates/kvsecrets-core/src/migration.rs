//! One-time migration of legacy data-source secrets into the secrets store.
//!
//! Data sources used to carry their credentials inline, encrypted, in a
//! `secure_json_data` payload. The migration copies each record's decrypted
//! payload into the secrets store under `(org_id, name, "datasource")` and
//! sets the `secretMigrationComplete` marker on the record. When secrets
//! compatibility is disabled it also clears the inline payload.
//!
//! # Phases
//!
//! 1. **Await provisioning.** The engine subscribes to
//!    [`DataSourceCreated`] events when it is constructed and waits until no
//!    event has arrived for the configured quiet period. This narrows, but
//!    does not close, the window in which a freshly provisioned record is
//!    missed by the pass below.
//! 2. **Migrate.** All records of all tenants are processed in one unit of
//!    work. Any error rolls the whole unit back. Values already written to
//!    the secrets store are not rolled back, so the per-record marker (which
//!    is part of the rolled-back unit) decides what a re-run migrates.
//!
//! # Wiring
//!
//! Build the engine at startup, before data sources are provisioned, and
//! let it finish in the background:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use kvsecrets_core::config::SecretsConfig;
//! # use kvsecrets_core::datasource::DataSourceStore;
//! # use kvsecrets_core::events::EventBus;
//! # use kvsecrets_core::migration::DataSourceSecretMigration;
//! # use kvsecrets_storage::SecretsKvStore;
//! # async fn start(data_sources: Arc<dyn DataSourceStore>, secrets: Arc<dyn SecretsKvStore>) {
//! let config = SecretsConfig::from_env();
//! let bus = EventBus::new();
//!
//! // Subscribes now, so provisioning below postpones the pass.
//! let handle = DataSourceSecretMigration::new(&config, data_sources, secrets, &bus).spawn();
//!
//! // ... provision data sources, publishing `DataSourceCreated` on `bus` ...
//!
//! match handle.await {
//!     Ok(Ok(report)) => tracing::info!(migrated = report.migrated, "secrets migrated"),
//!     Ok(Err(e)) => tracing::error!(error = %e, "secrets migration failed"),
//!     Err(e) => tracing::error!(error = %e, "secrets migration task panicked"),
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use kvsecrets_storage::SecretsKvStore;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SecretsConfig;
use crate::datasource::{
    DataSourceQuery, DataSourceStore, DataSourceTransaction, DeleteDataSourceSecretsCommand,
    UpdateDataSourceCommand,
};
use crate::error::MigrationError;
use crate::events::{DataSourceCreated, EventBus};

/// Secret type under which data-source secrets are stored.
pub const DATASOURCE_SECRET_TYPE: &str = "datasource";

/// Outcome of one migration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records visited.
    pub total: usize,
    /// Records whose secrets were copied in this pass.
    pub migrated: usize,
    /// Records already carrying the completion marker.
    pub skipped: usize,
    /// Records whose legacy payload was cleared.
    pub purged: usize,
}

/// Moves legacy data-source secrets into a [`SecretsKvStore`].
pub struct DataSourceSecretMigration {
    data_sources: Arc<dyn DataSourceStore>,
    secrets: Arc<dyn SecretsKvStore>,
    events: broadcast::Receiver<DataSourceCreated>,
    subscribed_at: Instant,
    quiet_period: Duration,
    disable_secrets_compatibility: bool,
}

impl std::fmt::Debug for DataSourceSecretMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceSecretMigration")
            .field("backend", &self.secrets.backend_name())
            .field("quiet_period", &self.quiet_period)
            .field(
                "disable_secrets_compatibility",
                &self.disable_secrets_compatibility,
            )
            .finish_non_exhaustive()
    }
}

impl DataSourceSecretMigration {
    /// Create the engine and subscribe to provisioning events on `bus`.
    ///
    /// Events published after this call count towards the provisioning wait,
    /// even if [`run`](Self::run) is called later.
    #[must_use]
    pub fn new(
        config: &SecretsConfig,
        data_sources: Arc<dyn DataSourceStore>,
        secrets: Arc<dyn SecretsKvStore>,
        bus: &EventBus,
    ) -> Self {
        Self {
            data_sources,
            secrets,
            events: bus.subscribe(),
            subscribed_at: Instant::now(),
            quiet_period: config.provisioning_quiet_period,
            disable_secrets_compatibility: config.disable_secrets_compatibility,
        }
    }

    /// Wait for provisioning to settle, then migrate.
    ///
    /// # Errors
    ///
    /// Returns the first [`MigrationError`]; the unit of work is rolled back.
    pub async fn run(&mut self) -> Result<MigrationReport, MigrationError> {
        self.wait_for_provisioning().await;
        self.migrate().await
    }

    /// Run the engine as an independent task.
    pub fn spawn(mut self) -> JoinHandle<Result<MigrationReport, MigrationError>> {
        tokio::spawn(async move {
            let result = self.run().await;
            if let Err(ref e) = result {
                error!(error = %e, "data source secret migration failed");
            }
            result
        })
    }

    /// Block until no data source has been created for the quiet period.
    ///
    /// Returns the number of creation events observed. Unbounded while
    /// events keep arriving.
    pub async fn wait_for_provisioning(&mut self) -> usize {
        let mut last_activity = self.subscribed_at;
        let mut observed = 0usize;
        let mut bus_open = true;

        loop {
            let quiet_until = last_activity + self.quiet_period;
            if !bus_open {
                tokio::time::sleep_until(quiet_until).await;
                break;
            }

            tokio::select! {
                biased;
                received = self.events.recv() => match received {
                    Ok(event) => {
                        debug!(org_id = event.org_id, uid = %event.uid, "data source provisioned, postponing secret migration");
                        observed = observed.saturating_add(1);
                        last_activity = Instant::now();
                    }
                    Err(RecvError::Lagged(missed)) => {
                        observed = observed.saturating_add(usize::try_from(missed).unwrap_or(usize::MAX));
                        last_activity = Instant::now();
                    }
                    Err(RecvError::Closed) => {
                        bus_open = false;
                    }
                },
                () = tokio::time::sleep_until(quiet_until) => break,
            }
        }

        // Later runs measure quiet time from here.
        self.subscribed_at = last_activity;
        observed
    }

    /// Migrate every data source in one unit of work, without waiting.
    ///
    /// # Errors
    ///
    /// Returns the first [`MigrationError`]; the unit of work is rolled back.
    pub async fn migrate(&self) -> Result<MigrationReport, MigrationError> {
        let mut tx = self.data_sources.begin().await?;

        match self.migrate_in(&mut *tx).await {
            Ok(report) => {
                tx.commit().await?;
                info!(
                    total = report.total,
                    migrated = report.migrated,
                    skipped = report.skipped,
                    purged = report.purged,
                    "data source secret migration complete"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "failed to roll back data source secret migration");
                }
                Err(e)
            }
        }
    }

    async fn migrate_in(
        &self,
        tx: &mut dyn DataSourceTransaction,
    ) -> Result<MigrationReport, MigrationError> {
        let records = tx.list_data_sources(&DataSourceQuery::default()).await?;
        debug!(count = records.len(), "starting data source secret migration");

        let mut report = MigrationReport {
            total: records.len(),
            ..MigrationReport::default()
        };

        for mut ds in records {
            if ds.secret_migration_complete() {
                report.skipped = report.skipped.saturating_add(1);
            } else {
                let decrypted = tx.decrypt_legacy_secrets(&ds).await?;
                let serialized =
                    serde_json::to_string(&decrypted).map_err(|e| MigrationError::Serialize {
                        name: ds.name.clone(),
                        reason: e.to_string(),
                    })?;

                self.secrets
                    .set(ds.org_id, &ds.name, DATASOURCE_SECRET_TYPE, &serialized)
                    .await
                    .map_err(|source| MigrationError::Store {
                        name: ds.name.clone(),
                        source,
                    })?;

                ds.mark_secret_migration_complete();
                tx.update_data_source(&UpdateDataSourceCommand {
                    id: ds.id,
                    uid: ds.uid.clone(),
                    org_id: ds.org_id,
                    json_data: ds.json_data.clone(),
                })
                .await?;

                debug!(org_id = ds.org_id, uid = %ds.uid, "migrated data source secrets");
                report.migrated = report.migrated.saturating_add(1);
            }

            if self.disable_secrets_compatibility && ds.has_legacy_secrets() {
                tx.delete_data_source_secrets(&DeleteDataSourceSecretsCommand {
                    id: ds.id,
                    uid: ds.uid.clone(),
                    org_id: ds.org_id,
                })
                .await?;
                debug!(org_id = ds.org_id, uid = %ds.uid, "purged legacy data source secrets");
                report.purged = report.purged.saturating_add(1);
            }
        }

        Ok(report)
    }
}
