// Backup Manager - end-to-end orchestration of one backup run

use super::policy::BackupPolicy;
use super::types::{BackupError, BackupResult, Outcome, PerformReport, Side};
use crate::clients::{ExportClient, SnapshotStore};
use crate::clock::{Clock, SystemClock};
use crate::config::BackupConfig;
use crate::keys::KeyResolver;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Clients and destination bucket for one region
#[derive(Clone)]
pub struct RegionClients {
    /// Snapshot API of the region
    pub store: Arc<dyn SnapshotStore>,
    /// Export API of the region
    pub exporter: Arc<dyn ExportClient>,
    /// Bucket receiving this region's exports
    pub bucket: String,
}

impl RegionClients {
    /// Bundle the clients of one region with its export bucket.
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        exporter: Arc<dyn ExportClient>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            exporter,
            bucket: bucket.into(),
        }
    }

    /// Region the clients talk to
    pub fn region(&self) -> &str {
        self.store.region()
    }
}

/// Drives snapshot creation, cross-region copy, exports and retention for a
/// single database instance.
///
/// A manager holds no per-run state; every run gets its own [`BackupResult`].
pub struct BackupManager {
    pub(crate) db_identifier: String,
    pub(crate) source: RegionClients,
    pub(crate) target: RegionClients,
    pub(crate) keys: Arc<dyn KeyResolver>,
    pub(crate) kms_key_id: String,
    pub(crate) export_role_arn: String,
    pub(crate) export_source: bool,
    pub(crate) keep_source_snapshot: bool,
    pub(crate) policy: BackupPolicy,
    pub(crate) clock: Arc<dyn Clock>,
}

impl BackupManager {
    /// Start building a manager for `db_identifier`.
    pub fn builder(db_identifier: impl Into<String>) -> BackupManagerBuilder {
        BackupManagerBuilder::new(db_identifier)
    }

    /// Instance being backed up
    pub fn db_identifier(&self) -> &str {
        &self.db_identifier
    }

    /// Timing and retention policy
    pub fn policy(&self) -> &BackupPolicy {
        &self.policy
    }

    /// Current time on the manager's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fresh result record stamped with the current time.
    pub fn new_result(&self) -> BackupResult {
        BackupResult::new(&self.db_identifier, self.clock.now())
    }

    pub(crate) fn region(&self, side: Side) -> &RegionClients {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }

    /// Resolve the configured key in the region of `side` and make sure it is usable.
    pub async fn resolve_key(&self, side: Side) -> Result<String, BackupError> {
        let region = self.region(side).region();
        let key_arn = self
            .keys
            .resolve_key(region, &self.kms_key_id)
            .await
            .map_err(|source| BackupError::Key { side, source })?;
        self.keys
            .verify_key_usable(&key_arn)
            .await
            .map_err(|source| BackupError::Key { side, source })?;
        Ok(key_arn)
    }

    /// Run the whole workflow.
    ///
    /// Success is decided by key resolution, the source stage and the
    /// cross-region stage. Retention cleanup and deletion of the source
    /// snapshot are best-effort and only show up in the returned report.
    #[instrument(skip(self, result), fields(db = %self.db_identifier))]
    pub async fn perform(&self, result: &mut BackupResult) -> Result<PerformReport, BackupError> {
        let source_key = self.resolve_key(Side::Source).await?;
        let target_key = self.resolve_key(Side::Target).await?;

        let source_snapshot_id = self
            .create_and_export_source_snapshot(self.export_source, &source_key, result)
            .await?;
        result.snapshot_id = Some(source_snapshot_id.clone());

        let target_snapshot_id = self
            .copy_and_export_to_target(&source_snapshot_id, &target_key, result)
            .await?;
        result.target_snapshot_id = Some(target_snapshot_id.clone());

        let cleanup = Outcome::best_effort("Cleanup of old snapshots", self.cleanup_old_snapshots().await);

        let source_deletion = if self.keep_source_snapshot {
            Outcome::Skipped
        } else {
            Outcome::best_effort(
                "Deleting source snapshot",
                self.source
                    .store
                    .delete_snapshot(&source_snapshot_id)
                    .await
                    .map_err(BackupError::from),
            )
        };

        info!("Backup completed successfully");
        info!("Snapshot ID: {}", target_snapshot_id);
        for uri in result.location_uris() {
            info!("S3 Location: {}", uri);
        }

        Ok(PerformReport {
            source_snapshot_id,
            target_snapshot_id,
            cleanup,
            source_deletion,
        })
    }
}

/// Builder for [`BackupManager`]
pub struct BackupManagerBuilder {
    db_identifier: String,
    source: Option<RegionClients>,
    target: Option<RegionClients>,
    keys: Option<(Arc<dyn KeyResolver>, String)>,
    export_role_arn: Option<String>,
    export_source: bool,
    keep_source_snapshot: bool,
    policy: BackupPolicy,
    clock: Option<Arc<dyn Clock>>,
}

impl BackupManagerBuilder {
    fn new(db_identifier: impl Into<String>) -> Self {
        Self {
            db_identifier: db_identifier.into(),
            source: None,
            target: None,
            keys: None,
            export_role_arn: None,
            export_source: false,
            keep_source_snapshot: true,
            policy: BackupPolicy::default(),
            clock: None,
        }
    }

    /// Apply flags, export role and timing policy from configuration.
    pub fn configure(self, config: &BackupConfig) -> Self {
        self.export_role(&config.export_role_arn)
            .export_source(config.store_to_source_s3)
            .keep_source_snapshot(config.keep_source_snapshot)
            .policy(config.policy())
    }

    /// Clients of the region the database lives in. Required.
    pub fn source(mut self, clients: RegionClients) -> Self {
        self.source = Some(clients);
        self
    }

    /// Clients of the region receiving the copy. Required.
    pub fn target(mut self, clients: RegionClients) -> Self {
        self.target = Some(clients);
        self
    }

    /// Key resolver and the logical key id resolved in both regions. Required.
    pub fn keys(mut self, resolver: Arc<dyn KeyResolver>, kms_key_id: impl Into<String>) -> Self {
        self.keys = Some((resolver, kms_key_id.into()));
        self
    }

    /// IAM role the export service assumes. Required.
    pub fn export_role(mut self, role_arn: impl Into<String>) -> Self {
        self.export_role_arn = Some(role_arn.into());
        self
    }

    /// Export the source-region snapshot as well (the copy is always exported).
    pub fn export_source(mut self, enabled: bool) -> Self {
        self.export_source = enabled;
        self
    }

    /// Keep the source snapshot after the copy is exported.
    pub fn keep_source_snapshot(mut self, keep: bool) -> Self {
        self.keep_source_snapshot = keep;
        self
    }

    /// Timing and retention policy; defaults to [`BackupPolicy::default`].
    pub fn policy(mut self, policy: BackupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Clock for timestamps and waits; defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fails with [`BackupError::Misconfigured`] when a required part is missing.
    pub fn build(self) -> Result<BackupManager, BackupError> {
        let source = self.source.ok_or(BackupError::Misconfigured("source region clients"))?;
        let target = self.target.ok_or(BackupError::Misconfigured("target region clients"))?;
        let (keys, kms_key_id) = self.keys.ok_or(BackupError::Misconfigured("key resolver"))?;
        let export_role_arn = self
            .export_role_arn
            .ok_or(BackupError::Misconfigured("export role"))?;

        if source.region() == target.region() {
            warn!(
                "Source and target region are both {}; the copy will not leave the region",
                source.region()
            );
        }

        Ok(BackupManager {
            db_identifier: self.db_identifier,
            source,
            target,
            keys,
            kms_key_id,
            export_role_arn,
            export_source: self.export_source,
            keep_source_snapshot: self.keep_source_snapshot,
            policy: self.policy,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::default()) as Arc<dyn Clock>),
        })
    }
}
