// Cross-region stage: copy the source snapshot under the target key and export it

use super::manager::BackupManager;
use super::naming;
use super::poll::wait_for_snapshot;
use super::types::{BackupError, BackupResult, Side, StorageLocation};
use crate::clients::{CopySnapshotRequest, SnapshotState};
use tracing::{info, instrument, warn};

impl BackupManager {
    /// Copy `source_snapshot_id` into the target region re-encrypted under
    /// `target_key_arn`, export the copy and append its location to `result`.
    #[instrument(skip(self, target_key_arn, result), fields(db = %self.db_identifier))]
    pub async fn copy_and_export_to_target(
        &self,
        source_snapshot_id: &str,
        target_key_arn: &str,
        result: &mut BackupResult,
    ) -> Result<String, BackupError> {
        let target_snapshot_id = self
            .copy_snapshot_to_target(source_snapshot_id, target_key_arn)
            .await?;

        let task_id = self
            .export_snapshot_to_storage(Side::Target, &target_snapshot_id, target_key_arn)
            .await?;
        result.record_location(StorageLocation {
            side: Side::Target,
            region: self.target.region().to_string(),
            bucket: self.target.bucket.clone(),
            export_task_id: task_id,
        });

        Ok(target_snapshot_id)
    }

    /// Make sure `copy-<sourceId>` exists and is available in the target
    /// region, reusing a previous copy when possible.
    ///
    /// A copy that exists but never becomes available is deleted and issued
    /// again.
    pub async fn copy_snapshot_to_target(
        &self,
        source_snapshot_id: &str,
        target_key_arn: &str,
    ) -> Result<String, BackupError> {
        let target_store = self.target.store.as_ref();
        let target_snapshot_id = naming::target_snapshot_id(source_snapshot_id);

        if let Some(existing) = target_store.describe_snapshot(&target_snapshot_id).await? {
            if existing.state == SnapshotState::Available {
                info!("Reusing existing target snapshot {}", target_snapshot_id);
                return Ok(target_snapshot_id);
            }

            info!("Target snapshot {} already in progress, waiting", target_snapshot_id);
            match self.wait_for_target(&target_snapshot_id).await {
                Ok(()) => return Ok(target_snapshot_id),
                Err(error) if error.is_cancelled() => return Err(error),
                Err(error) => {
                    warn!(
                        "Existing target snapshot {} is unusable ({}), recreating it",
                        target_snapshot_id, error
                    );
                    target_store.delete_snapshot(&target_snapshot_id).await?;
                }
            }
        }

        let source = self
            .source
            .store
            .describe_snapshot(source_snapshot_id)
            .await?
            .ok_or_else(|| BackupError::SnapshotNotFound(source_snapshot_id.to_string()))?;

        info!("Copying snapshot to target region: {}", target_snapshot_id);
        target_store
            .copy_snapshot(&CopySnapshotRequest {
                source_arn: source.arn,
                target_identifier: target_snapshot_id.clone(),
                kms_key_arn: target_key_arn.to_string(),
                copy_tags: true,
            })
            .await?;

        self.wait_for_target(&target_snapshot_id).await?;
        Ok(target_snapshot_id)
    }

    async fn wait_for_target(&self, snapshot_id: &str) -> Result<(), BackupError> {
        wait_for_snapshot(
            self.target.store.as_ref(),
            self.clock.as_ref(),
            snapshot_id,
            self.policy.snapshot_poll_interval,
            self.policy.snapshot_wait_timeout,
        )
        .await
        .map(|_| ())
    }
}
