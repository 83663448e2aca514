// Export of a snapshot to object storage

use super::manager::BackupManager;
use super::naming;
use super::poll::{drive, export_transition, PollLimit};
use super::types::{BackupError, Side};
use crate::clients::ExportRequest;
use tracing::{info, instrument};

impl BackupManager {
    /// Export `snapshot_id` from the region of `side` into that region's
    /// bucket and poll the task until it completes.
    ///
    /// The task is named `export-<snapshotId>`. If a task with that name
    /// already exists it is polled instead of started again. Polling has no
    /// attempt cap unless `policy.export_poll_max_attempts` is set.
    #[instrument(skip(self, key_arn), fields(db = %self.db_identifier))]
    pub async fn export_snapshot_to_storage(
        &self,
        side: Side,
        snapshot_id: &str,
        key_arn: &str,
    ) -> Result<String, BackupError> {
        let clients = self.region(side);
        let exporter = clients.exporter.as_ref();

        let snapshot = clients
            .store
            .describe_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| BackupError::SnapshotNotFound(snapshot_id.to_string()))?;

        let task_id = naming::export_task_id(snapshot_id);
        if exporter.describe_export_task(&task_id).await?.is_some() {
            info!("Export task {} already exists, resuming", task_id);
        } else {
            info!("Starting export task for snapshot: {}", snapshot_id);
            exporter
                .start_export_task(&ExportRequest {
                    task_identifier: task_id.clone(),
                    source_arn: snapshot.arn,
                    bucket: clients.bucket.clone(),
                    kms_key_arn: key_arn.to_string(),
                    iam_role_arn: self.export_role_arn.clone(),
                })
                .await?;
        }

        let limit = match self.policy.export_poll_max_attempts {
            Some(max) => PollLimit::Attempts(max),
            None => PollLimit::Unbounded,
        };
        let poll_id = task_id.as_str();

        drive(
            self.clock.as_ref(),
            self.policy.export_poll_interval,
            limit,
            || async move { export_transition(poll_id, exporter.describe_export_task(poll_id).await) },
            |attempts| BackupError::Timeout {
                attempts,
                what: format!("export task {}", poll_id),
            },
        )
        .await?;

        info!("Export task {} complete", task_id);
        Ok(task_id)
    }
}
