// Source-region stage: take (or rediscover) today's snapshot and export it

use super::manager::BackupManager;
use super::naming;
use super::poll::wait_for_snapshot;
use super::types::{BackupError, BackupResult, Side, StorageLocation};
use crate::clients::{DbInstanceState, SnapshotState, StoreError};
use tracing::{info, instrument, warn};

/// What one attempt of the source loop does after describing the instance
#[derive(Debug)]
pub(crate) enum SourceStep {
    /// Instance is available: take a new snapshot
    Create,
    /// Instance is backing up: look for today's snapshot already in flight
    SearchSameDay,
    /// Sleep and try again, remembering the error if there is one
    Retry(Option<BackupError>),
    /// Stop immediately
    Abort(BackupError),
}

pub(crate) fn source_step(
    db_identifier: &str,
    observed: Result<DbInstanceState, StoreError>,
) -> SourceStep {
    match observed {
        Ok(DbInstanceState::Available) => SourceStep::Create,
        Ok(DbInstanceState::BackingUp) => SourceStep::SearchSameDay,
        Ok(DbInstanceState::Transient(status)) => {
            info!("DB instance {} is {}, waiting", db_identifier, status);
            SourceStep::Retry(None)
        }
        Ok(DbInstanceState::TerminalFailure(status)) => {
            SourceStep::Retry(Some(BackupError::InstanceUnavailable {
                db_identifier: db_identifier.to_string(),
                status,
            }))
        }
        Err(error) if error.is_not_found() => {
            SourceStep::Abort(BackupError::InstanceNotFound(db_identifier.to_string()))
        }
        Err(error) => SourceStep::Retry(Some(error.into())),
    }
}

impl BackupManager {
    /// Create a snapshot of the instance in the source region, wait for it and
    /// export it when `export_to_storage` is set.
    ///
    /// If the instance is already backing up and a snapshot with today's
    /// prefix exists, that snapshot is adopted instead of creating another
    /// one. Describe failures and transitional instance states are retried up
    /// to `policy.max_attempts` times, `policy.retry_backoff` apart.
    #[instrument(skip(self, key_arn, result), fields(db = %self.db_identifier))]
    pub async fn create_and_export_source_snapshot(
        &self,
        export_to_storage: bool,
        key_arn: &str,
        result: &mut BackupResult,
    ) -> Result<String, BackupError> {
        let store = self.source.store.as_ref();
        let max_attempts = self.policy.max_attempts;
        let mut last_error: Option<BackupError> = None;

        for attempt in 1..=max_attempts {
            let observed = store.describe_instance(&self.db_identifier).await;

            let retry_error = match source_step(&self.db_identifier, observed) {
                SourceStep::Abort(error) => return Err(error),
                SourceStep::Retry(error) => error,
                SourceStep::Create => {
                    let snapshot_id = naming::source_snapshot_id(&self.db_identifier, self.clock.now());
                    info!("Creating snapshot: {}", snapshot_id);
                    match store.create_snapshot(&self.db_identifier, &snapshot_id).await {
                        Ok(()) => {
                            return self
                                .finish_source_snapshot(snapshot_id, export_to_storage, key_arn, result)
                                .await
                        }
                        Err(error) => Some(error.into()),
                    }
                }
                SourceStep::SearchSameDay => match self.find_same_day_snapshot().await {
                    Ok(Some(snapshot_id)) => {
                        info!(
                            "DB instance is backing up; resuming existing snapshot {}",
                            snapshot_id
                        );
                        return self
                            .finish_source_snapshot(snapshot_id, export_to_storage, key_arn, result)
                            .await;
                    }
                    Ok(None) => {
                        info!("DB instance is backing up with no snapshot from today yet, waiting");
                        None
                    }
                    Err(error) => Some(error),
                },
            };

            if let Some(error) = retry_error {
                warn!("Attempt {}/{} failed: {}", attempt, max_attempts, error);
                last_error = Some(error);
            }

            if attempt < max_attempts {
                self.clock.sleep(self.policy.retry_backoff).await?;
            }
        }

        Err(match last_error {
            Some(last) => BackupError::RetriesExhausted {
                attempts: max_attempts,
                last: Box::new(last),
            },
            None => BackupError::Timeout {
                attempts: max_attempts,
                what: format!("DB instance {} to accept a snapshot", self.db_identifier),
            },
        })
    }

    /// Latest non-failed snapshot of this instance whose identifier carries
    /// today's date.
    async fn find_same_day_snapshot(&self) -> Result<Option<String>, BackupError> {
        let prefix = naming::same_day_prefix(&self.db_identifier, self.clock.now());
        let owned = naming::source_prefix(&self.db_identifier);
        let mut found: Option<String> = None;
        let mut marker = None;

        loop {
            let page = self.source.store.list_manual_snapshots(marker).await?;
            for snapshot in page.snapshots {
                if !snapshot.identifier.starts_with(&prefix)
                    || naming::prefixed_timestamp(&snapshot.identifier, &owned).is_none()
                    || matches!(snapshot.state, SnapshotState::Failed(_))
                {
                    continue;
                }
                if found.as_deref().map_or(true, |current| snapshot.identifier.as_str() > current) {
                    found = Some(snapshot.identifier);
                }
            }
            marker = page.next_marker;
            if marker.is_none() {
                return Ok(found);
            }
        }
    }

    async fn finish_source_snapshot(
        &self,
        snapshot_id: String,
        export_to_storage: bool,
        key_arn: &str,
        result: &mut BackupResult,
    ) -> Result<String, BackupError> {
        wait_for_snapshot(
            self.source.store.as_ref(),
            self.clock.as_ref(),
            &snapshot_id,
            self.policy.snapshot_poll_interval,
            self.policy.snapshot_wait_timeout,
        )
        .await?;

        if export_to_storage {
            info!("Exporting snapshot to S3");
            let task_id = self
                .export_snapshot_to_storage(Side::Source, &snapshot_id, key_arn)
                .await?;
            result.record_location(StorageLocation {
                side: Side::Source,
                region: self.source.region().to_string(),
                bucket: self.source.bucket.clone(),
                export_task_id: task_id,
            });
        }

        Ok(snapshot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_for_each_instance_state() {
        assert!(matches!(source_step("db", Ok(DbInstanceState::Available)), SourceStep::Create));
        assert!(matches!(
            source_step("db", Ok(DbInstanceState::BackingUp)),
            SourceStep::SearchSameDay
        ));
        assert!(matches!(
            source_step("db", Ok(DbInstanceState::Transient("modifying".into()))),
            SourceStep::Retry(None)
        ));
        assert!(matches!(
            source_step("db", Ok(DbInstanceState::TerminalFailure("storage-full".into()))),
            SourceStep::Retry(Some(BackupError::InstanceUnavailable { .. }))
        ));
    }

    #[test]
    fn test_step_for_describe_errors() {
        let missing = StoreError::NotFound {
            kind: "db instance",
            id: "db".into(),
        };
        assert!(matches!(
            source_step("db", Err(missing)),
            SourceStep::Abort(BackupError::InstanceNotFound(_))
        ));
        assert!(matches!(
            source_step("db", Err(StoreError::service("DescribeDBInstances", "throttled"))),
            SourceStep::Retry(Some(BackupError::Store(_)))
        ));
    }
}
