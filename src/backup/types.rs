// Backup System Types - run record, reports and errors

use crate::clients::StoreError;
use crate::clock::Cancelled;
use crate::keys::KeyError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Which side of the replication a location or snapshot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Region the database lives in
    Source,
    /// Secondary region receiving the copy
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Object-store location an export task wrote to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    /// Which region's export this is
    pub side: Side,
    /// Region of the bucket
    pub region: String,
    /// Export bucket name
    pub bucket: String,
    /// Export task identifier, also the object prefix inside the bucket
    pub export_task_id: String,
}

impl StorageLocation {
    /// `s3://<bucket>/<export task id>`
    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.export_task_id)
    }
}

/// Append-only record of one backup run, handed to the notifier at the end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupResult {
    /// Instance being backed up
    pub db_identifier: String,
    /// Source snapshot, once one was created or adopted
    pub snapshot_id: Option<String>,
    /// Target-region copy, once issued
    pub target_snapshot_id: Option<String>,
    /// Start of the run
    pub backup_time: DateTime<Utc>,
    /// Export locations in the order they completed
    pub locations: Vec<StorageLocation>,
    /// Set when the run failed
    pub error_message: Option<String>,
}

impl BackupResult {
    /// Empty record for a run starting at `backup_time`.
    pub fn new(db_identifier: impl Into<String>, backup_time: DateTime<Utc>) -> Self {
        Self {
            db_identifier: db_identifier.into(),
            snapshot_id: None,
            target_snapshot_id: None,
            backup_time,
            locations: Vec::new(),
            error_message: None,
        }
    }

    /// Append a location; earlier locations are never replaced.
    pub fn record_location(&mut self, location: StorageLocation) {
        self.locations.push(location);
    }

    /// First location recorded for `side`.
    pub fn location(&self, side: Side) -> Option<&StorageLocation> {
        self.locations.iter().find(|l| l.side == side)
    }

    /// `s3://bucket/task` URIs in the order they were recorded.
    pub fn location_uris(&self) -> Vec<String> {
        self.locations.iter().map(StorageLocation::uri).collect()
    }

    /// Run start in RFC 3339, whole seconds, `Z` suffix.
    pub fn backup_time_rfc3339(&self) -> String {
        self.backup_time.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Result of a best-effort step. Never turned into a workflow error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The step ran and succeeded
    Completed(T),
    /// The step did not apply to this run
    Skipped,
    /// The step failed; the error text was logged
    Failed(String),
}

impl<T> Outcome<T> {
    /// Log and absorb a failure of the step named `step`.
    pub(crate) fn best_effort(step: &str, result: Result<T, BackupError>) -> Self {
        match result {
            Ok(value) => Outcome::Completed(value),
            Err(error) => {
                warn!("{} failed: {}", step, error);
                Outcome::Failed(error.to_string())
            }
        }
    }

    /// `true` for [`Outcome::Completed`]
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// `true` for [`Outcome::Failed`]
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// What one retention sweep over a single region did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Identifier prefix the sweep matched against
    pub prefix: String,
    /// Snapshots deleted, in listing order
    pub deleted: Vec<String>,
    /// Snapshots whose delete call failed, with the error text
    pub failed_deletes: Vec<(String, String)>,
    /// Matching snapshots younger than the horizon
    pub retained: usize,
}

/// Retention sweep over both regions
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupReport {
    /// Sweep of the source region
    pub source: SweepReport,
    /// Sweep of the target region
    pub target: SweepReport,
}

/// What a successful `perform` did, including its best-effort steps
#[derive(Debug, Clone, PartialEq)]
pub struct PerformReport {
    /// Snapshot taken or adopted in the source region
    pub source_snapshot_id: String,
    /// Copy in the target region
    pub target_snapshot_id: String,
    /// Retention sweep
    pub cleanup: Outcome<CleanupReport>,
    /// Removal of the source snapshot when it is not kept
    pub source_deletion: Outcome<()>,
}

/// Errors that fail a backup run
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackupError {
    /// A client call failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configured instance does not exist
    #[error("DB instance not found: {0}")]
    InstanceNotFound(String),

    /// The instance is in a state that cannot take a snapshot
    #[error("DB instance {db_identifier} is in state {status}")]
    InstanceUnavailable {
        /// Instance identifier
        db_identifier: String,
        /// Reported status
        status: String,
    },

    /// The snapshot to copy or export does not exist
    #[error("no snapshot found with ID: {0}")]
    SnapshotNotFound(String),

    /// The snapshot reached a failed state
    #[error("snapshot {snapshot_id} entered state {status}")]
    SnapshotFailed {
        /// Snapshot identifier
        snapshot_id: String,
        /// Reported status
        status: String,
    },

    /// The snapshot did not become available in time
    #[error("error waiting for snapshot {snapshot_id}: exceeded max wait time {timeout:?}")]
    WaitTimeout {
        /// Snapshot identifier
        snapshot_id: String,
        /// Wait bound that was exceeded
        timeout: Duration,
    },

    /// The export task ended in `FAILED`
    #[error("export task {task_id} failed: {cause}")]
    ExportFailed {
        /// Export task identifier
        task_id: String,
        /// Failure cause reported by the service
        cause: String,
    },

    /// A started export task is no longer visible
    #[error("no export task found with identifier {0}")]
    ExportTaskMissing(String),

    /// Every attempt of the source stage failed
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the last failed attempt
        #[source]
        last: Box<BackupError>,
    },

    /// A bounded poll ran out of attempts
    #[error("timed out after {attempts} attempts waiting for {what}")]
    Timeout {
        /// Probes made
        attempts: u32,
        /// What was being waited for
        what: String,
    },

    /// A KMS key could not be resolved or is unusable
    #[error("failed to get {side} KMS key ARN: {source}")]
    Key {
        /// Region the key belongs to
        side: Side,
        /// Resolution failure
        #[source]
        source: KeyError,
    },

    /// A retention sweep could not list snapshots
    #[error("failed to cleanup {side} region snapshots: {source}")]
    Sweep {
        /// Region being swept
        side: Side,
        /// Listing failure
        #[source]
        source: StoreError,
    },

    /// Shutdown interrupted a wait
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// The manager builder was missing a required part
    #[error("backup manager is missing {0}")]
    Misconfigured(&'static str),
}

impl BackupError {
    /// Whether the run stopped because of shutdown
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(side: Side, bucket: &str) -> StorageLocation {
        StorageLocation {
            side,
            region: "r".into(),
            bucket: bucket.into(),
            export_task_id: format!("export-{}", bucket),
        }
    }

    #[test]
    fn test_locations_are_appended_in_order() {
        let mut result = BackupResult::new("orders-db", DateTime::<Utc>::UNIX_EPOCH);
        result.record_location(location(Side::Source, "a"));
        result.record_location(location(Side::Target, "b"));

        assert_eq!(result.location_uris(), vec!["s3://a/export-a", "s3://b/export-b"]);
        assert_eq!(result.location(Side::Target).unwrap().bucket, "b");
    }

    #[test]
    fn test_exhaustion_message_carries_last_error() {
        let error = BackupError::RetriesExhausted {
            attempts: 12,
            last: Box::new(BackupError::Store(StoreError::service("DescribeDBInstances", "throttled"))),
        };

        assert_eq!(
            error.to_string(),
            "giving up after 12 attempts: DescribeDBInstances failed: throttled"
        );
    }

    #[test]
    fn test_backup_time_formatting() {
        let result = BackupResult::new("db", DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(result.backup_time_rfc3339(), "1970-01-01T00:00:00Z");
    }
}
