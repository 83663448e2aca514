//! Snapshot store and bulk export seams.
//!
//! The orchestrator only sees these traits. Production wiring uses the RDS
//! adapter in [`crate::aws`]; tests use the scriptable adapters in [`memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// In-memory adapters
pub mod memory;

pub use memory::{MemoryExportClient, MemorySnapshotStore, StoreCall};

/// Errors reported by a remote snapshot store or export service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The named resource does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Resource kind, e.g. "db instance"
        kind: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The service rejected or failed the call
    #[error("{operation} failed: {message}")]
    Service {
        /// API operation name
        operation: &'static str,
        /// Error text reported by the service
        message: String,
    },
}

impl StoreError {
    /// Shorthand for a [`StoreError::Service`] error.
    pub fn service(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Service {
            operation,
            message: message.into(),
        }
    }

    /// Whether this error means the resource is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Observed status of a database instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbInstanceState {
    /// Ready to accept a snapshot request
    Available,
    /// A snapshot or automated backup is in progress
    BackingUp,
    /// Any maintenance or modification state expected to resolve on its own
    Transient(String),
    /// A state the instance will not leave without operator action
    TerminalFailure(String),
}

impl DbInstanceState {
    /// Map a raw RDS `DBInstanceStatus` value.
    pub fn from_status(status: &str) -> Self {
        match status {
            "available" => Self::Available,
            "backing-up" => Self::BackingUp,
            "failed"
            | "inaccessible-encryption-credentials"
            | "incompatible-network"
            | "incompatible-option-group"
            | "incompatible-parameters"
            | "incompatible-restore"
            | "restore-error"
            | "storage-full"
            | "deleting" => Self::TerminalFailure(status.to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Observed status of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotState {
    /// Being created or copied
    Creating,
    /// Usable
    Available,
    /// Will never become available
    Failed(String),
}

impl SnapshotState {
    /// Map a raw RDS snapshot `Status` value.
    pub fn from_status(status: &str) -> Self {
        match status {
            "available" => Self::Available,
            "failed" | "deleted" | "deleting" => Self::Failed(status.to_string()),
            s if s.starts_with("incompatible-") => Self::Failed(s.to_string()),
            _ => Self::Creating,
        }
    }
}

/// What the store knows about one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Snapshot identifier
    pub identifier: String,
    /// Canonical reference used by copy and export calls
    pub arn: String,
    /// Current state
    pub state: SnapshotState,
    /// Creation time, absent while the snapshot is still being taken
    pub created_at: Option<DateTime<Utc>>,
}

/// One page of a manual-snapshot listing
#[derive(Debug, Clone, Default)]
pub struct SnapshotPage {
    /// Snapshots on this page
    pub snapshots: Vec<SnapshotInfo>,
    /// Marker for the next page, `None` on the last page
    pub next_marker: Option<String>,
}

/// Cross-region copy request issued against the target store
#[derive(Debug, Clone, PartialEq)]
pub struct CopySnapshotRequest {
    /// Canonical reference of the source snapshot
    pub source_arn: String,
    /// Identifier of the copy in the target region
    pub target_identifier: String,
    /// Target-region key the copy is re-encrypted under
    pub kms_key_arn: String,
    /// Propagate tags from the source snapshot
    pub copy_tags: bool,
}

/// Snapshot store capabilities needed by the orchestrator
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Region this store operates in
    fn region(&self) -> &str;

    /// Current state of a database instance
    async fn describe_instance(&self, db_identifier: &str) -> Result<DbInstanceState, StoreError>;

    /// Request a manual snapshot of an instance
    async fn create_snapshot(&self, db_identifier: &str, snapshot_id: &str) -> Result<(), StoreError>;

    /// Describe one snapshot, `Ok(None)` when it does not exist
    async fn describe_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>, StoreError>;

    /// One page of manual snapshots, starting at `marker`
    async fn list_manual_snapshots(&self, marker: Option<String>) -> Result<SnapshotPage, StoreError>;

    /// Copy a snapshot into this store's region
    async fn copy_snapshot(&self, request: &CopySnapshotRequest) -> Result<(), StoreError>;

    /// Delete a manual snapshot
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError>;
}

/// Export task start request
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    /// Task identifier, `export-<snapshotId>`
    pub task_identifier: String,
    /// Canonical reference of the snapshot to export
    pub source_arn: String,
    /// Destination bucket
    pub bucket: String,
    /// Key used to encrypt the exported data
    pub kms_key_arn: String,
    /// Role the export service assumes to write the bucket
    pub iam_role_arn: String,
}

/// Coarse export task state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportState {
    /// Any non-terminal status, carried verbatim
    InProgress(String),
    /// `COMPLETE`
    Complete,
    /// `FAILED`
    Failed,
}

impl ExportState {
    /// Map a raw export task status.
    pub fn from_status(status: &str) -> Self {
        match status {
            "COMPLETE" => Self::Complete,
            "FAILED" => Self::Failed,
            other => Self::InProgress(other.to_string()),
        }
    }
}

/// Export task status as returned by a describe call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTaskStatus {
    /// Task state
    pub state: ExportState,
    /// Failure cause supplied by the service, if any
    pub failure_cause: Option<String>,
}

impl ExportTaskStatus {
    /// Status with the given raw value and no failure cause.
    pub fn new(status: &str) -> Self {
        Self {
            state: ExportState::from_status(status),
            failure_cause: None,
        }
    }

    /// A `FAILED` status carrying `cause`.
    pub fn failed(cause: impl Into<String>) -> Self {
        Self {
            state: ExportState::Failed,
            failure_cause: Some(cause.into()),
        }
    }
}

/// Bulk export capabilities needed by the orchestrator
#[async_trait]
pub trait ExportClient: Send + Sync {
    /// Start an asynchronous export task
    async fn start_export_task(&self, request: &ExportRequest) -> Result<(), StoreError>;

    /// Describe an export task, `Ok(None)` when no task has that identifier
    async fn describe_export_task(&self, task_identifier: &str) -> Result<Option<ExportTaskStatus>, StoreError>;
}
