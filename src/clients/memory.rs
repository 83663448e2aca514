//! In-memory snapshot store and export service.
//!
//! Both adapters are scriptable so tests can reproduce slow snapshots, stuck
//! copies, failing exports and listing errors without any network access.
//! Every call is recorded for later assertions.

use super::{
    CopySnapshotRequest, DbInstanceState, ExportClient, ExportRequest, ExportTaskStatus,
    SnapshotInfo, SnapshotPage, SnapshotState, SnapshotStore, StoreError,
};
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// A call observed by [`MemorySnapshotStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    /// `describe_instance`
    DescribeInstance(String),
    /// `create_snapshot`
    CreateSnapshot {
        /// Instance the snapshot was taken of
        db_identifier: String,
        /// Requested snapshot identifier
        snapshot_id: String,
    },
    /// `describe_snapshot`
    DescribeSnapshot(String),
    /// `list_manual_snapshots`
    ListManualSnapshots(Option<String>),
    /// `copy_snapshot`
    CopySnapshot(CopySnapshotRequest),
    /// `delete_snapshot`
    DeleteSnapshot(String),
}

#[derive(Debug, Clone)]
struct StoredSnapshot {
    info: SnapshotInfo,
    polls_until_available: u32,
    stuck: bool,
}

/// Scriptable in-memory [`SnapshotStore`]
pub struct MemorySnapshotStore {
    region: String,
    clock: Arc<dyn Clock>,
    instances: DashMap<String, VecDeque<Result<DbInstanceState, StoreError>>>,
    snapshots: DashMap<String, StoredSnapshot>,
    calls: Mutex<Vec<StoreCall>>,
    failing_deletes: Mutex<HashSet<String>>,
    failing_creates: Mutex<u32>,
    failing_describes: Mutex<u32>,
    list_failure: Mutex<Option<String>>,
    polls_to_available: Mutex<u32>,
    page_size: usize,
}

impl MemorySnapshotStore {
    /// Create an empty store for `region`.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            clock: Arc::new(SystemClock::default()),
            instances: DashMap::new(),
            snapshots: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            failing_creates: Mutex::new(0),
            failing_describes: Mutex::new(0),
            list_failure: Mutex::new(None),
            polls_to_available: Mutex::new(1),
            page_size: 2,
        }
    }

    /// Stamp newly created snapshots with `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of snapshots returned per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Register an instance that always reports `status`.
    pub fn add_instance(&self, db_identifier: &str, status: &str) {
        self.script_instance(db_identifier, vec![Ok(DbInstanceState::from_status(status))]);
    }

    /// Register an instance whose describe results are played back in order.
    /// The last entry repeats once the script is exhausted.
    pub fn script_instance(
        &self,
        db_identifier: &str,
        script: Vec<Result<DbInstanceState, StoreError>>,
    ) {
        self.instances
            .insert(db_identifier.to_string(), script.into_iter().collect());
    }

    /// Insert an existing snapshot.
    pub fn insert_snapshot(&self, identifier: &str, state: SnapshotState, created_at: Option<DateTime<Utc>>) {
        let info = SnapshotInfo {
            identifier: identifier.to_string(),
            arn: self.arn_for(identifier),
            state,
            created_at,
        };
        self.snapshots.insert(
            identifier.to_string(),
            StoredSnapshot {
                info,
                polls_until_available: 0,
                stuck: false,
            },
        );
    }

    /// Insert a snapshot that stays in `creating` forever.
    pub fn insert_stuck_snapshot(&self, identifier: &str) {
        self.insert_snapshot(identifier, SnapshotState::Creating, None);
        if let Some(mut stored) = self.snapshots.get_mut(identifier) {
            stored.stuck = true;
        }
    }

    /// How many describe calls a new snapshot answers with `creating`.
    pub fn set_polls_to_available(&self, polls: u32) {
        *self.polls_to_available.lock() = polls;
    }

    /// Make deletes of `identifier` fail.
    pub fn fail_delete(&self, identifier: &str) {
        self.failing_deletes.lock().insert(identifier.to_string());
    }

    /// Make the next `count` create calls fail.
    pub fn fail_creates(&self, count: u32) {
        *self.failing_creates.lock() = count;
    }

    /// Make the next `count` snapshot describe calls fail with a throttling error.
    pub fn fail_describes(&self, count: u32) {
        *self.failing_describes.lock() = count;
    }

    /// Make every listing call fail with `message`.
    pub fn fail_listing(&self, message: &str) {
        *self.list_failure.lock() = Some(message.to_string());
    }

    /// All calls observed so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Snapshot identifiers currently stored, sorted.
    pub fn snapshot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Whether a snapshot with `identifier` exists.
    pub fn contains(&self, identifier: &str) -> bool {
        self.snapshots.contains_key(identifier)
    }

    /// Number of create calls observed.
    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::CreateSnapshot { .. }))
    }

    /// Number of copy calls observed.
    pub fn copy_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::CopySnapshot(_)))
    }

    /// Identifiers passed to delete calls, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                StoreCall::DeleteSnapshot(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&StoreCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().push(call);
    }

    fn arn_for(&self, identifier: &str) -> String {
        format!("arn:aws:rds:{}:000000000000:snapshot:{}", self.region, identifier)
    }

    fn start_snapshot(&self, identifier: &str) {
        let info = SnapshotInfo {
            identifier: identifier.to_string(),
            arn: self.arn_for(identifier),
            state: SnapshotState::Creating,
            created_at: Some(self.clock.now()),
        };
        self.snapshots.insert(
            identifier.to_string(),
            StoredSnapshot {
                info,
                polls_until_available: *self.polls_to_available.lock(),
                stuck: false,
            },
        );
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_instance(&self, db_identifier: &str) -> Result<DbInstanceState, StoreError> {
        self.record(StoreCall::DescribeInstance(db_identifier.to_string()));
        let mut script = self
            .instances
            .get_mut(db_identifier)
            .ok_or_else(|| StoreError::NotFound {
                kind: "db instance",
                id: db_identifier.to_string(),
            })?;
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.unwrap_or_else(|| {
            Err(StoreError::NotFound {
                kind: "db instance",
                id: db_identifier.to_string(),
            })
        })
    }

    async fn create_snapshot(&self, db_identifier: &str, snapshot_id: &str) -> Result<(), StoreError> {
        self.record(StoreCall::CreateSnapshot {
            db_identifier: db_identifier.to_string(),
            snapshot_id: snapshot_id.to_string(),
        });
        {
            let mut failing = self.failing_creates.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(StoreError::service("CreateDBSnapshot", "InvalidDBInstanceState"));
            }
        }
        if self.snapshots.contains_key(snapshot_id) {
            return Err(StoreError::service(
                "CreateDBSnapshot",
                format!("DBSnapshotAlreadyExists: {}", snapshot_id),
            ));
        }
        self.start_snapshot(snapshot_id);
        Ok(())
    }

    async fn describe_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>, StoreError> {
        self.record(StoreCall::DescribeSnapshot(snapshot_id.to_string()));
        {
            let mut failing = self.failing_describes.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(StoreError::service("DescribeDBSnapshots", "Throttling"));
            }
        }
        let Some(mut stored) = self.snapshots.get_mut(snapshot_id) else {
            return Ok(None);
        };
        let snapshot = stored.value_mut();
        if snapshot.info.state == SnapshotState::Creating && !snapshot.stuck {
            if snapshot.polls_until_available == 0 {
                snapshot.info.state = SnapshotState::Available;
            } else {
                snapshot.polls_until_available -= 1;
            }
        }
        Ok(Some(snapshot.info.clone()))
    }

    async fn list_manual_snapshots(&self, marker: Option<String>) -> Result<SnapshotPage, StoreError> {
        self.record(StoreCall::ListManualSnapshots(marker.clone()));
        if let Some(message) = self.list_failure.lock().clone() {
            return Err(StoreError::service("DescribeDBSnapshots", message));
        }

        // Keyset pagination: the marker is the last identifier already returned,
        // so deletes between pages never shift the next page.
        let ids = self.snapshot_ids();
        let start = match marker {
            Some(ref last) => ids.partition_point(|id| id <= last),
            None => 0,
        };
        let end = (start + self.page_size).min(ids.len());

        let snapshots: Vec<SnapshotInfo> = ids[start..end]
            .iter()
            .filter_map(|id| self.snapshots.get(id).map(|s| s.info.clone()))
            .collect();
        let next_marker = if end < ids.len() {
            ids.get(end - 1).cloned()
        } else {
            None
        };

        Ok(SnapshotPage { snapshots, next_marker })
    }

    async fn copy_snapshot(&self, request: &CopySnapshotRequest) -> Result<(), StoreError> {
        self.record(StoreCall::CopySnapshot(request.clone()));
        if self.snapshots.contains_key(&request.target_identifier) {
            return Err(StoreError::service(
                "CopyDBSnapshot",
                format!("DBSnapshotAlreadyExists: {}", request.target_identifier),
            ));
        }
        self.start_snapshot(&request.target_identifier);
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError> {
        self.record(StoreCall::DeleteSnapshot(snapshot_id.to_string()));
        if self.failing_deletes.lock().contains(snapshot_id) {
            return Err(StoreError::service(
                "DeleteDBSnapshot",
                format!("InvalidDBSnapshotState: {}", snapshot_id),
            ));
        }
        self.snapshots
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                kind: "db snapshot",
                id: snapshot_id.to_string(),
            })
    }
}

/// Scriptable in-memory [`ExportClient`]
///
/// Each started task replays the current script: one status per describe
/// call, the last one repeating. The default script reports `IN_PROGRESS`
/// once and then `COMPLETE`.
pub struct MemoryExportClient {
    script: Mutex<Vec<ExportTaskStatus>>,
    tasks: DashMap<String, VecDeque<ExportTaskStatus>>,
    requests: Mutex<Vec<ExportRequest>>,
    describes: Mutex<usize>,
    lose_tasks: Mutex<bool>,
}

impl MemoryExportClient {
    /// Create a client whose tasks complete on the second poll.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(vec![
                ExportTaskStatus::new("IN_PROGRESS"),
                ExportTaskStatus::new("COMPLETE"),
            ]),
            tasks: DashMap::new(),
            requests: Mutex::new(Vec::new()),
            describes: Mutex::new(0),
            lose_tasks: Mutex::new(false),
        }
    }

    /// Replace the status script for tasks started from now on.
    pub fn set_script(&self, script: Vec<ExportTaskStatus>) {
        *self.script.lock() = script;
    }

    /// Tasks started from now on fail with `cause` after one poll.
    pub fn fail_with(&self, cause: &str) {
        self.set_script(vec![
            ExportTaskStatus::new("IN_PROGRESS"),
            ExportTaskStatus::failed(cause),
        ]);
    }

    /// Describe calls report no matching task.
    pub fn lose_tasks(&self) {
        *self.lose_tasks.lock() = true;
    }

    /// Register a task that already exists before the run starts.
    pub fn insert_task(&self, task_identifier: &str, script: Vec<ExportTaskStatus>) {
        self.tasks
            .insert(task_identifier.to_string(), script.into_iter().collect());
    }

    /// Every start request observed so far.
    pub fn requests(&self) -> Vec<ExportRequest> {
        self.requests.lock().clone()
    }

    /// Number of describe calls observed so far.
    pub fn describe_count(&self) -> usize {
        *self.describes.lock()
    }
}

impl Default for MemoryExportClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExportClient for MemoryExportClient {
    async fn start_export_task(&self, request: &ExportRequest) -> Result<(), StoreError> {
        self.requests.lock().push(request.clone());
        if self.tasks.contains_key(&request.task_identifier) {
            return Err(StoreError::service(
                "StartExportTask",
                format!("ExportTaskAlreadyExists: {}", request.task_identifier),
            ));
        }
        let script = self.script.lock().clone();
        self.tasks
            .insert(request.task_identifier.clone(), script.into_iter().collect());
        Ok(())
    }

    async fn describe_export_task(&self, task_identifier: &str) -> Result<Option<ExportTaskStatus>, StoreError> {
        *self.describes.lock() += 1;
        if *self.lose_tasks.lock() {
            return Ok(None);
        }
        let Some(mut script) = self.tasks.get_mut(task_identifier) else {
            return Ok(None);
        };
        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_paginates_in_identifier_order() {
        let store = MemorySnapshotStore::new("us-east-1").with_page_size(2);
        for id in ["c", "a", "b"] {
            store.insert_snapshot(id, SnapshotState::Available, None);
        }

        let first = store.list_manual_snapshots(None).await.unwrap();
        let ids: Vec<_> = first.snapshots.iter().map(|s| s.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let second = store.list_manual_snapshots(first.next_marker).await.unwrap();
        assert_eq!(second.snapshots.len(), 1);
        assert_eq!(second.snapshots[0].identifier, "c");
        assert!(second.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_created_snapshot_becomes_available_after_polls() {
        let store = MemorySnapshotStore::new("us-east-1");
        store.add_instance("db", "available");
        store.set_polls_to_available(2);
        store.create_snapshot("db", "snap").await.unwrap();

        let mut states = Vec::new();
        for _ in 0..3 {
            states.push(store.describe_snapshot("snap").await.unwrap().unwrap().state);
        }

        assert_eq!(
            states,
            vec![SnapshotState::Creating, SnapshotState::Creating, SnapshotState::Available]
        );
    }

    #[tokio::test]
    async fn test_export_script_repeats_last_status() {
        let client = MemoryExportClient::new();
        client.insert_task("t", vec![ExportTaskStatus::new("STARTING")]);

        for _ in 0..3 {
            let status = client.describe_export_task("t").await.unwrap().unwrap();
            assert_eq!(status.state, crate::clients::ExportState::InProgress("STARTING".into()));
        }
        assert_eq!(client.describe_count(), 3);
    }
}
