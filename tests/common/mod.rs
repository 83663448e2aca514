//! Shared fixture: an in-memory source and target region, a manual clock
//! and a recording notifier wired into one manager.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rds_replicator::backup::{
    BackupJob, BackupManager, BackupManagerBuilder, BackupPolicy, RegionClients,
};
use rds_replicator::clients::{MemoryExportClient, MemorySnapshotStore};
use rds_replicator::clock::{Clock, ManualClock};
use rds_replicator::keys::StaticKeyResolver;
use rds_replicator::notification::RecordingNotifier;
use std::sync::Arc;

pub const DB: &str = "orders-db";
pub const SOURCE_REGION: &str = "us-east-1";
pub const TARGET_REGION: &str = "us-west-2";
pub const ACCOUNT: &str = "123456789012";
pub const KEY_ID: &str = "mrk-1234abcd";
pub const ROLE: &str = "arn:aws:iam::123456789012:role/rds-export";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
}

pub fn source_key() -> String {
    format!("arn:aws:kms:{}:{}:key/{}", SOURCE_REGION, ACCOUNT, KEY_ID)
}

pub fn target_key() -> String {
    format!("arn:aws:kms:{}:{}:key/{}", TARGET_REGION, ACCOUNT, KEY_ID)
}

pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub source: Arc<MemorySnapshotStore>,
    pub target: Arc<MemorySnapshotStore>,
    pub source_exports: Arc<MemoryExportClient>,
    pub target_exports: Arc<MemoryExportClient>,
    pub keys: Arc<StaticKeyResolver>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    /// Both regions empty, the instance registered as `available`.
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let shared: Arc<dyn Clock> = clock.clone();
        let source = Arc::new(MemorySnapshotStore::new(SOURCE_REGION).with_clock(shared.clone()));
        let target = Arc::new(MemorySnapshotStore::new(TARGET_REGION).with_clock(shared));
        source.add_instance(DB, "available");

        Self {
            clock,
            source,
            target,
            source_exports: Arc::new(MemoryExportClient::new()),
            target_exports: Arc::new(MemoryExportClient::new()),
            keys: Arc::new(StaticKeyResolver::new(ACCOUNT)),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    pub fn manager(&self) -> BackupManager {
        self.manager_with(true, true, BackupPolicy::default())
    }

    pub fn manager_with(
        &self,
        export_source: bool,
        keep_source_snapshot: bool,
        policy: BackupPolicy,
    ) -> BackupManager {
        self.builder(DB)
            .export_source(export_source)
            .keep_source_snapshot(keep_source_snapshot)
            .policy(policy)
            .build()
            .expect("fixture manager")
    }

    /// Builder wired to the fixture's regions, keys and clock.
    pub fn builder(&self, db_identifier: &str) -> BackupManagerBuilder {
        BackupManager::builder(db_identifier)
            .source(RegionClients::new(
                self.source.clone(),
                self.source_exports.clone(),
                "src-bucket",
            ))
            .target(RegionClients::new(
                self.target.clone(),
                self.target_exports.clone(),
                "dst-bucket",
            ))
            .keys(self.keys.clone(), KEY_ID)
            .export_role(ROLE)
            .clock(self.clock.clone())
    }

    pub fn job(&self, manager: BackupManager) -> BackupJob {
        BackupJob::new(Arc::new(manager), self.notifier.clone())
    }
}
