//! Cross-region stage: reuse, recreate and re-encrypt the target copy

mod common;

use common::{start_time, target_key, Fixture, DB};
use pretty_assertions::assert_eq;
use rds_replicator::backup::{BackupError, BackupPolicy, BackupResult, Side, StorageLocation};
use rds_replicator::clients::{CopySnapshotRequest, SnapshotState, SnapshotStore, StoreCall};
use rds_replicator::clock::Clock;
use std::time::Duration;

const SOURCE_ID: &str = "backup-orders-db-2024-06-30-12-00-00";
const TARGET_ID: &str = "copy-backup-orders-db-2024-06-30-12-00-00";

fn fixture_with_source_snapshot() -> Fixture {
    let fixture = Fixture::new();
    fixture
        .source
        .insert_snapshot(SOURCE_ID, SnapshotState::Available, Some(start_time()));
    fixture
}

#[tokio::test]
async fn test_available_copy_is_reused() {
    let fixture = Fixture::new();
    fixture
        .target
        .insert_snapshot(TARGET_ID, SnapshotState::Available, Some(start_time()));
    let manager = fixture.manager();

    let target_id = manager
        .copy_snapshot_to_target(SOURCE_ID, &target_key())
        .await
        .unwrap();

    assert_eq!(target_id, TARGET_ID);
    assert_eq!(fixture.target.copy_count(), 0);
    assert!(fixture.source.calls().is_empty());
}

#[tokio::test]
async fn test_copy_is_encrypted_with_target_key_and_keeps_tags() {
    let fixture = fixture_with_source_snapshot();
    let manager = fixture.manager();

    manager
        .copy_snapshot_to_target(SOURCE_ID, &target_key())
        .await
        .unwrap();

    let copies: Vec<CopySnapshotRequest> = fixture
        .target
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            StoreCall::CopySnapshot(request) => Some(request),
            _ => None,
        })
        .collect();
    assert_eq!(
        copies,
        vec![CopySnapshotRequest {
            source_arn: format!("arn:aws:rds:us-east-1:000000000000:snapshot:{}", SOURCE_ID),
            target_identifier: TARGET_ID.to_string(),
            kms_key_arn: target_key(),
            copy_tags: true,
        }]
    );
}

#[tokio::test]
async fn test_copy_in_progress_is_awaited_not_reissued() {
    let fixture = fixture_with_source_snapshot();
    fixture.target.set_polls_to_available(3);
    fixture
        .target
        .copy_snapshot(&CopySnapshotRequest {
            source_arn: "arn:aws:rds:us-east-1:000000000000:snapshot:earlier-run".into(),
            target_identifier: TARGET_ID.to_string(),
            kms_key_arn: target_key(),
            copy_tags: true,
        })
        .await
        .unwrap();
    let manager = fixture.manager();

    manager
        .copy_snapshot_to_target(SOURCE_ID, &target_key())
        .await
        .unwrap();

    assert_eq!(fixture.target.copy_count(), 1);
    assert!(fixture.target.deleted().is_empty());
    assert_eq!(fixture.clock.sleeps(), vec![Duration::from_secs(30); 2]);
}

#[tokio::test]
async fn test_stuck_copy_is_deleted_and_recreated() {
    let fixture = fixture_with_source_snapshot();
    fixture.target.insert_stuck_snapshot(TARGET_ID);
    let policy = BackupPolicy::default().snapshot_wait_timeout(Duration::from_secs(900));
    let manager = fixture.manager_with(true, true, policy);

    let target_id = manager
        .copy_snapshot_to_target(SOURCE_ID, &target_key())
        .await
        .unwrap();

    assert_eq!(target_id, TARGET_ID);
    assert_eq!(fixture.target.deleted(), vec![TARGET_ID.to_string()]);
    assert_eq!(fixture.target.copy_count(), 1);
    assert!(fixture.target.contains(TARGET_ID));
}

#[tokio::test]
async fn test_failed_delete_of_stuck_copy_is_returned() {
    let fixture = fixture_with_source_snapshot();
    fixture.target.insert_stuck_snapshot(TARGET_ID);
    fixture.target.fail_delete(TARGET_ID);
    let policy = BackupPolicy::default().snapshot_wait_timeout(Duration::from_secs(900));
    let manager = fixture.manager_with(true, true, policy);

    let error = manager
        .copy_snapshot_to_target(SOURCE_ID, &target_key())
        .await
        .unwrap_err();

    assert!(matches!(error, BackupError::Store(_)), "{error}");
    assert_eq!(fixture.target.copy_count(), 0);
}

#[tokio::test]
async fn test_missing_source_snapshot_is_not_found() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    let error = manager
        .copy_snapshot_to_target(SOURCE_ID, &target_key())
        .await
        .unwrap_err();

    assert!(matches!(error, BackupError::SnapshotNotFound(ref id) if id == SOURCE_ID));
    assert_eq!(error.to_string(), format!("no snapshot found with ID: {}", SOURCE_ID));
    assert_eq!(fixture.target.copy_count(), 0);
}

#[tokio::test]
async fn test_target_location_is_appended_after_source_location() {
    let fixture = fixture_with_source_snapshot();
    let manager = fixture.manager();
    let mut result = BackupResult::new(DB, fixture.clock.now());
    result.record_location(StorageLocation {
        side: Side::Source,
        region: "us-east-1".into(),
        bucket: "src-bucket".into(),
        export_task_id: format!("export-{}", SOURCE_ID),
    });

    let target_id = manager
        .copy_and_export_to_target(SOURCE_ID, &target_key(), &mut result)
        .await
        .unwrap();

    assert_eq!(target_id, TARGET_ID);
    assert_eq!(
        result.location_uris(),
        vec![
            format!("s3://src-bucket/export-{}", SOURCE_ID),
            format!("s3://dst-bucket/export-{}", TARGET_ID),
        ]
    );
    assert_eq!(result.location(Side::Target).map(|l| l.region.as_str()), Some("us-west-2"));
}
