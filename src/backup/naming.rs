//! Deterministic identifiers.
//!
//! Snapshot and export-task identifiers are the only correlation keys between
//! runs: a restarted run rediscovers in-flight work by recomputing them.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Timestamp layout embedded in source snapshot identifiers (UTC).
pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

const DAY_FORMAT: &str = "%Y-%m-%d";

/// `backup-<db>-<YYYY-MM-DD-HH-MM-SS>`
pub fn source_snapshot_id(db_identifier: &str, at: DateTime<Utc>) -> String {
    format!("backup-{}-{}", db_identifier, at.format(SNAPSHOT_TIMESTAMP_FORMAT))
}

/// `backup-<db>-<YYYY-MM-DD>`, shared by every source snapshot taken that day.
pub fn same_day_prefix(db_identifier: &str, at: DateTime<Utc>) -> String {
    format!("backup-{}-{}", db_identifier, at.format(DAY_FORMAT))
}

/// `copy-<sourceId>`
pub fn target_snapshot_id(source_snapshot_id: &str) -> String {
    format!("copy-{}", source_snapshot_id)
}

/// `export-<snapshotId>`
pub fn export_task_id(snapshot_id: &str) -> String {
    format!("export-{}", snapshot_id)
}

/// Prefix of every source snapshot of `db_identifier`.
///
/// A prefix alone does not identify a database: `backup-orders-` is also a
/// prefix of `orders-db` snapshots. Use [`prefixed_timestamp`] to match.
pub fn source_prefix(db_identifier: &str) -> String {
    format!("backup-{}-", db_identifier)
}

/// Prefix of every target-region copy of `db_identifier`'s snapshots.
pub fn target_prefix(db_identifier: &str) -> String {
    target_snapshot_id(&source_prefix(db_identifier))
}

/// Timestamp of an identifier that is exactly `<prefix><YYYY-MM-DD-HH-MM-SS>`.
///
/// Returns `None` for anything else, including snapshots of databases whose
/// name extends this one (`backup-orders-db-...` against `backup-orders-`).
pub fn prefixed_timestamp(identifier: &str, prefix: &str) -> Option<NaiveDateTime> {
    let rest = identifier.strip_prefix(prefix)?;
    NaiveDateTime::parse_from_str(rest, SNAPSHOT_TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 0, 5, 7).unwrap()
    }

    #[test]
    fn test_identifiers() {
        let source = source_snapshot_id("orders-db", at());
        assert_eq!(source, "backup-orders-db-2024-03-09-00-05-07");
        assert_eq!(target_snapshot_id(&source), "copy-backup-orders-db-2024-03-09-00-05-07");
        assert_eq!(export_task_id(&source), "export-backup-orders-db-2024-03-09-00-05-07");
        assert_eq!(target_prefix("orders-db"), "copy-backup-orders-db-");
    }

    #[test]
    fn test_prefix_does_not_match_longer_db_names() {
        let other = source_snapshot_id("orders-db", at());
        assert_eq!(prefixed_timestamp(&other, &source_prefix("orders")), None);
        assert_eq!(
            prefixed_timestamp(&other, &source_prefix("orders-db")),
            Some(at().naive_utc())
        );

        let copy = target_snapshot_id(&other);
        assert_eq!(prefixed_timestamp(&copy, &target_prefix("orders")), None);
        assert!(prefixed_timestamp(&copy, &target_prefix("orders-db")).is_some());
    }

    #[test]
    fn test_prefixed_timestamp_rejects_hand_named_snapshots() {
        let prefix = source_prefix("orders-db");
        assert_eq!(prefixed_timestamp("backup-orders-db-manual", &prefix), None);
        assert_eq!(prefixed_timestamp("backup-orders-db-2024-03-09", &prefix), None);
        assert_eq!(prefixed_timestamp("nightly-orders-db", &prefix), None);
    }

    proptest! {
        #[test]
        fn prop_snapshot_ids_carry_their_day_and_prefixes(
            db in "[a-z][a-z0-9-]{0,20}",
            secs in 0i64..4_102_444_800,
        ) {
            let at = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
            let source = source_snapshot_id(&db, at);
            let copy = target_snapshot_id(&source);

            prop_assert!(source.starts_with(&same_day_prefix(&db, at)));
            prop_assert_eq!(prefixed_timestamp(&source, &source_prefix(&db)), Some(at.naive_utc()));
            prop_assert_eq!(prefixed_timestamp(&copy, &target_prefix(&db)), Some(at.naive_utc()));
        }
    }
}
