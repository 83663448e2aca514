// Retention sweep: delete aged snapshots in both regions

use super::manager::BackupManager;
use super::naming;
use super::types::{BackupError, CleanupReport, Side, SweepReport};
use crate::clients::{SnapshotStore, StoreError};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

/// Delete every manual snapshot in `store` named `<prefix><timestamp>` whose
/// creation time is strictly before `cutoff`.
///
/// A failed delete is logged and recorded, and the sweep moves on. A failed
/// page listing ends the sweep with an error.
pub async fn sweep_snapshots(
    store: &dyn SnapshotStore,
    prefix: &str,
    cutoff: DateTime<Utc>,
) -> Result<SweepReport, StoreError> {
    let mut report = SweepReport {
        prefix: prefix.to_string(),
        ..SweepReport::default()
    };
    let mut marker = None;

    loop {
        let page = store.list_manual_snapshots(marker).await?;

        for snapshot in page.snapshots {
            if naming::prefixed_timestamp(&snapshot.identifier, prefix).is_none() {
                continue;
            }
            let Some(created_at) = snapshot.created_at else {
                continue;
            };
            if created_at >= cutoff {
                report.retained += 1;
                continue;
            }

            info!(
                "Deleting old snapshot: {} (created: {})",
                snapshot.identifier,
                created_at.to_rfc3339()
            );
            match store.delete_snapshot(&snapshot.identifier).await {
                Ok(()) => report.deleted.push(snapshot.identifier),
                Err(error) => {
                    warn!("Failed to delete snapshot {}: {}", snapshot.identifier, error);
                    report.failed_deletes.push((snapshot.identifier, error.to_string()));
                }
            }
        }

        marker = page.next_marker;
        if marker.is_none() {
            return Ok(report);
        }
    }
}

impl BackupManager {
    /// Sweep the source region, then the target region.
    ///
    /// The sides are swept in order and a listing failure on the source side
    /// returns before the target side is attempted.
    #[instrument(skip(self), fields(db = %self.db_identifier))]
    pub async fn cleanup_old_snapshots(&self) -> Result<CleanupReport, BackupError> {
        let now = self.clock.now();
        let cutoff = chrono::Duration::from_std(self.policy.retention)
            .ok()
            .and_then(|horizon| now.checked_sub_signed(horizon))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let source = sweep_snapshots(
            self.source.store.as_ref(),
            &naming::source_prefix(&self.db_identifier),
            cutoff,
        )
        .await
        .map_err(|source| BackupError::Sweep {
            side: Side::Source,
            source,
        })?;

        let target = sweep_snapshots(
            self.target.store.as_ref(),
            &naming::target_prefix(&self.db_identifier),
            cutoff,
        )
        .await
        .map_err(|source| BackupError::Sweep {
            side: Side::Target,
            source,
        })?;

        info!(
            "Retention sweep deleted {} source and {} target snapshots",
            source.deleted.len(),
            target.deleted.len()
        );
        Ok(CleanupReport { source, target })
    }
}
