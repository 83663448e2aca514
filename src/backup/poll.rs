//! Polling state machines.
//!
//! Each "wait until terminal status" loop is split into a pure transition
//! function, which maps one observation to [`Transition`], and [`drive`],
//! which repeats a probe on a fixed interval through the injected [`Clock`].

use super::types::BackupError;
use crate::clients::{ExportState, ExportTaskStatus, SnapshotInfo, SnapshotState, SnapshotStore, StoreError};
use crate::clock::Clock;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one observation
#[derive(Debug)]
pub enum Transition<T> {
    /// Not terminal yet, poll again
    Continue,
    /// Terminal success
    Done(T),
    /// Terminal failure
    Fail(BackupError),
}

/// How long [`drive`] keeps polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLimit {
    /// Until a terminal transition
    Unbounded,
    /// At most this many probes
    Attempts(u32),
    /// Until this much clock time has elapsed since the first probe
    Elapsed(Duration),
}

/// Snapshot availability transition.
///
/// A snapshot that is not visible yet keeps the wait going: describe calls
/// right after a create or copy request may not see it. Describe failures are
/// treated as transient and only the wait's time bound ends them.
pub fn snapshot_transition(
    snapshot_id: &str,
    observed: Result<Option<SnapshotInfo>, StoreError>,
) -> Transition<SnapshotInfo> {
    match observed {
        Ok(Some(info)) => match info.state {
            SnapshotState::Available => Transition::Done(info),
            SnapshotState::Creating => Transition::Continue,
            SnapshotState::Failed(status) => Transition::Fail(BackupError::SnapshotFailed {
                snapshot_id: snapshot_id.to_string(),
                status,
            }),
        },
        Ok(None) => Transition::Continue,
        Err(error) => {
            warn!("Describe of snapshot {} failed, retrying: {}", snapshot_id, error);
            Transition::Continue
        }
    }
}

/// Export task transition: only `COMPLETE` succeeds.
pub fn export_transition(
    task_id: &str,
    observed: Result<Option<ExportTaskStatus>, StoreError>,
) -> Transition<()> {
    let status = match observed {
        Ok(Some(status)) => status,
        Ok(None) => return Transition::Fail(BackupError::ExportTaskMissing(task_id.to_string())),
        Err(error) => return Transition::Fail(error.into()),
    };

    match status.state {
        ExportState::Complete => Transition::Done(()),
        ExportState::Failed => Transition::Fail(BackupError::ExportFailed {
            task_id: task_id.to_string(),
            cause: status
                .failure_cause
                .unwrap_or_else(|| "unknown failure".to_string()),
        }),
        ExportState::InProgress(raw) => {
            debug!("Export task {} status: {}", task_id, raw);
            Transition::Continue
        }
    }
}

/// Run `probe` every `interval` until it reaches a terminal transition or
/// `limit` is hit, in which case `exhausted(probes)` is returned.
///
/// Every sleep goes through `clock`, so shutdown interrupts the loop with
/// [`BackupError::Cancelled`].
pub async fn drive<T, F, Fut>(
    clock: &dyn Clock,
    interval: Duration,
    limit: PollLimit,
    mut probe: F,
    exhausted: impl FnOnce(u32) -> BackupError,
) -> Result<T, BackupError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Transition<T>>,
{
    let started = clock.now();
    let mut probes: u32 = 0;

    loop {
        probes += 1;
        match probe().await {
            Transition::Done(value) => return Ok(value),
            Transition::Fail(error) => return Err(error),
            Transition::Continue => {}
        }

        let delay = match limit {
            PollLimit::Unbounded => interval,
            PollLimit::Attempts(max) => {
                if probes >= max {
                    return Err(exhausted(probes));
                }
                interval
            }
            PollLimit::Elapsed(budget) => {
                let elapsed = (clock.now() - started).to_std().unwrap_or_default();
                if elapsed >= budget {
                    return Err(exhausted(probes));
                }
                interval.min(budget - elapsed)
            }
        };

        clock.sleep(delay).await?;
    }
}

/// Wait for `snapshot_id` to become available, bounded by `timeout`.
pub async fn wait_for_snapshot(
    store: &dyn SnapshotStore,
    clock: &dyn Clock,
    snapshot_id: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<SnapshotInfo, BackupError> {
    drive(
        clock,
        interval,
        PollLimit::Elapsed(timeout),
        || async move { snapshot_transition(snapshot_id, store.describe_snapshot(snapshot_id).await) },
        |_| BackupError::WaitTimeout {
            snapshot_id: snapshot_id.to_string(),
            timeout,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MemorySnapshotStore;
    use crate::clock::ManualClock;

    fn info(state: SnapshotState) -> SnapshotInfo {
        SnapshotInfo {
            identifier: "s".into(),
            arn: "arn".into(),
            state,
            created_at: None,
        }
    }

    #[test]
    fn test_snapshot_transitions() {
        assert!(matches!(
            snapshot_transition("s", Ok(Some(info(SnapshotState::Available)))),
            Transition::Done(_)
        ));
        assert!(matches!(
            snapshot_transition("s", Ok(Some(info(SnapshotState::Creating)))),
            Transition::Continue
        ));
        assert!(matches!(snapshot_transition("s", Ok(None)), Transition::Continue));
        assert!(matches!(
            snapshot_transition("s", Err(StoreError::service("DescribeDBSnapshots", "Throttling"))),
            Transition::Continue
        ));
        assert!(matches!(
            snapshot_transition("s", Ok(Some(info(SnapshotState::Failed("failed".into()))))),
            Transition::Fail(BackupError::SnapshotFailed { .. })
        ));
    }

    #[test]
    fn test_export_failure_without_cause() {
        let status = ExportTaskStatus::new("FAILED");
        match export_transition("export-s", Ok(Some(status))) {
            Transition::Fail(BackupError::ExportFailed { cause, .. }) => {
                assert_eq!(cause, "unknown failure")
            }
            other => panic!("unexpected transition: {:?}", other),
        }
    }

    #[test]
    fn test_export_missing_task() {
        assert!(matches!(
            export_transition("export-s", Ok(None)),
            Transition::Fail(BackupError::ExportTaskMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_drive_attempt_limit() {
        let clock = ManualClock::starting_at_epoch();
        let result: Result<(), _> = drive(
            &clock,
            Duration::from_secs(60),
            PollLimit::Attempts(3),
            || async { Transition::Continue },
            |n| BackupError::Timeout { attempts: n, what: "test".into() },
        )
        .await;

        assert!(matches!(result, Err(BackupError::Timeout { attempts: 3, .. })));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_times_out_on_stuck_snapshot() {
        let clock = ManualClock::starting_at_epoch();
        let store = MemorySnapshotStore::new("us-east-1");
        store.insert_stuck_snapshot("stuck");

        let result = wait_for_snapshot(
            &store,
            &clock,
            "stuck",
            Duration::from_secs(30),
            Duration::from_secs(2 * 60 * 60),
        )
        .await;

        assert!(matches!(result, Err(BackupError::WaitTimeout { .. })));
        assert_eq!(clock.slept(), Duration::from_secs(2 * 60 * 60));
    }

    #[tokio::test]
    async fn test_drive_stops_on_cancellation() {
        let clock = ManualClock::starting_at_epoch();
        clock.cancel_after(2);
        let result: Result<(), _> = drive(
            &clock,
            Duration::from_secs(300),
            PollLimit::Unbounded,
            || async { Transition::Continue },
            |n| BackupError::Timeout { attempts: n, what: "test".into() },
        )
        .await;

        assert!(matches!(result, Err(BackupError::Cancelled(_))));
    }
}
