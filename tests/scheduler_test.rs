//! Scheduler: initial run, daily trigger, busy skip and graceful shutdown

mod common;

use chrono::{NaiveTime, TimeZone, Utc};
use common::{Fixture, DB};
use pretty_assertions::assert_eq;
use rds_replicator::backup::{BackupJob, BackupPolicy};
use rds_replicator::clock::{ManualClock, SystemClock};
use rds_replicator::scheduler::{DailySchedule, Scheduler, SchedulerStats};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn scheduler_clock(cancel_after: usize) -> Arc<ManualClock> {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap(),
    ));
    clock.cancel_after(cancel_after);
    clock
}

#[tokio::test]
async fn test_initial_run_completes_before_shutdown_returns() {
    let fixture = Fixture::new();
    let job = Arc::new(fixture.job(fixture.manager()));
    let scheduler = Scheduler::new(job, DailySchedule::midnight(), CancellationToken::new())
        .with_clock(scheduler_clock(0));

    let stats = scheduler.run().await;

    assert_eq!(stats, SchedulerStats { started: 1, skipped: 0 });
    assert_eq!(fixture.notifier.deliveries().len(), 1);
}

#[tokio::test]
async fn test_skip_initial_run_waits_for_daily_slot() {
    let fixture = Fixture::new();
    let job = Arc::new(fixture.job(fixture.manager()));
    let clock = scheduler_clock(1);
    let schedule = DailySchedule::new(NaiveTime::from_hms_opt(3, 0, 0).unwrap());
    let scheduler = Scheduler::new(job, schedule, CancellationToken::new())
        .with_clock(clock.clone())
        .run_at_start(false);

    let stats = scheduler.run().await;

    assert_eq!(stats.started, 1);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(15 * 3600)]);
    assert_eq!(fixture.notifier.deliveries().len(), 1);
}

#[tokio::test]
async fn test_trigger_while_running_is_skipped_and_shutdown_cancels_run() {
    let fixture = Fixture::new();
    fixture.source.add_instance(DB, "modifying");
    let shutdown = CancellationToken::new();
    let manager = fixture
        .builder(DB)
        .policy(BackupPolicy::default().retry_backoff(Duration::from_secs(3600)))
        .clock(Arc::new(SystemClock::new(shutdown.clone())))
        .build()
        .unwrap();
    let job = Arc::new(BackupJob::new(Arc::new(manager), fixture.notifier.clone()));
    let scheduler = Scheduler::new(job, DailySchedule::midnight(), shutdown.clone());

    let first = scheduler.trigger().expect("first trigger starts a run");
    assert!(scheduler.trigger().is_none());
    assert_eq!(scheduler.stats(), SchedulerStats { started: 1, skipped: 1 });

    shutdown.cancel();
    let summary = first.await.unwrap();
    scheduler.drain().await;

    assert!(summary.cancelled);
    assert!(fixture.notifier.deliveries().is_empty());
}

#[tokio::test]
async fn test_shutdown_token_stops_loop() {
    let fixture = Fixture::new();
    let job = Arc::new(fixture.job(fixture.manager()));
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let scheduler = Scheduler::new(job, DailySchedule::midnight(), shutdown).run_at_start(false);

    let stats = scheduler.run().await;

    assert_eq!(stats, SchedulerStats::default());
    assert!(fixture.notifier.deliveries().is_empty());
}
