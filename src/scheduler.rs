//! Daily trigger with a single active run.
//!
//! The scheduler fires once at startup (optional) and then every day at a
//! fixed UTC time. A trigger that arrives while the previous run is still
//! going is skipped, never queued.

use crate::backup::{BackupJob, RunSummary};
use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Fixed time of day in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    /// Every day at `at` UTC.
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    /// Midnight UTC
    pub fn midnight() -> Self {
        Self::new(NaiveTime::MIN)
    }

    /// First occurrence strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = Utc.from_utc_datetime(&now.date_naive().and_time(self.at));
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }

    /// Time left until the next occurrence.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self::midnight()
    }
}

/// Trigger counters for one scheduler lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Runs started
    pub started: u64,
    /// Triggers dropped because a run was still in flight
    pub skipped: u64,
}

/// Runs a [`BackupJob`] on a [`DailySchedule`] until shutdown.
pub struct Scheduler {
    job: Arc<BackupJob>,
    schedule: DailySchedule,
    permit: Arc<Semaphore>,
    shutdown: CancellationToken,
    clock: Arc<dyn Clock>,
    run_at_start: bool,
    started: AtomicU64,
    skipped: AtomicU64,
}

impl Scheduler {
    /// Schedule `job`, stopping when `shutdown` is cancelled.
    pub fn new(job: Arc<BackupJob>, schedule: DailySchedule, shutdown: CancellationToken) -> Self {
        Self {
            job,
            schedule,
            permit: Arc::new(Semaphore::new(1)),
            clock: Arc::new(SystemClock::new(shutdown.clone())),
            shutdown,
            run_at_start: true,
            started: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Whether to run once immediately before waiting for the first daily slot.
    pub fn run_at_start(mut self, enabled: bool) -> Self {
        self.run_at_start = enabled;
        self
    }

    /// Clock used to wait for daily slots.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Counters so far
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            started: self.started.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    /// Start a run in the background unless one is already in flight.
    pub fn trigger(&self) -> Option<JoinHandle<RunSummary>> {
        let permit = match self.permit.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Previous backup still running, skipping this trigger");
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        self.started.fetch_add(1, Ordering::Relaxed);

        let job = Arc::clone(&self.job);
        Some(tokio::spawn(async move {
            let summary = job.run().await;
            if summary.succeeded() {
                info!("Backup run {} finished", summary.run_id);
            } else if !summary.cancelled {
                error!("Backup run {} failed", summary.run_id);
            }
            drop(permit);
            summary
        }))
    }

    /// Loop until shutdown, then wait for the in-flight run to finish.
    pub async fn run(&self) -> SchedulerStats {
        if self.run_at_start {
            info!("Running initial backup");
            self.trigger();
        }

        loop {
            let now = self.clock.now();
            let delay = self.schedule.delay_from(now);
            info!("Next backup scheduled at {}", self.schedule.next_after(now).to_rfc3339());

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                slept = self.clock.sleep(delay) => {
                    if slept.is_err() {
                        break;
                    }
                    self.trigger();
                }
            }
        }

        info!("Shutting down scheduler");
        self.drain().await;
        info!("Scheduler stopped");
        self.stats()
    }

    /// Wait until no run holds the permit.
    pub async fn drain(&self) {
        if let Ok(permit) = self.permit.acquire().await {
            drop(permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_next_after_same_day() {
        let schedule = DailySchedule::new(NaiveTime::from_hms_opt(3, 30, 0).unwrap());
        assert_eq!(schedule.next_after(at(1, 0, 0)), at(3, 30, 0));
        assert_eq!(schedule.delay_from(at(1, 0, 0)), Duration::from_secs(150 * 60));
    }

    #[test]
    fn test_next_after_rolls_to_tomorrow() {
        let schedule = DailySchedule::midnight();
        assert_eq!(
            schedule.next_after(at(0, 0, 0)),
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
        );
        assert_eq!(
            schedule.next_after(at(23, 59, 59)),
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
        );
    }
}
