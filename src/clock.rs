//! Time source for every wait, poll and backoff in the workflow.
//!
//! The orchestrator never calls `tokio::time::sleep` directly. Going through
//! [`Clock`] makes each sleep a cancellation point and lets tests run hours of
//! simulated polling instantly with [`ManualClock`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returned by [`Clock::sleep`] when shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled by shutdown")]
pub struct Cancelled;

/// Wall-clock time plus cancellable sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `duration`, returning early with [`Cancelled`] on shutdown.
    async fn sleep(&self, duration: Duration) -> Result<(), Cancelled>;
}

/// Real clock backed by tokio timers.
#[derive(Debug, Clone, Default)]
pub struct SystemClock {
    shutdown: CancellationToken,
}

impl SystemClock {
    /// Create a clock that is cancelled together with `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.shutdown.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Simulated clock: `sleep` advances virtual time and returns immediately.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
    cancel_after: Mutex<Option<usize>>,
}

impl ManualClock {
    /// Start the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
            cancel_after: Mutex::new(None),
        }
    }

    /// Start the clock at the Unix epoch.
    pub fn starting_at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        let next = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|step| now.checked_add_signed(step))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        *now = next;
    }

    /// Every sleep taken so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Total simulated time spent sleeping.
    pub fn slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }

    /// Make every sleep after the first `sleeps` ones report cancellation.
    pub fn cancel_after(&self, sleeps: usize) {
        *self.cancel_after.lock() = Some(sleeps);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if let Some(limit) = *self.cancel_after.lock() {
            if self.sleeps.lock().len() >= limit {
                return Err(Cancelled);
            }
        }
        self.sleeps.lock().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
        Ok(())
    }
}
