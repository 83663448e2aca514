// Timing policy for one backup run

use std::time::Duration;

/// Attempt caps, backoffs, wait bounds and the retention horizon.
///
/// The defaults reproduce the production schedule: 12 describe attempts five
/// minutes apart (about an hour), two-hour snapshot waits, five-minute export
/// polling with no cap, and a fifteen-day retention horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupPolicy {
    /// Attempts of the source-snapshot loop
    pub max_attempts: u32,
    /// Fixed delay between source-snapshot attempts
    pub retry_backoff: Duration,
    /// Upper bound on waiting for a snapshot to become available
    pub snapshot_wait_timeout: Duration,
    /// Delay between snapshot availability checks
    pub snapshot_poll_interval: Duration,
    /// Delay between export task status checks
    pub export_poll_interval: Duration,
    /// Optional cap on export status checks; `None` polls until terminal
    pub export_poll_max_attempts: Option<u32>,
    /// Snapshots older than this are swept
    pub retention: Duration,
}

impl BackupPolicy {
    /// Production defaults.
    pub fn new() -> Self {
        Self {
            max_attempts: 12,
            retry_backoff: Duration::from_secs(5 * 60),
            snapshot_wait_timeout: Duration::from_secs(2 * 60 * 60),
            snapshot_poll_interval: Duration::from_secs(30),
            export_poll_interval: Duration::from_secs(5 * 60),
            export_poll_max_attempts: None,
            retention: Duration::from_secs(15 * 24 * 60 * 60),
        }
    }

    /// At least one attempt is always made.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay between source-snapshot attempts.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Bound on each snapshot availability wait.
    pub fn snapshot_wait_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_wait_timeout = timeout;
        self
    }

    /// Delay between snapshot availability checks.
    pub fn snapshot_poll_interval(mut self, interval: Duration) -> Self {
        self.snapshot_poll_interval = interval;
        self
    }

    /// Delay between export status checks.
    pub fn export_poll_interval(mut self, interval: Duration) -> Self {
        self.export_poll_interval = interval;
        self
    }

    /// Cap export status checks; `None` polls until the task is terminal.
    pub fn export_poll_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.export_poll_max_attempts = attempts;
        self
    }

    /// Retention horizon in whole days.
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
        self
    }
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_budget_is_about_an_hour() {
        let policy = BackupPolicy::default();
        let budget = policy.retry_backoff * (policy.max_attempts - 1);
        assert_eq!(budget, Duration::from_secs(55 * 60));
        assert!(policy.export_poll_max_attempts.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let policy = BackupPolicy::new().retention_days(7).max_attempts(0);
        assert_eq!(policy.retention, Duration::from_secs(7 * 86_400));
        assert_eq!(policy.max_attempts, 1);
    }
}
