// One scheduled backup run: perform the workflow, then notify

use super::manager::BackupManager;
use super::types::{BackupResult, PerformReport};
use crate::notification::{Notifier, RunStatus};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of a single run as seen by the scheduler
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Correlates log lines of one run
    pub run_id: Uuid,
    /// Final result record, including the error message on failure
    pub result: BackupResult,
    /// `None` when the workflow failed or was cancelled
    pub report: Option<PerformReport>,
    /// The run stopped because shutdown was requested
    pub cancelled: bool,
    /// A notification was handed to the notifier and accepted
    pub notified: bool,
}

impl RunSummary {
    /// The workflow finished and produced a report
    pub fn succeeded(&self) -> bool {
        self.report.is_some()
    }
}

/// A backup manager paired with the notifier for its outcomes
pub struct BackupJob {
    manager: Arc<BackupManager>,
    notifier: Arc<dyn Notifier>,
}

impl BackupJob {
    /// Notify `notifier` about every run of `manager`.
    pub fn new(manager: Arc<BackupManager>, notifier: Arc<dyn Notifier>) -> Self {
        Self { manager, notifier }
    }

    /// The manager driven by this job
    pub fn manager(&self) -> &BackupManager {
        &self.manager
    }

    /// Run the workflow once and deliver exactly one notification.
    ///
    /// Runs interrupted by shutdown are not notified. Notification failures
    /// are logged and do not change the outcome.
    #[instrument(skip(self), fields(db = %self.manager.db_identifier(), run_id = tracing::field::Empty))]
    pub async fn run(&self) -> RunSummary {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        info!("Starting backup process");

        let mut result = self.manager.new_result();
        let outcome = self.manager.perform(&mut result).await;

        let (report, status) = match outcome {
            Ok(report) => (Some(report), RunStatus::Succeeded),
            Err(e) if e.is_cancelled() => {
                warn!("Backup run cancelled by shutdown");
                return RunSummary {
                    run_id,
                    result,
                    report: None,
                    cancelled: true,
                    notified: false,
                };
            }
            Err(e) => {
                error!("Backup failed: {}", e);
                result.error_message = Some(e.to_string());
                (None, RunStatus::Failed)
            }
        };

        let notified = match self.notifier.deliver(&result, status).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send notification: {}", e);
                false
            }
        };

        RunSummary {
            run_id,
            result,
            report,
            cancelled: false,
            notified,
        }
    }
}
