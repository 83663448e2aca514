//! Run notifications.
//!
//! A notifier receives the result record and whether the run succeeded. The
//! caller logs delivery failures; they never change the outcome of a run.

use crate::backup::BackupResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

mod templates;

pub use templates::{EmailMessage, EmailTemplates};

/// Terminal status of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Snapshot, copy and exports all completed
    Succeeded,
    /// The workflow returned an error
    Failed,
}

/// Errors delivering a notification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    /// The message could not be assembled
    #[error("failed to build message: {0}")]
    Build(String),

    /// The delivery service rejected the message
    #[error("failed to send email: {0}")]
    Delivery(String),
}

/// Delivers the outcome of a run
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `result` with its terminal `status`.
    async fn deliver(&self, result: &BackupResult, status: RunStatus) -> Result<(), NotifyError>;
}

/// Notifier that only writes the rendered message to the log
pub struct LogNotifier {
    recipient: String,
    templates: EmailTemplates,
}

impl LogNotifier {
    /// Log messages addressed to `recipient`.
    pub fn new(recipient: impl Into<String>) -> Result<Self, NotifyError> {
        Ok(Self {
            recipient: recipient.into(),
            templates: EmailTemplates::new()?,
        })
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, result: &BackupResult, status: RunStatus) -> Result<(), NotifyError> {
        let email = self.templates.render(result, status)?;
        let payload =
            serde_json::to_string(result).map_err(|e| NotifyError::Build(e.to_string()))?;
        match status {
            RunStatus::Succeeded => info!(%payload, "[notify {}] {}", self.recipient, email.subject),
            RunStatus::Failed => error!(
                %payload,
                "[notify {}] {}: {}",
                self.recipient,
                email.subject,
                result.error_message.as_deref().unwrap_or("")
            ),
        }
        Ok(())
    }
}

/// Notifier that keeps every delivery in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<(BackupResult, RunStatus)>>,
    failure: Mutex<Option<String>>,
}

impl RecordingNotifier {
    /// Empty recorder that accepts every delivery.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail with `message` (deliveries are still recorded).
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    /// Every delivery so far, oldest first.
    pub fn deliveries(&self) -> Vec<(BackupResult, RunStatus)> {
        self.deliveries.lock().clone()
    }

    /// Most recent delivery.
    pub fn last(&self) -> Option<(BackupResult, RunStatus)> {
        self.deliveries.lock().last().cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, result: &BackupResult, status: RunStatus) -> Result<(), NotifyError> {
        self.deliveries.lock().push((result.clone(), status));
        match self.failure.lock().clone() {
            Some(message) => Err(NotifyError::Delivery(message)),
            None => Ok(()),
        }
    }
}
