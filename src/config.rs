//! Command line and environment configuration.
//!
//! Every option can be given as a flag or through its environment variable.
//! Required values that are missing abort startup before any client is built.
//! A `.env` file, when one is found, seeds the environment first; variables
//! already set in the process win over the file.

use crate::backup::BackupPolicy;
use chrono::NaiveTime;
use clap::{ArgAction, Parser};
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directories searched for `.env`: the starting one and its parents.
const DOTENV_SEARCH_DEPTH: usize = 3;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A boolean option held something other than a recognised flag value
    #[error("invalid boolean value '{0}' (expected true/false, 1/0 or yes/no)")]
    InvalidFlag(String),

    /// The database identifier does not follow instance naming rules
    #[error("invalid database identifier '{0}'")]
    InvalidDbIdentifier(String),

    /// Both regions are the same
    #[error("source and target region must differ (both are '{0}')")]
    SameRegion(String),

    /// Malformed e-mail address
    #[error("invalid e-mail address '{0}'")]
    InvalidEmail(String),

    /// Daily run time is not HH:MM
    #[error("invalid run time '{0}' (expected HH:MM in UTC)")]
    InvalidRunAt(String),

    /// Retention of zero days would delete every snapshot
    #[error("retention must be at least one day")]
    ZeroRetention,
}

/// Parse a boolean option the way operators tend to write them.
pub fn parse_flag(raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidFlag(raw.to_string())),
    }
}

/// Replication settings for one database
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "rds-replicator")]
pub struct BackupConfig {
    /// Database instance to back up
    #[arg(long, env = "DB_IDENTIFIER")]
    pub db_identifier: String,

    /// Region the database lives in
    #[arg(long, env = "SOURCE_REGION")]
    pub source_region: String,

    /// Region receiving the encrypted copy
    #[arg(long, env = "TARGET_REGION")]
    pub target_region: String,

    /// Export bucket in the source region
    #[arg(long, env = "SOURCE_BUCKET")]
    pub source_bucket: String,

    /// Export bucket in the target region
    #[arg(long, env = "TARGET_BUCKET")]
    pub target_bucket: String,

    /// Key id, multi-region key id or key ARN
    #[arg(long, env = "KMS_KEY_ID")]
    pub kms_key_id: String,

    /// Role assumed by the export service
    #[arg(long, env = "EXPORT_ROLE_ARN")]
    pub export_role_arn: String,

    /// Recipient of run notifications
    #[arg(long, env = "ADMIN_EMAIL")]
    pub admin_email: String,

    /// Keep the source-region snapshot after a successful copy
    #[arg(long, env = "KEEP_SOURCE_SNAPSHOT", action = ArgAction::Set, required = true, value_parser = parse_flag)]
    pub keep_source_snapshot: bool,

    /// Export the source-region snapshot too
    #[arg(long, env = "STORE_TO_SOURCE_S3", action = ArgAction::Set, required = true, value_parser = parse_flag)]
    pub store_to_source_s3: bool,

    /// Sender address for notifications (defaults to the admin address)
    #[arg(long, env = "NOTIFICATION_SENDER")]
    pub notification_sender: Option<String>,

    /// Snapshots older than this many days are deleted
    #[arg(long, env = "RETENTION_DAYS", default_value_t = 15)]
    pub retention_days: u32,

    /// Stop polling an export task after this many checks
    #[arg(long, env = "EXPORT_POLL_MAX_ATTEMPTS")]
    pub export_poll_max_attempts: Option<u32>,

    /// Daily run time, HH:MM in UTC
    #[arg(long = "run-at", env = "BACKUP_RUN_AT", default_value = "00:00")]
    pub run_at: String,

    /// Override the service endpoint (local stacks)
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,
}

impl BackupConfig {
    /// Check values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let identifier = Regex::new(r"^[A-Za-z][A-Za-z0-9]*(-[A-Za-z0-9]+)*$")
            .map_err(|e| ConfigError::InvalidDbIdentifier(e.to_string()))?;
        if self.db_identifier.len() > 63 || !identifier.is_match(&self.db_identifier) {
            return Err(ConfigError::InvalidDbIdentifier(self.db_identifier.clone()));
        }

        if self.source_region == self.target_region {
            return Err(ConfigError::SameRegion(self.source_region.clone()));
        }

        let email = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
            .map_err(|e| ConfigError::InvalidEmail(e.to_string()))?;
        for address in std::iter::once(&self.admin_email).chain(self.notification_sender.as_ref()) {
            if !email.is_match(address) {
                return Err(ConfigError::InvalidEmail(address.clone()));
            }
        }

        if self.retention_days == 0 {
            return Err(ConfigError::ZeroRetention);
        }

        self.run_at_time()?;
        Ok(())
    }

    /// Parsed daily run time.
    pub fn run_at_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.run_at, "%H:%M")
            .map_err(|_| ConfigError::InvalidRunAt(self.run_at.clone()))
    }

    /// Address notifications are sent from.
    pub fn sender(&self) -> &str {
        self.notification_sender.as_deref().unwrap_or(&self.admin_email)
    }

    /// Timing policy with the configured retention and export cap.
    pub fn policy(&self) -> BackupPolicy {
        BackupPolicy::default()
            .retention_days(self.retention_days)
            .export_poll_max_attempts(self.export_poll_max_attempts)
    }
}

/// Load the first `.env` found in `start` or up to two of its parents.
///
/// Returns the loaded file, or `None` when no readable file was found.
pub fn load_dotenv_from(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take(DOTENV_SEARCH_DEPTH)
        .map(|dir| dir.join(".env"))
        .find(|path| dotenvy::from_path(path).is_ok())
}

/// [`load_dotenv_from`] starting at the working directory.
pub fn load_dotenv() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    load_dotenv_from(&cwd)
}
