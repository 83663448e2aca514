//! # RDS Replicator
//!
//! Scheduled, cross-region replication of managed database snapshots.
//!
//! ## Overview
//!
//! A single backup run snapshots a database instance, optionally exports the
//! snapshot to object storage, copies it to a second region re-encrypted under
//! a region-local key, exports the copy, and finally prunes snapshots that are
//! older than the retention horizon.
//!
//! Every remote system is reached through a trait so the orchestration can be
//! driven against the AWS adapters in production and against the in-memory
//! adapters in tests:
//!
//! ```rust
//! use std::sync::Arc;
//! use rds_replicator::backup::{BackupManager, BackupPolicy, BackupResult, RegionClients};
//! use rds_replicator::clients::{MemoryExportClient, MemorySnapshotStore};
//! use rds_replicator::clock::ManualClock;
//! use rds_replicator::keys::StaticKeyResolver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Arc::new(ManualClock::starting_at_epoch());
//! let source = Arc::new(MemorySnapshotStore::new("us-east-1"));
//! let target = Arc::new(MemorySnapshotStore::new("us-west-2"));
//! source.add_instance("orders-db", "available");
//!
//! let manager = BackupManager::builder("orders-db")
//!     .source(RegionClients::new(source.clone(), Arc::new(MemoryExportClient::new()), "src-bucket"))
//!     .target(RegionClients::new(target.clone(), Arc::new(MemoryExportClient::new()), "dst-bucket"))
//!     .keys(Arc::new(StaticKeyResolver::new("123456789012")), "alias-key")
//!     .export_role("arn:aws:iam::123456789012:role/export")
//!     .policy(BackupPolicy::default())
//!     .clock(clock)
//!     .build()?;
//!
//! let mut result = BackupResult::new("orders-db", manager.now());
//! manager.perform(&mut result).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`backup`]: the orchestration stages, polling state machines and retention sweep
//! - [`clients`]: snapshot-store and export-task seams plus in-memory adapters
//! - [`keys`]: encryption key resolution
//! - [`clock`]: injectable time source and cancellable sleep
//! - [`notification`]: result rendering and delivery
//! - [`scheduler`]: daily trigger with a single active run
//! - [`config`]: command line and environment configuration

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for replicator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for replicator operations
#[derive(Error, Debug)]
pub enum Error {
    /// Backup workflow error
    #[error("Backup error: {0}")]
    Backup(#[from] backup::BackupError),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    Notify(#[from] notification::NotifyError),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Backup orchestration and retention
pub mod backup;

/// Snapshot store and export task clients
pub mod clients;

/// Injectable clock
pub mod clock;

/// Configuration loading
pub mod config;

/// Encryption key resolution
pub mod keys;

/// Result notification
pub mod notification;

/// Daily scheduling
pub mod scheduler;

/// AWS-backed adapters
#[cfg(feature = "aws")]
pub mod aws;
