// Backup orchestration: source snapshot, cross-region copy, exports and retention

/// Scheduled run with notification
pub mod job;
/// Manager and its builder
pub mod manager;
pub mod naming;
/// Timing policy
pub mod policy;
pub mod poll;
/// Run record, reports and errors
pub mod types;

mod export;
mod replicate;
mod retention;
mod source;

pub use job::{BackupJob, RunSummary};
pub use manager::{BackupManager, BackupManagerBuilder, RegionClients};
pub use policy::BackupPolicy;
pub use poll::{drive, export_transition, snapshot_transition, wait_for_snapshot, PollLimit, Transition};
pub use retention::sweep_snapshots;
pub use types::{
    BackupError, BackupResult, CleanupReport, Outcome, PerformReport, Side, StorageLocation,
    SweepReport,
};
