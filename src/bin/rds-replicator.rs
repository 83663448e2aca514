use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use rds_replicator::aws::AwsAdapters;
use rds_replicator::backup::{BackupJob, BackupManager, RegionClients};
use rds_replicator::clients::{MemoryExportClient, MemorySnapshotStore};
use rds_replicator::clock::{Clock, ManualClock, SystemClock};
use rds_replicator::config::BackupConfig;
use rds_replicator::keys::StaticKeyResolver;
use rds_replicator::notification::{LogNotifier, Notifier};
use rds_replicator::scheduler::{DailySchedule, Scheduler};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rds-replicator", version, about = "Daily cross-region RDS snapshot replication")]
struct Cli {
    #[command(flatten)]
    config: BackupConfig,

    /// Run a single backup and exit.
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Do not run at startup; wait for the first daily slot.
    #[arg(long, default_value_t = false)]
    skip_initial_run: bool,

    /// Use in-memory adapters instead of AWS. Nothing leaves the process.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("rds_replicator=info"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = rds_replicator::config::load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;
    match dotenv {
        Some(path) => info!("Loaded environment from {}", path.display()),
        None => warn!(".env file not found, using existing environment variables"),
    }

    let config = cli.config;
    config.validate().context("invalid configuration")?;
    info!(
        "Replicating {} from {} to {}",
        config.db_identifier, config.source_region, config.target_region
    );

    let shutdown = CancellationToken::new();
    let job = Arc::new(if cli.dry_run {
        dry_run_job(&config)?
    } else {
        aws_job(&config, shutdown.clone()).await?
    });

    if cli.once {
        let mut run = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.run().await }
        });
        let summary = tokio::select! {
            summary = &mut run => summary?,
            _ = shutdown_signal() => {
                shutdown.cancel();
                run.await?
            }
        };
        if !summary.succeeded() {
            anyhow::bail!(summary
                .result
                .error_message
                .unwrap_or_else(|| "backup run cancelled".to_string()));
        }
        return Ok(());
    }

    let schedule = DailySchedule::new(config.run_at_time()?);
    let scheduler = Arc::new(
        Scheduler::new(job, schedule, shutdown.clone()).run_at_start(!cli.skip_initial_run),
    );
    info!("Scheduler started. Waiting for signals...");

    let running = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run().await }
    });

    shutdown_signal().await;
    info!("Shutting down gracefully...");
    shutdown.cancel();

    let stats = running.await?;
    info!(
        "Scheduler stopped after {} runs ({} skipped triggers)",
        stats.started, stats.skipped
    );
    Ok(())
}

async fn aws_job(config: &BackupConfig, shutdown: CancellationToken) -> anyhow::Result<BackupJob> {
    let adapters = AwsAdapters::connect(config).await?;
    if let Err(e) = adapters.verify_buckets().await {
        warn!("Export bucket check failed: {}", e);
    }

    let manager = BackupManager::builder(&config.db_identifier)
        .configure(config)
        .source(adapters.source)
        .target(adapters.target)
        .keys(adapters.keys, &config.kms_key_id)
        .clock(Arc::new(SystemClock::new(shutdown)))
        .build()?;

    Ok(BackupJob::new(Arc::new(manager), adapters.notifier))
}

fn dry_run_job(config: &BackupConfig) -> anyhow::Result<BackupJob> {
    warn!("Dry run: using in-memory adapters");
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));

    let source = Arc::new(MemorySnapshotStore::new(&config.source_region).with_clock(Arc::clone(&clock)));
    source.add_instance(&config.db_identifier, "available");
    let target = Arc::new(MemorySnapshotStore::new(&config.target_region).with_clock(Arc::clone(&clock)));

    let manager = BackupManager::builder(&config.db_identifier)
        .configure(config)
        .source(RegionClients::new(source, Arc::new(MemoryExportClient::new()), &config.source_bucket))
        .target(RegionClients::new(target, Arc::new(MemoryExportClient::new()), &config.target_bucket))
        .keys(Arc::new(StaticKeyResolver::new("000000000000")), &config.kms_key_id)
        .clock(clock)
        .build()?;

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(&config.admin_email)?);
    Ok(BackupJob::new(Arc::new(manager), notifier))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown requested");
}
