//! Archivist Service
//!
//! Compresses date-named artifact directories once they have been exported and
//! removes the raw copies after the retention offset. Runs an optional sweep
//! at startup, then the configured job on a cron schedule until shutdown.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use lifecycle::{
    CompressionStatus, ControllerConfig, ControllerTask, LifecycleController, Scheduler,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "archivist")]
#[command(about = "Archivist - compresses exported artifacts and enforces raw data retention")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<ArchivistCommands>,
}

#[derive(Subcommand)]
enum ArchivistCommands {
    #[command(flatten)]
    Common(CommonCommands),
    /// Run a single sweep over the storage root and exit
    Sweep,
    /// Compress one artifact and exit (defaults to the previous day)
    Compress {
        #[arg(help = "Artifact name, e.g. 2020-09-10")]
        name: Option<String>,
    },
}

impl Default for ArchivistCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

async fn run_sweep(controller: &LifecycleController) -> Result<()> {
    let report = controller.sweep().await.context("Sweep failed")?;

    log::info!(
        "Sweep {}: scanned={} compressed={} deleted={} skipped={} errors={}",
        report.run_id,
        report.scanned,
        report.compressed,
        report.deleted,
        report.skipped,
        report.errors.len()
    );
    for error in &report.errors {
        log::warn!("Sweep {} error: {error}", report.run_id);
    }

    Ok(())
}

async fn run_compress(controller: &LifecycleController, name: Option<&str>) -> Result<()> {
    let status = controller
        .compress_requested(name)
        .await
        .context("Compression failed")?;

    match status {
        CompressionStatus::Compressed(report) => log::info!(
            "Archive written to {} ({:.2} MB, {} files)",
            report.archive_path.display(),
            report.size_mb(),
            report.file_count()
        ),
        CompressionStatus::Failed(e) => log::warn!("Compression did not complete: {e}"),
        CompressionStatus::DryRun => log::info!("Dry run, no archive written"),
        CompressionStatus::AlreadyArchived => log::info!("Artifact is already archived"),
    }

    Ok(())
}

async fn run_service(config: &Configuration, controller: Arc<LifecycleController>) -> Result<()> {
    log::info!(
        "Starting Archivist Service (local_path={}, opendata_path={}, delete_offset={})",
        config.controller.local_path.display(),
        config.controller.opendata_path.display(),
        config.controller.delete_offset
    );

    if config.cron.initial_sync {
        log::info!("Running initial sync before starting the schedule");
        if let Err(e) = run_sweep(&controller).await {
            log::error!("Initial sync failed: {e:?}");
        }
    }

    let schedule = config
        .cron
        .parsed_schedule()
        .context("Invalid cron schedule")?;
    let task = Arc::new(ControllerTask::new(controller.clone(), config.cron.job));
    let mut scheduler = Scheduler::new(schedule, task);
    scheduler.start().context("Failed to start scheduler")?;

    log::info!(
        "Scheduled '{}' with cron expression '{}', waiting for shutdown signal",
        config.cron.job,
        config.cron.schedule
    );
    wait_for_shutdown_signal().await?;

    log::info!("Received shutdown signal, stopping archivist service");
    scheduler
        .stop()
        .await
        .context("Failed to stop scheduler")?;

    controller.metrics().log_summary();
    log::info!("Archivist service stopped");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    // Load application configuration
    let config = utils::load_config(cli.common.config.as_ref())?;

    // Handle common commands that don't require starting the service
    let command = cli.command.unwrap_or_default();
    if let ArchivistCommands::Common(ref common_cmd) = command {
        if utils::handle_common_command(common_cmd, &config)? {
            return Ok(()); // Command handled, exit early
        }
    }

    config.validate().context("Configuration is invalid")?;

    let controller = Arc::new(LifecycleController::local(ControllerConfig::from(
        &config.controller,
    )));

    match command {
        ArchivistCommands::Sweep => run_sweep(&controller).await,
        ArchivistCommands::Compress { name } => run_compress(&controller, name.as_deref()).await,
        ArchivistCommands::Common(_) => run_service(&config, controller).await,
    }
}
