//! Cron Scheduler
//!
//! Owns a background task that fires a [`ScheduledTask`] at each occurrence
//! of a cron schedule in local time. A run always completes before the next
//! occurrence is computed, so runs never overlap; occurrences missed while a
//! run is in progress are skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use common::config::{ConfigError, ScheduledJob, parse_cron_expression};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::controller::LifecycleController;
use crate::error::LifecycleError;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    InvalidSchedule(#[from] ConfigError),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Work executed on every tick.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn run(&self) -> Result<(), LifecycleError>;

    fn name(&self) -> String {
        "task".to_string()
    }
}

/// Runs a configured job against the lifecycle controller.
pub struct ControllerTask {
    controller: Arc<LifecycleController>,
    job: ScheduledJob,
}

impl ControllerTask {
    pub fn new(controller: Arc<LifecycleController>, job: ScheduledJob) -> Self {
        Self { controller, job }
    }
}

#[async_trait]
impl ScheduledTask for ControllerTask {
    async fn run(&self) -> Result<(), LifecycleError> {
        match self.job {
            ScheduledJob::Sweep => self.controller.sweep().await.map(|_| ()),
            ScheduledJob::CompressPreviousDay => {
                self.controller.compress_previous_day().await.map(|_| ())
            }
        }
    }

    fn name(&self) -> String {
        self.job.to_string()
    }
}

pub struct Scheduler {
    schedule: cron::Schedule,
    task: Arc<dyn ScheduledTask>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(schedule: cron::Schedule, task: Arc<dyn ScheduledTask>) -> Self {
        Self {
            schedule,
            task,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Build a scheduler from a five or six field cron expression.
    pub fn from_expression(
        expression: &str,
        task: Arc<dyn ScheduledTask>,
    ) -> Result<Self, SchedulerError> {
        Ok(Self::new(parse_cron_expression(expression)?, task))
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the background loop.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.handle.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let schedule = self.schedule.clone();
        let task = self.task.clone();

        info!(
            task = %task.name(),
            schedule = %schedule,
            "Starting scheduler"
        );

        self.handle = Some(tokio::spawn(run_loop(schedule, task, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Signal the loop to stop and wait for it. An in-flight run is allowed
    /// to finish.
    pub async fn stop(&mut self) -> Result<(), SchedulerError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }

        if let Some(handle) = self.handle.take() {
            handle.await?;
            info!(task = %self.task.name(), "Scheduler stopped");
        }

        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_loop(
    schedule: cron::Schedule,
    task: Arc<dyn ScheduledTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some(next) = schedule.upcoming(Local).next() else {
            warn!(task = %task.name(), "Schedule has no further occurrences");
            break;
        };
        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(task = %task.name(), next = %next, "Waiting for next occurrence");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }

        info!(task = %task.name(), "Scheduled run has started");
        match task.run().await {
            Ok(()) => info!(task = %task.name(), "Scheduled run has completed"),
            Err(e) => error!(task = %task.name(), error = %e, "Scheduled run failed"),
        }
    }
}
