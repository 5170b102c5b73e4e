//! Lifecycle Controller
//!
//! Applies the retention decisions to every artifact under the storage root:
//! compress artifacts that have been exported but not yet archived, then
//! delete raw artifacts that are archived, exported and past the retention
//! offset.
//!
//! ## Safety Guarantees
//!
//! - A raw artifact is deleted only when its archive and its export are both
//!   present and it is older than the retention offset at decision time
//! - Archives are never deleted or rewritten once present
//! - One failing artifact never stops a sweep; only a listing failure does
//! - Every decision is logged with the artifact name and the deciding condition

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, LocalClock};
use crate::error::{LifecycleError, Result};
use crate::metrics::LifecycleMetrics;
use crate::retention::{
    archive_name, is_eligible_for_deletion, matches_date_pattern, previous_day,
};
use crate::storage::{ArchiveReport, ExportSource, LocalFilesystem, StorageBackend};

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Storage root holding raw artifacts and archives.
    pub local_path: PathBuf,
    /// Root of the export confirmation source.
    pub opendata_path: PathBuf,
    /// Retention offset in days; zero disables deletion.
    pub delete_offset: u32,
    /// Return compression failures instead of logging them.
    pub propagate_compression_errors: bool,
    /// Log decisions without touching storage.
    pub dry_run: bool,
}

impl ControllerConfig {
    pub fn new(local_path: impl Into<PathBuf>, opendata_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            opendata_path: opendata_path.into(),
            delete_offset: 15,
            propagate_compression_errors: false,
            dry_run: false,
        }
    }
}

impl From<&common::config::ControllerConfig> for ControllerConfig {
    fn from(config: &common::config::ControllerConfig) -> Self {
        Self {
            local_path: config.local_path.clone(),
            opendata_path: config.opendata_path.clone(),
            delete_offset: config.delete_offset,
            propagate_compression_errors: config.propagate_compression_errors,
            dry_run: config.dry_run,
        }
    }
}

/// Why a sweep left an artifact untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The name is not a `YYYY-MM-DD` date.
    PatternMismatch,
    /// No exported counterpart exists yet.
    MissingExport,
}

/// Result of the compression step for one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionStatus {
    Compressed(ArchiveReport),
    AlreadyArchived,
    DryRun,
    /// Failure that was logged and not propagated.
    Failed(String),
}

/// Result of a deletion attempt for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Deleted,
    DryRun,
    /// The raw artifact is already gone.
    AlreadyRemoved,
    /// At least one deletion condition failed.
    Skipped {
        eligible: bool,
        exported: bool,
        archived: bool,
    },
    Failed(String),
}

impl DeletionOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeletionOutcome::Deleted)
    }
}

/// What a sweep did with one directory entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactOutcome {
    Skipped {
        name: String,
        reason: SkipReason,
    },
    Processed {
        name: String,
        compression: CompressionStatus,
        deletion: DeletionOutcome,
    },
}

impl ArtifactOutcome {
    pub fn name(&self) -> &str {
        match self {
            ArtifactOutcome::Skipped { name, .. } | ArtifactOutcome::Processed { name, .. } => name,
        }
    }
}

/// Result of a complete sweep over the storage root
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub scanned: usize,
    pub compressed: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub artifacts: Vec<ArtifactOutcome>,
    pub errors: Vec<String>,
}

impl SweepReport {
    /// Outcome recorded for `name`, if it was listed.
    pub fn outcome(&self, name: &str) -> Option<&ArtifactOutcome> {
        self.artifacts.iter().find(|outcome| outcome.name() == name)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Lifecycle controller over a storage backend and an export source.
pub struct LifecycleController {
    storage: Arc<dyn StorageBackend>,
    exports: Arc<dyn ExportSource>,
    clock: Arc<dyn Clock>,
    config: ControllerConfig,
    metrics: LifecycleMetrics,
}

impl LifecycleController {
    pub fn new(
        config: ControllerConfig,
        storage: Arc<dyn StorageBackend>,
        exports: Arc<dyn ExportSource>,
    ) -> Self {
        Self {
            storage,
            exports,
            clock: Arc::new(LocalClock),
            config,
            metrics: LifecycleMetrics::new(),
        }
    }

    /// Controller over the local filesystem for both artifacts and exports.
    pub fn local(config: ControllerConfig) -> Self {
        let filesystem = Arc::new(LocalFilesystem::new());
        Self::new(config, filesystem.clone(), filesystem)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &LifecycleMetrics {
        &self.metrics
    }

    fn raw_path(&self, name: &str) -> PathBuf {
        self.config.local_path.join(name)
    }

    fn archive_path(&self, name: &str) -> PathBuf {
        self.config.local_path.join(archive_name(name))
    }

    fn export_path(&self, name: &str) -> PathBuf {
        self.config.opendata_path.join(name)
    }

    /// Archive the raw artifact `name`. An existing archive is never
    /// rewritten and yields [`CompressionStatus::AlreadyArchived`].
    ///
    /// Failures, including a missing artifact, are always returned to the
    /// caller as [`LifecycleError::Compression`].
    pub async fn compress_one(&self, name: &str) -> Result<CompressionStatus> {
        let raw_path = self.raw_path(name);

        if self.storage.exists(&self.archive_path(name)).await {
            info!(
                artifact = %name,
                "Skipping compression. File is already compressed"
            );
            return Ok(CompressionStatus::AlreadyArchived);
        }

        if self.config.dry_run {
            info!(
                artifact = %name,
                path = %raw_path.display(),
                "[DRY RUN] Would compress artifact"
            );
            return Ok(CompressionStatus::DryRun);
        }

        match self.storage.create_archive(&raw_path).await {
            Ok(report) => {
                info!(
                    artifact = %name,
                    archive = %report.archive_path.display(),
                    size_mb = report.size_mb(),
                    files = report.file_count(),
                    "File compression has been completed successfully"
                );
                self.metrics.record_compression(report.size_bytes);
                Ok(CompressionStatus::Compressed(report))
            }
            Err(source) => {
                error!(
                    artifact = %name,
                    error = %source,
                    "Error compressing file"
                );
                self.metrics.record_failure();
                Err(LifecycleError::Compression {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Compress `name` under the configured error policy.
    ///
    /// With `propagate_compression_errors` unset, a failure is logged by
    /// [`compress_one`](Self::compress_one) and reported as
    /// [`CompressionStatus::Failed`]; otherwise it is returned.
    pub async fn handle_compression(&self, name: &str) -> Result<CompressionStatus> {
        info!(artifact = %name, "File compression has started");

        match self.compress_one(name).await {
            Ok(status) => Ok(status),
            Err(e) if self.config.propagate_compression_errors => Err(e),
            Err(e) => Ok(CompressionStatus::Failed(e.to_string())),
        }
    }

    /// Name of the artifact for the day before today.
    pub fn previous_day_name(&self) -> String {
        previous_day(self.clock.today())
    }

    /// Compress the artifact named after the previous calendar day under the
    /// configured error policy.
    pub async fn compress_previous_day(&self) -> Result<CompressionStatus> {
        let name = self.previous_day_name();
        self.handle_compression(&name).await
    }

    /// Compress `name`, or the previous day's artifact when no name is given.
    /// Failures are always returned, regardless of the error policy.
    pub async fn compress_requested(&self, name: Option<&str>) -> Result<CompressionStatus> {
        match name {
            Some(name) => self.compress_one(name).await,
            None => self.compress_one(&self.previous_day_name()).await,
        }
    }

    /// Delete the raw artifact `name` if it is archived, exported and past
    /// the retention offset. Never fails: storage errors are logged and
    /// reported as [`DeletionOutcome::Failed`].
    pub async fn delete_one(&self, name: &str) -> DeletionOutcome {
        let raw_path = self.raw_path(name);
        let today = self.clock.today();

        let eligible = is_eligible_for_deletion(name, self.config.delete_offset, today);
        let exported = self.exports.exists(&self.export_path(name)).await;
        let archived = self.storage.exists(&self.archive_path(name)).await;

        if !(eligible && exported && archived) {
            info!(
                artifact = %name,
                older = eligible,
                opendata = exported,
                zip = archived,
                delete_offset = self.config.delete_offset,
                today = %today,
                "File does not fulfil requirements for deletion"
            );
            return DeletionOutcome::Skipped {
                eligible,
                exported,
                archived,
            };
        }

        if !self.storage.exists(&raw_path).await {
            debug!(artifact = %name, "Raw artifact already removed");
            return DeletionOutcome::AlreadyRemoved;
        }

        if self.config.dry_run {
            info!(
                artifact = %name,
                path = %raw_path.display(),
                "[DRY RUN] Would delete raw artifact"
            );
            return DeletionOutcome::DryRun;
        }

        info!(artifact = %name, path = %raw_path.display(), "Removing raw artifact");
        match self.storage.delete(&raw_path).await {
            Ok(()) => {
                info!(artifact = %name, "File has been deleted");
                self.metrics.record_deletion();
                DeletionOutcome::Deleted
            }
            Err(e) => {
                error!(artifact = %name, error = %e, "Error deleting file");
                self.metrics.record_failure();
                DeletionOutcome::Failed(e.to_string())
            }
        }
    }

    /// Run one pass over every entry under the storage root.
    ///
    /// Entries are processed one at a time in listing order. Fails only when
    /// the root cannot be listed, or when a compression fails while
    /// `propagate_compression_errors` is set.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        self.metrics.record_sweep_started();

        info!(
            run_id = %run_id,
            root = %self.config.local_path.display(),
            delete_offset = self.config.delete_offset,
            dry_run = self.config.dry_run,
            "Daily batch process has started"
        );

        let names = match self.storage.list_directory(&self.config.local_path).await {
            Ok(names) => names,
            Err(source) => {
                error!(
                    run_id = %run_id,
                    root = %self.config.local_path.display(),
                    error = %source,
                    "Failed to list storage root"
                );
                self.metrics.record_sweep_failed();
                return Err(LifecycleError::Listing {
                    path: self.config.local_path.clone(),
                    source,
                });
            }
        };

        let mut artifacts = Vec::with_capacity(names.len());
        for name in &names {
            match self.process_artifact(name).await {
                Ok(outcome) => artifacts.push(outcome),
                Err(e) => {
                    error!(
                        run_id = %run_id,
                        artifact = %name,
                        error = %e,
                        "Aborting sweep on compression failure"
                    );
                    self.metrics.record_sweep_failed();
                    return Err(e);
                }
            }
        }

        let report = summarize(run_id, started_at, names.len(), artifacts);

        info!(
            run_id = %report.run_id,
            scanned = report.scanned,
            compressed = report.compressed,
            deleted = report.deleted,
            skipped = report.skipped,
            errors = report.errors.len(),
            duration_ms = (report.completed_at - report.started_at).num_milliseconds(),
            "Daily batch process has completed"
        );

        Ok(report)
    }

    async fn process_artifact(&self, name: &str) -> Result<ArtifactOutcome> {
        if !matches_date_pattern(name) {
            info!(
                artifact = %name,
                "Skipping entry, name does not match the YYYY-MM-DD pattern"
            );
            return Ok(ArtifactOutcome::Skipped {
                name: name.to_string(),
                reason: SkipReason::PatternMismatch,
            });
        }

        let export_path = self.export_path(name);
        if !self.exports.exists(&export_path).await {
            warn!(
                artifact = %name,
                opendata = %export_path.display(),
                "Skipping artifact, no export found"
            );
            return Ok(ArtifactOutcome::Skipped {
                name: name.to_string(),
                reason: SkipReason::MissingExport,
            });
        }

        let compression = self.handle_compression(name).await?;

        let deletion = self.delete_one(name).await;

        Ok(ArtifactOutcome::Processed {
            name: name.to_string(),
            compression,
            deletion,
        })
    }
}

fn summarize(
    run_id: String,
    started_at: DateTime<Utc>,
    scanned: usize,
    artifacts: Vec<ArtifactOutcome>,
) -> SweepReport {
    let mut compressed = 0;
    let mut deleted = 0;
    let mut skipped = 0;
    let mut errors = Vec::new();

    for outcome in &artifacts {
        match outcome {
            ArtifactOutcome::Skipped { .. } => skipped += 1,
            ArtifactOutcome::Processed {
                name,
                compression,
                deletion,
            } => {
                match compression {
                    CompressionStatus::Compressed(_) => compressed += 1,
                    CompressionStatus::Failed(e) => errors.push(format!("{name}: {e}")),
                    CompressionStatus::AlreadyArchived | CompressionStatus::DryRun => {}
                }
                match deletion {
                    DeletionOutcome::Deleted => deleted += 1,
                    DeletionOutcome::Failed(e) => errors.push(format!("{name}: {e}")),
                    _ => {}
                }
            }
        }
    }

    SweepReport {
        run_id,
        started_at,
        completed_at: Utc::now(),
        scanned,
        compressed,
        deleted,
        skipped,
        artifacts,
        errors,
    }
}
