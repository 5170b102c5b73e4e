//! Artifact lifecycle management.
//!
//! Raw artifacts live under a storage root as date-named entries
//! (`YYYY-MM-DD`). Once an artifact has an exported counterpart it is
//! archived next to itself as `<name>.zip`, and the raw copy is removed after
//! the retention offset has passed. The [`LifecycleController`] makes these
//! decisions; the [`Scheduler`] drives it on a cron schedule.

pub mod clock;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod retention;
pub mod scheduler;
pub mod storage;

pub use clock::{Clock, FixedClock, LocalClock};
pub use controller::{
    ArtifactOutcome, CompressionStatus, ControllerConfig, DeletionOutcome, LifecycleController,
    SkipReason, SweepReport,
};
pub use error::{LifecycleError, StorageError};
pub use metrics::LifecycleMetrics;
pub use scheduler::{ControllerTask, ScheduledTask, Scheduler, SchedulerError};
pub use storage::{ArchiveReport, ExportSource, LocalFilesystem, StorageBackend};
