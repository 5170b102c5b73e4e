use async_trait::async_trait;
use chrono::NaiveDate;
use lifecycle::storage::ExportSource;
use lifecycle::{
    ArchiveReport, ArtifactOutcome, CompressionStatus, ControllerConfig, DeletionOutcome,
    FixedClock, LifecycleController, LifecycleError, LocalFilesystem, SkipReason, StorageBackend,
    StorageError,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Local filesystem that counts mutating calls.
#[derive(Default)]
struct CountingFilesystem {
    inner: LocalFilesystem,
    archives: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingFilesystem {
    fn archives(&self) -> usize {
        self.archives.load(Ordering::SeqCst)
    }

    fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for CountingFilesystem {
    async fn create_archive(&self, path: &Path) -> Result<ArchiveReport, StorageError> {
        self.archives.fetch_add(1, Ordering::SeqCst);
        self.inner.create_archive(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        StorageBackend::exists(&self.inner, path).await
    }

    async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(path).await
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<String>, StorageError> {
        self.inner.list_directory(path).await
    }
}

struct Fixture {
    _temp_dir: TempDir,
    local: PathBuf,
    opendata: PathBuf,
    storage: Arc<CountingFilesystem>,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("echoes");
        let opendata = temp_dir.path().join("opendata");
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&opendata).unwrap();

        Self {
            _temp_dir: temp_dir,
            local,
            opendata,
            storage: Arc::new(CountingFilesystem::default()),
        }
    }

    fn add_artifact(&self, name: &str) {
        let artifact = self.local.join(name);
        fs::create_dir_all(artifact.join("stats")).unwrap();
        fs::create_dir_all(artifact.join("gnuplot/specs")).unwrap();
        fs::write(artifact.join("stats/summary.json"), "{\"meteors\": 3}").unwrap();
        fs::write(artifact.join("gnuplot/specs/spec.dat"), "1 2 3").unwrap();
    }

    fn add_export(&self, name: &str) {
        fs::create_dir_all(self.opendata.join(name)).unwrap();
    }

    fn add_archive(&self, name: &str) {
        fs::write(self.local.join(format!("{name}.zip")), "archived").unwrap();
    }

    fn config(&self) -> ControllerConfig {
        ControllerConfig::new(&self.local, &self.opendata)
    }

    fn controller(&self, config: ControllerConfig, today: NaiveDate) -> LifecycleController {
        LifecycleController::new(config, self.storage.clone(), Arc::new(LocalFilesystem::new()))
            .with_clock(Arc::new(FixedClock(today)))
    }

    fn raw_exists(&self, name: &str) -> bool {
        self.local.join(name).exists()
    }

    fn archive_exists(&self, name: &str) -> bool {
        self.local.join(format!("{name}.zip")).exists()
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

#[tokio::test]
async fn test_exported_artifact_is_compressed_then_deleted() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-09-10");
    fixture.add_export("2020-09-10");

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));
    let report = controller.sweep().await.unwrap();

    assert_eq!(report.compressed, 1);
    assert_eq!(report.deleted, 1);
    assert!(fixture.archive_exists("2020-09-10"));
    assert!(!fixture.raw_exists("2020-09-10"));

    match report.outcome("2020-09-10") {
        Some(ArtifactOutcome::Processed {
            compression: CompressionStatus::Compressed(archive),
            deletion: DeletionOutcome::Deleted,
            ..
        }) => {
            assert_eq!(archive.file_count(), 2);
            assert_eq!(archive.directory_file_counts.get("/stats"), Some(&1));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_artifact_without_export_is_left_alone() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-09-10");

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));
    let report = controller.sweep().await.unwrap();

    assert_eq!(fixture.storage.archives(), 0);
    assert_eq!(fixture.storage.deletes(), 0);
    assert!(fixture.raw_exists("2020-09-10"));
    assert!(!fixture.archive_exists("2020-09-10"));
    assert_eq!(
        report.outcome("2020-09-10"),
        Some(&ArtifactOutcome::Skipped {
            name: "2020-09-10".to_string(),
            reason: SkipReason::MissingExport,
        })
    );
}

#[tokio::test]
async fn test_foreign_entries_are_ignored() {
    let fixture = Fixture::new();
    fs::write(fixture.local.join("not_a_file"), "ignore me").unwrap();
    fixture.add_archive("2020-09-01");
    fixture.add_export("not_a_file");

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));
    let report = controller.sweep().await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(fixture.storage.archives(), 0);
    assert_eq!(fixture.storage.deletes(), 0);
    assert!(fixture.local.join("not_a_file").exists());
    assert!(fixture.archive_exists("2020-09-01"));
}

#[tokio::test]
async fn test_recent_artifact_is_archived_but_kept() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-10-01");
    fixture.add_archive("2020-10-01");
    fixture.add_export("2020-10-01");

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));
    let report = controller.sweep().await.unwrap();

    assert_eq!(report.deleted, 0);
    assert_eq!(fixture.storage.archives(), 0);
    assert!(fixture.raw_exists("2020-10-01"));
}

#[tokio::test]
async fn test_retention_boundary() {
    let fixture = Fixture::new();
    for name in ["2020-09-15", "2020-09-16"] {
        fixture.add_artifact(name);
        fixture.add_export(name);
    }

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));
    controller.sweep().await.unwrap();

    assert!(!fixture.raw_exists("2020-09-15"));
    assert!(fixture.raw_exists("2020-09-16"));
    assert!(fixture.archive_exists("2020-09-15"));
    assert!(fixture.archive_exists("2020-09-16"));
}

#[tokio::test]
async fn test_second_sweep_is_a_noop() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-09-10");
    fixture.add_export("2020-09-10");
    fixture.add_artifact("2020-09-28");
    fixture.add_export("2020-09-28");
    fixture.add_artifact("2020-09-29");

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));

    controller.sweep().await.unwrap();
    let archives = fixture.storage.archives();
    let deletes = fixture.storage.deletes();
    assert_eq!(archives, 2);
    assert_eq!(deletes, 1);

    let report = controller.sweep().await.unwrap();
    assert_eq!(fixture.storage.archives(), archives);
    assert_eq!(fixture.storage.deletes(), deletes);
    assert_eq!(report.compressed, 0);
    assert_eq!(report.deleted, 0);
}

#[tokio::test]
async fn test_compression_happens_at_most_once_across_sweeps() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-09-30");
    fixture.add_export("2020-09-30");

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));
    for _ in 0..3 {
        controller.sweep().await.unwrap();
    }

    assert_eq!(fixture.storage.archives(), 1);
    assert_eq!(controller.metrics().artifacts_compressed(), 1);
    assert_eq!(controller.metrics().sweeps_started(), 3);
}

#[tokio::test]
async fn test_raw_artifact_survives_without_archive_or_export() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-01-01");
    fixture.add_artifact("2020-01-02");
    fixture.add_export("2020-01-02");

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));

    // No export: never deleted, even when old enough
    assert!(!controller.delete_one("2020-01-01").await.is_deleted());
    // No archive yet: never deleted
    assert!(!controller.delete_one("2020-01-02").await.is_deleted());

    assert_eq!(fixture.storage.deletes(), 0);
    assert!(fixture.raw_exists("2020-01-01"));
    assert!(fixture.raw_exists("2020-01-02"));
}

#[tokio::test]
async fn test_zero_offset_disables_deletion() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-01-01");
    fixture.add_export("2020-01-01");

    let mut config = fixture.config();
    config.delete_offset = 0;
    let controller = fixture.controller(config, date(2020, 10, 1));
    controller.sweep().await.unwrap();

    assert!(fixture.archive_exists("2020-01-01"));
    assert!(fixture.raw_exists("2020-01-01"));
}

#[tokio::test]
async fn test_missing_root_fails_the_sweep() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.local_path = fixture.local.join("missing");

    let controller = fixture.controller(config, date(2020, 10, 1));
    let result = controller.sweep().await;

    assert!(matches!(result, Err(LifecycleError::Listing { .. })));
}

#[tokio::test]
async fn test_direct_compression_of_missing_artifact_propagates() {
    let fixture = Fixture::new();
    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));

    let err = controller.compress_one("not_a_file").await.unwrap_err();
    assert!(err.to_string().contains("not_a_file does not exist"));

    // The policy-aware path swallows the same failure by default
    let status = controller.handle_compression("not_a_file").await.unwrap();
    assert!(matches!(status, CompressionStatus::Failed(_)));
}

#[tokio::test]
async fn test_propagating_policy_surfaces_compression_failure() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.propagate_compression_errors = true;
    let controller = fixture.controller(config, date(2020, 10, 1));

    let result = controller.handle_compression("not_a_file").await;
    assert!(matches!(result, Err(LifecycleError::Compression { .. })));
}

#[tokio::test]
async fn test_compress_previous_day() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-09-30");

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));
    let status = controller.compress_previous_day().await.unwrap();

    assert!(matches!(status, CompressionStatus::Compressed(_)));
    assert!(fixture.archive_exists("2020-09-30"));
    // Compression alone never removes the raw artifact
    assert!(fixture.raw_exists("2020-09-30"));
}

#[tokio::test]
async fn test_dry_run_leaves_storage_untouched() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-09-10");
    fixture.add_export("2020-09-10");
    fixture.add_artifact("2020-09-11");
    fixture.add_archive("2020-09-11");
    fixture.add_export("2020-09-11");

    let mut config = fixture.config();
    config.dry_run = true;
    let controller = fixture.controller(config, date(2020, 10, 1));
    let report = controller.sweep().await.unwrap();

    assert_eq!(fixture.storage.archives(), 0);
    assert_eq!(fixture.storage.deletes(), 0);
    assert!(!fixture.archive_exists("2020-09-10"));
    assert!(fixture.raw_exists("2020-09-11"));
    assert!(matches!(
        report.outcome("2020-09-11"),
        Some(ArtifactOutcome::Processed {
            deletion: DeletionOutcome::DryRun,
            ..
        })
    ));
}

#[tokio::test]
async fn test_export_source_rooted_at_opendata() {
    let fixture = Fixture::new();
    fixture.add_export("2020-09-10");

    let exports = LocalFilesystem::new();
    assert!(ExportSource::exists(&exports, &fixture.opendata.join("2020-09-10")).await);
    assert!(!ExportSource::exists(&exports, &fixture.opendata.join("2020-09-11")).await);
}

#[tokio::test]
async fn test_existing_archive_is_never_rewritten() {
    let fixture = Fixture::new();
    fixture.add_artifact("2020-09-30");
    fixture.add_archive("2020-09-30");

    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));

    let scheduled = controller.compress_previous_day().await.unwrap();
    let manual = controller.compress_requested(Some("2020-09-30")).await.unwrap();

    assert_eq!(scheduled, CompressionStatus::AlreadyArchived);
    assert_eq!(manual, CompressionStatus::AlreadyArchived);
    assert_eq!(fixture.storage.archives(), 0);
    assert_eq!(
        fs::read_to_string(fixture.local.join("2020-09-30.zip")).unwrap(),
        "archived"
    );
}

#[tokio::test]
async fn test_manual_previous_day_compression_reports_missing_artifact() {
    let fixture = Fixture::new();
    let controller = fixture.controller(fixture.config(), date(2020, 10, 1));

    let err = controller.compress_requested(None).await.unwrap_err();
    assert!(err.to_string().contains("2020-09-30 does not exist"));

    // The scheduled job keeps the default swallowing policy
    let status = controller.compress_previous_day().await.unwrap();
    assert!(matches!(status, CompressionStatus::Failed(_)));
}
