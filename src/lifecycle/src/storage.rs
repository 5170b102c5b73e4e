//! Storage backend and export confirmation seams.
//!
//! The controller only talks to storage through [`StorageBackend`] and
//! [`ExportSource`]; [`LocalFilesystem`] implements both on top of the local
//! filesystem and writes zip archives next to the raw artifacts.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::StorageError;
use crate::retention::ARCHIVE_SUFFIX;

/// Outcome of a successful archive creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Path of the archive that was written.
    pub archive_path: PathBuf,
    /// Size of the archive in bytes.
    pub size_bytes: u64,
    /// Number of files per directory of the raw artifact, keyed by the
    /// directory path relative to the artifact root (`/` is the root itself).
    pub directory_file_counts: BTreeMap<String, usize>,
}

impl ArchiveReport {
    /// Archive size in megabytes, rounded to two decimals.
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / 10_000.0).round() / 100.0
    }

    /// Total number of files packed into the archive.
    pub fn file_count(&self) -> usize {
        self.directory_file_counts.values().sum()
    }
}

/// Storage holding raw artifacts and their archives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Pack the artifact at `path` into `<path>.zip`.
    async fn create_archive(&self, path: &Path) -> Result<ArchiveReport, StorageError>;

    async fn exists(&self, path: &Path) -> bool;

    /// Remove the artifact at `path`. Removing something absent is not an error.
    async fn delete(&self, path: &Path) -> Result<(), StorageError>;

    /// Names of the entries directly under `path`, in listing order.
    async fn list_directory(&self, path: &Path) -> Result<Vec<String>, StorageError>;
}

/// Source confirming that an artifact has been exported downstream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExportSource: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
}

/// Local filesystem storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageBackend for LocalFilesystem {
    async fn create_archive(&self, path: &Path) -> Result<ArchiveReport, StorageError> {
        let source = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_zip_archive(&source))
            .await
            .map_err(|e| StorageError::Task {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io(path, e)),
        };

        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };

        match removed {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<String>, StorageError> {
        let mut dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::io(path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        Ok(names)
    }
}

#[async_trait]
impl ExportSource for LocalFilesystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// `<path>.zip`
pub fn archive_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(ARCHIVE_SUFFIX);
    PathBuf::from(name)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_zip_archive(source: &Path) -> Result<ArchiveReport, StorageError> {
    let metadata = match fs::symlink_metadata(source) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StorageError::NotFound {
                path: source.to_path_buf(),
            });
        }
        Err(e) => return Err(StorageError::io(source, e)),
    };

    let archive_path = archive_path_for(source);
    let tmp_path = tmp_path_for(&archive_path);
    let _ = fs::remove_file(&tmp_path);

    let result = pack(source, metadata.is_dir(), &tmp_path);
    let directory_file_counts = match result {
        Ok(counts) => counts,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
    };

    fs::rename(&tmp_path, &archive_path).map_err(|e| StorageError::io(&archive_path, e))?;

    let size_bytes = fs::metadata(&archive_path)
        .map_err(|e| StorageError::io(&archive_path, e))?
        .len();

    Ok(ArchiveReport {
        archive_path,
        size_bytes,
        directory_file_counts,
    })
}

fn pack(source: &Path, is_dir: bool, dest: &Path) -> Result<BTreeMap<String, usize>, StorageError> {
    let file = File::create(dest).map_err(|e| StorageError::io(dest, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut counts = BTreeMap::new();

    if is_dir {
        add_directory(&mut writer, options, source, "", &mut counts)?;
    } else {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        add_file(&mut writer, options, source, &name)?;
        counts.insert("/".to_string(), 1);
    }

    let file = writer.finish().map_err(|source| StorageError::Archive {
        path: dest.to_path_buf(),
        source,
    })?;
    file.sync_all().map_err(|e| StorageError::io(dest, e))?;

    Ok(counts)
}

fn add_directory(
    writer: &mut ZipWriter<File>,
    options: SimpleFileOptions,
    dir: &Path,
    prefix: &str,
    counts: &mut BTreeMap<String, usize>,
) -> Result<(), StorageError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| StorageError::io(dir, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::io(dir, e))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let entry_name = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };

        let file_type = entry.file_type().map_err(|e| StorageError::io(&path, e))?;
        if file_type.is_dir() {
            writer
                .add_directory(entry_name.as_str(), options)
                .map_err(|source| StorageError::Archive {
                    path: path.clone(),
                    source,
                })?;
            add_directory(writer, options, &path, &entry_name, counts)?;
        } else {
            add_file(writer, options, &path, &entry_name)?;
            *counts.entry(format!("/{prefix}")).or_insert(0) += 1;
        }
    }

    Ok(())
}

fn add_file(
    writer: &mut ZipWriter<File>,
    options: SimpleFileOptions,
    path: &Path,
    entry_name: &str,
) -> Result<(), StorageError> {
    writer
        .start_file(entry_name, options)
        .map_err(|source| StorageError::Archive {
            path: path.to_path_buf(),
            source,
        })?;

    let mut input = File::open(path).map_err(|e| StorageError::io(path, e))?;
    io::copy(&mut input, writer).map_err(|e| StorageError::io(path, e))?;

    Ok(())
}
