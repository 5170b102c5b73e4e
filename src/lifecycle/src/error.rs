//! Error types for storage access and lifecycle decisions.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The artifact to archive does not exist.
    #[error("File {} does not exist", path.display())]
    NotFound { path: PathBuf },

    /// Filesystem failure while reading, writing or removing.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive writer failed.
    #[error("Failed to write archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// The blocking archive task panicked or was cancelled.
    #[error("Archive task for {} did not complete: {message}", path.display())]
    Task { path: PathBuf, message: String },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Errors surfaced by the lifecycle controller.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Creating the archive for an artifact failed.
    #[error("Error compressing artifact {name}: {source}")]
    Compression {
        name: String,
        #[source]
        source: StorageError,
    },

    /// The storage root could not be enumerated; fatal to a sweep.
    #[error("Error listing directory {}: {source}", path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: StorageError,
    },
}

pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;
