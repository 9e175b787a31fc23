//! Error types for git-snapshot
//!
//! Every failure the snapshot and restore engines can report is a variant of
//! [`SnapshotError`]. Variants carry the path involved and, where there is one,
//! the underlying cause, so a caller can tell which operation failed and why
//! without re-running anything.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the git-snapshot library
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Main error type for all snapshot and restore operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Source directory does not exist or is not a directory
    #[error("Source not found: {path:?}")]
    SourceNotFound {
        /// Path that was requested as the snapshot source
        path: PathBuf,
    },

    /// Source directory has no versioning metadata directory
    #[error("Not a versioned repository: {path:?} has no {metadata_dir} directory")]
    NotAVersionedRepo {
        /// Directory that was checked
        path: PathBuf,
        /// Name of the metadata directory that was expected
        metadata_dir: String,
    },

    /// The source path has no usable leaf name to derive an archive name from
    #[error("Cannot derive a snapshot name from {path:?}")]
    InvalidSourceName {
        /// Offending source path
        path: PathBuf,
    },

    /// Writing the archive failed
    #[error("Failed to pack {archive:?}: {reason}")]
    Pack {
        /// Archive that was being written
        archive: PathBuf,
        /// Codec or filesystem failure description
        reason: String,
    },

    /// Archive file does not exist or cannot be opened
    #[error("Archive not found: {path:?}")]
    ArchiveNotFound {
        /// Archive path
        path: PathBuf,
    },

    /// Archive cannot be decoded
    #[error("Corrupt archive {path:?}: {reason}")]
    CorruptArchive {
        /// Archive path
        path: PathBuf,
        /// Decoder failure description
        reason: String,
    },

    /// Archive does not contain exactly one top-level directory
    #[error("Cannot determine restore root of {path:?}: {reason} (top-level entries: {entries:?})")]
    AmbiguousArchiveLayout {
        /// Archive path
        path: PathBuf,
        /// Why the layout was rejected
        reason: String,
        /// Top-level entries that were found
        entries: Vec<String>,
    },

    /// Writing extracted content to disk failed
    #[error("Failed to extract {archive:?} into {destination:?}: {reason}")]
    Extract {
        /// Archive being extracted
        archive: PathBuf,
        /// Extraction destination
        destination: PathBuf,
        /// Filesystem failure description
        reason: String,
    },

    /// Restore failed and putting the previous state back failed too
    #[error("Restore failed ({restore}) and reverting also failed ({revert})")]
    RestoreFailedAndRevertFailed {
        /// Failure that triggered the rollback
        restore: Box<SnapshotError>,
        /// Failure of the rollback itself
        revert: Box<SnapshotError>,
        /// Location of the preserved backup, if the target existed before
        backup: Option<PathBuf>,
    },

    /// Permission denied for a filesystem operation
    #[error("Permission denied while trying to {operation} {path:?}")]
    PermissionDenied {
        /// What was being attempted
        operation: &'static str,
        /// Path where permission was denied
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Any other filesystem failure
    #[error("Failed to {operation} {path:?}: {source}")]
    Io {
        /// What was being attempted
        operation: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),
}

impl SnapshotError {
    /// Classify an I/O error that happened while performing `operation` on `path`
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            SnapshotError::PermissionDenied { operation, path, source }
        } else {
            SnapshotError::Io { operation, path, source }
        }
    }

    /// Create a pack error with a custom message
    pub fn pack(archive: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SnapshotError::Pack {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a corrupt-archive error with a custom message
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SnapshotError::CorruptArchive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an extraction error with a custom message
    pub fn extract(
        archive: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        reason: impl ToString,
    ) -> Self {
        SnapshotError::Extract {
            archive: archive.into(),
            destination: destination.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error is a problem with the archive file itself
    pub fn is_archive_problem(&self) -> bool {
        matches!(
            self,
            SnapshotError::ArchiveNotFound { .. }
                | SnapshotError::CorruptArchive { .. }
                | SnapshotError::AmbiguousArchiveLayout { .. }
        )
    }

    /// Whether a human has to put the previous state back by hand
    pub fn requires_manual_recovery(&self) -> bool {
        matches!(self, SnapshotError::RestoreFailedAndRevertFailed { .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SnapshotError::NotAVersionedRepo { path, metadata_dir } => {
                format!(
                    "{:?} is not a git repository (no {} directory). \
                     Point --source at the repository root.",
                    path, metadata_dir
                )
            }
            SnapshotError::PermissionDenied { operation, path, .. } => {
                format!(
                    "Permission denied while trying to {} {:?}. Check directory permissions.",
                    operation, path
                )
            }
            SnapshotError::AmbiguousArchiveLayout { path, entries, .. } => {
                format!(
                    "{:?} is not a git-snapshot archive: expected a single top-level \
                     directory but found {:?}.",
                    path, entries
                )
            }
            SnapshotError::RestoreFailedAndRevertFailed { restore, revert, backup } => {
                let location = match backup {
                    Some(path) => format!("your previous files are in {:?}", path),
                    None => "the target did not exist before the restore".to_string(),
                };
                format!(
                    "Restore failed: {}\nAutomatic revert also failed: {}\n\
                     Manual intervention is required; {}.",
                    restore, revert, location
                )
            }
            _ => self.to_string(),
        }
    }
}
