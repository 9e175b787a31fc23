//! Snapshot archive naming
//!
//! Archives are named `{leaf}_snapshot_{YYYYMMDD}_{HHMMSS}.7z`, where `leaf` is
//! the repository directory name. The timestamp comes from a [`Clock`] so that
//! names can be pinned in tests.

use crate::error::{Result, SnapshotError};
use crate::types::ARCHIVE_EXTENSION;
use chrono::{Local, NaiveDateTime};
use std::path::Path;

/// Source of the timestamp embedded in archive names
pub trait Clock: Send + Sync {
    /// Current local wall-clock time
    fn now(&self) -> NaiveDateTime;
}

/// Reads the system clock in the local time zone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always returns the same instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Final component of `path`, ignoring trailing separators
///
/// # Errors
///
/// [`SnapshotError::InvalidSourceName`] if the path has no usable final
/// component (`/`, `..`, empty).
pub fn leaf_name(path: &Path) -> Result<String> {
    // Path::file_name already skips trailing separators and "." components
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| SnapshotError::InvalidSourceName {
            path: path.to_path_buf(),
        })
}

/// Generate the archive file name for a snapshot of `source_root` taken at `now`
///
/// # Example
///
/// ```rust
/// use chrono::NaiveDate;
/// use git_snapshot::naming::generate;
/// use std::path::Path;
///
/// let now = NaiveDate::from_ymd_opt(2025, 7, 20)
///     .unwrap()
///     .and_hms_opt(14, 30, 0)
///     .unwrap();
/// let name = generate(Path::new("/a/b/my_repo"), now).unwrap();
/// assert_eq!(name, "my_repo_snapshot_20250720_143000.7z");
/// ```
pub fn generate(source_root: &Path, now: NaiveDateTime) -> Result<String> {
    let leaf = leaf_name(source_root)?;
    Ok(format!(
        "{}_snapshot_{}.{}",
        leaf,
        now.format("%Y%m%d_%H%M%S"),
        ARCHIVE_EXTENSION
    ))
}
