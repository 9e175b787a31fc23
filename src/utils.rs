//! Filesystem helpers shared by the engines
//!
//! - Repository root discovery
//! - Robust directory removal (read-only entries, transient permission errors)
//! - Relative path computation
//! - Byte formatting for reports

use crate::error::{Result, SnapshotError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Number of attempts made by [`remove_dir_robustly`]
const REMOVE_RETRIES: u32 = 5;

/// Initial delay between removal attempts
const REMOVE_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Whether `dir` directly contains the `metadata_dir` directory
pub fn is_repo_root(dir: &Path, metadata_dir: &str) -> bool {
    dir.join(metadata_dir).is_dir()
}

/// Find the nearest directory at or above `start` that contains `metadata_dir`
pub fn find_repo_root(start: &Path, metadata_dir: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| is_repo_root(dir, metadata_dir))
        .map(Path::to_path_buf)
}

/// Make a path relative to a base path
///
/// Both paths are compared lexically; no filesystem access happens.
/// Returns `None` if `path` is not below `base`.
pub fn make_relative(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(Path::to_path_buf)
}

/// Remove a file, symlink or directory tree at `path`, if anything is there
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => remove_dir_robustly(path),
        Ok(_) => fs::remove_file(path).map_err(|e| SnapshotError::io("remove", path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SnapshotError::io("inspect", path, e)),
    }
}

/// Remove a directory tree, retrying on permission errors
///
/// Read-only entries are made writable before each retry, and the delay
/// between attempts grows by half each time. A missing directory is not an
/// error.
pub fn remove_dir_robustly(path: &Path) -> Result<()> {
    let mut delay = REMOVE_INITIAL_DELAY;
    let mut attempt = 1;
    loop {
        match fs::remove_dir_all(path) {
            Ok(()) => {
                trace!("Removed directory {:?}", path);
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && attempt < REMOVE_RETRIES => {
                debug!(
                    "Permission denied removing {:?} (attempt {}/{}), retrying in {:?}",
                    path, attempt, REMOVE_RETRIES, delay
                );
                clear_readonly(path);
                thread::sleep(delay);
                delay = delay.mul_f32(1.5);
                attempt += 1;
            }
            Err(e) => return Err(SnapshotError::io("remove directory", path, e)),
        }
    }
}

/// Clear the read-only flag on every entry below `path`
#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) {
    for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
        if entry.path_is_symlink() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let mut perms = meta.permissions();
        if perms.readonly() {
            perms.set_readonly(false);
            if let Err(e) = fs::set_permissions(entry.path(), perms) {
                warn!("Could not make {:?} writable: {}", entry.path(), e);
            }
        }
    }
}

/// Size of the file at `path` in bytes, 0 if it cannot be read
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Format bytes for human-readable display
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}
