//! # git-snapshot - Whole-repository snapshots with safe restore
//!
//! Captures a git repository, including its `.git` directory and honoring its
//! `.gitignore`, into a single timestamped `.7z` archive, and restores such an
//! archive over an existing working copy without ever losing the previous
//! content.
//!
//! ## Overview
//!
//! - Create a snapshot named `{repo}_snapshot_{YYYYMMDD}_{HHMMSS}.7z`
//! - Exclude paths matching the root `.gitignore` (the `.git` directory is always kept)
//! - Restore a snapshot into `output/<repo>`, replacing what was there
//! - Roll back automatically if extraction fails
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use git_snapshot::{create_snapshot, restore_snapshot};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Archive the repository
//! let snapshot = create_snapshot(Path::new("/work/my_repo"), Path::new("/backups"))?;
//! println!("Created {}", snapshot.archive_path.display());
//!
//! // ... later, put it back (drops .venv from the restored tree)
//! let restored = restore_snapshot(&snapshot.archive_path, Path::new("/work"), false)?;
//! println!("Restored into {}", restored.target.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use git_snapshot::{MatchMode, SnapshotEngine};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let result = SnapshotEngine::new()
//!     .with_match_mode(MatchMode::Gitignore) // full .gitignore semantics
//!     .with_ignore_pattern("*.sqlite")
//!     .discover_root(true)                  // accept a path inside the repository
//!     .create(Path::new("/work/my_repo/src"), Path::new("/backups"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Restore Safety
//!
//! Before extraction, the existing `output/<repo>` directory is moved into a
//! hidden backup directory next to it. On success the backup is deleted; on
//! failure the partial output is deleted and the backup is moved back. If that
//! revert fails too, [`SnapshotError::RestoreFailedAndRevertFailed`] reports
//! both failures and the location of the preserved backup.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, SnapshotError>`. Each variant carries the
//! path involved; [`SnapshotError::user_message`] adds a remediation hint.
//!
//! ## Module Organization
//!
//! - [`snapshot`]: Snapshot creation
//! - [`restore`]: Restore with rollback
//! - [`collector`]: Source tree walking
//! - [`filter`]: Ignore rules and path matching
//! - [`archiver`]: Archive codec boundary and the `.7z` implementation
//! - [`naming`]: Archive names and clocks
//! - [`types`]: Common types and options
//! - [`error`]: Error types and handling

// Public API modules
pub mod archiver;
pub mod collector;
pub mod error;
pub mod filter;
pub mod naming;
pub mod restore;
pub mod snapshot;
pub mod types;

// Shared helpers
pub mod utils;

// Re-export main types for convenience
pub use archiver::{Archiver, SevenZipArchiver};
pub use error::{Result, SnapshotError};
pub use restore::RestoreEngine;
pub use snapshot::SnapshotEngine;
pub use types::*;

use std::path::Path;

/// Snapshot the repository at `source` into `output_dir` with default options
///
/// See [`SnapshotEngine::create`].
pub fn create_snapshot(source: &Path, output_dir: &Path) -> Result<SnapshotResult> {
    SnapshotEngine::new().create(source, output_dir)
}

/// Restore `archive` into `output_dir`, optionally keeping the virtualenv
///
/// See [`RestoreEngine::restore`].
pub fn restore_snapshot(archive: &Path, output_dir: &Path, keep_venv: bool) -> Result<RestoreResult> {
    RestoreEngine::new().keep_venv(keep_venv).restore(archive, output_dir)
}
