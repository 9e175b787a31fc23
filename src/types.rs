//! Core data types shared by the snapshot and restore engines
//!
//! ## Overview
//!
//! - **Tree state**: [`FileEntry`] - one path selected for a snapshot
//! - **Archive layout**: [`TopLevelEntry`] - a first-level name inside an archive
//! - **Configuration**: [`SnapshotOptions`], [`RestoreOptions`], [`MatchMode`]
//! - **Results**: [`SnapshotResult`], [`RestoreResult`]

use std::path::{Path, PathBuf};

/// Name of the versioning metadata directory at a repository root
pub const METADATA_DIR: &str = ".git";

/// Name of the ignore-pattern file read from the repository root
pub const IGNORE_FILE: &str = ".gitignore";

/// Extension of generated snapshot archives
pub const ARCHIVE_EXTENSION: &str = "7z";

/// Virtualenv directory removed from restored trees unless asked to keep it
pub const VENV_DIR: &str = ".venv";

/// A path selected for inclusion in a snapshot
///
/// Paths are relative to the source root and never empty.
///
/// # Examples
///
/// ```rust
/// # use git_snapshot::types::FileEntry;
/// let entry = FileEntry::new("src/main.rs", false);
/// assert_eq!(entry.archive_path(), "src/main.rs");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEntry {
    /// Relative path from the source root
    pub path: PathBuf,
    /// Whether this entry is a directory
    pub is_directory: bool,
    /// Target of the link if this entry is a symbolic link
    pub symlink_target: Option<PathBuf>,
}

impl FileEntry {
    /// Create an entry for a path relative to the source root
    pub fn new(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            path: path.into(),
            is_directory,
            symlink_target: None,
        }
    }

    /// Create an entry for a symbolic link pointing at `target`
    ///
    /// The link itself is stored, never what it points to.
    pub fn symlink(path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            symlink_target: Some(target.into()),
        }
    }

    /// Whether this entry is a symbolic link
    pub fn is_symlink(&self) -> bool {
        self.symlink_target.is_some()
    }

    /// Relative path joined with `/`, as stored inside archives
    pub fn archive_path(&self) -> String {
        to_archive_path(&self.path)
    }
}

/// Render a relative path with `/` separators regardless of platform
///
/// Components that are not valid UTF-8 are rendered lossily. Use
/// [`to_exact_archive_path`] where the name has to survive a round trip.
pub(crate) fn to_archive_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Like [`to_archive_path`], but `None` if any component is not valid UTF-8
pub(crate) fn to_exact_archive_path(path: &Path) -> Option<String> {
    path.components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

/// A first-level name found inside an archive
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TopLevelEntry {
    /// Entry name, a single path component
    pub name: String,
    /// Whether the entry is (or contains) a directory
    pub is_directory: bool,
}

impl std::fmt::Display for TopLevelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_directory {
            write!(f, "{}/", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Which ignore-pattern matcher a snapshot uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// Simplified grammar: globs, directory-only and root-anchored patterns
    #[default]
    Simple,
    /// Full `.gitignore` semantics, including negation
    Gitignore,
}

/// Configuration for snapshot creation
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Versioning metadata directory that marks a repository root
    pub metadata_dir: String,
    /// Ignore file read from the repository root
    pub ignore_file: String,
    /// Pattern matcher used for the ignore rules
    pub match_mode: MatchMode,
    /// Patterns applied after those from the ignore file
    pub extra_ignore_patterns: Vec<String>,
    /// Search parent directories for the repository root
    pub discover_root: bool,
    /// Exclude the output directory when it lies inside the repository
    pub exclude_output_dir: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            metadata_dir: METADATA_DIR.to_string(),
            ignore_file: IGNORE_FILE.to_string(),
            match_mode: MatchMode::Simple,
            extra_ignore_patterns: Vec::new(),
            discover_root: false,
            exclude_output_dir: true,
        }
    }
}

/// Configuration for snapshot restoration
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Keep the `.venv` directory instead of removing it after extraction
    pub keep_venv: bool,
    /// Name of the virtualenv directory
    pub venv_dir: String,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            keep_venv: false,
            venv_dir: VENV_DIR.to_string(),
        }
    }
}

/// Outcome of a successful snapshot
#[derive(Debug, Clone)]
pub struct SnapshotResult {
    /// Path of the written archive
    pub archive_path: PathBuf,
    /// Repository root that was captured
    pub source_root: PathBuf,
    /// Top-level directory name inside the archive
    pub root_name: String,
    /// Number of files packed
    pub files: usize,
    /// Number of directories packed
    pub directories: usize,
    /// Number of symbolic links packed
    pub symlinks: usize,
    /// Total size of packed regular files in bytes
    pub total_bytes: u64,
    /// Size of the archive in bytes
    pub archive_bytes: u64,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Outcome of a successful restore
#[derive(Debug, Clone)]
pub struct RestoreResult {
    /// Directory the snapshot was restored into (`output/<root>`)
    pub target: PathBuf,
    /// Top-level directory name read from the archive
    pub root_name: String,
    /// Whether pre-existing content was moved aside before extraction
    pub backup_created: bool,
    /// Whether a `.venv` directory was removed from the restored tree
    pub venv_removed: bool,
    /// Whether the previous `.venv` was carried over into the restored tree
    pub venv_preserved: bool,
    /// Time taken in milliseconds
    pub duration_ms: u64,
    /// Non-fatal problems (e.g. the backup could not be deleted)
    pub warnings: Vec<String>,
}
