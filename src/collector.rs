//! Source tree collection
//!
//! [`TreeCollector`] walks a repository and produces the sorted list of
//! [`FileEntry`] values that go into a snapshot. Excluded directories are
//! pruned during the walk, so nothing below them is visited. The versioning
//! metadata directory is exempt from filtering and always collected in full.
//!
//! ## Example
//!
//! ```rust,no_run
//! use git_snapshot::collector::TreeCollector;
//! use git_snapshot::filter::IgnoreRuleSet;
//! use git_snapshot::types::MatchMode;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let root = PathBuf::from("/work/my_repo");
//! let rules = IgnoreRuleSet::load(&root, ".gitignore")?;
//! let collector = TreeCollector::new(root.clone(), rules.compile(MatchMode::Simple, &root));
//! for entry in collector.collect()? {
//!     println!("{}", entry.archive_path());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SnapshotError};
use crate::filter::PathFilter;
use crate::types::{FileEntry, METADATA_DIR};
use crate::utils;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Walks a source directory and selects the entries to snapshot
#[derive(Debug)]
pub struct TreeCollector {
    /// Root directory to walk
    root_path: PathBuf,
    /// Exclusion rules
    filter: Box<dyn PathFilter>,
    /// Directory that is always included
    metadata_dir: String,
}

impl TreeCollector {
    /// Create a collector for `root_path` using `filter` for exclusions
    pub fn new(root_path: PathBuf, filter: Box<dyn PathFilter>) -> Self {
        Self {
            root_path,
            filter,
            metadata_dir: METADATA_DIR.to_string(),
        }
    }

    /// Override the name of the always-included metadata directory
    pub fn with_metadata_dir(mut self, name: impl Into<String>) -> Self {
        self.metadata_dir = name.into();
        self
    }

    /// Root directory being collected
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Collect every included file and directory below the root
    ///
    /// Entries are sorted by their `/`-joined relative path, so two runs over an
    /// unchanged tree return the same sequence. Symbolic links are collected
    /// as links and never followed.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::SourceNotFound`] if the root is missing or not a directory
    /// - [`SnapshotError::NotAVersionedRepo`] if the metadata directory is absent
    /// - [`SnapshotError::WalkDir`] if part of the tree cannot be read
    pub fn collect(&self) -> Result<Vec<FileEntry>> {
        let start = Instant::now();
        self.validate_root()?;

        let root = self.root_path.as_path();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                let Ok(relative) = entry.path().strip_prefix(root) else {
                    return true;
                };
                self.is_metadata(relative)
                    || !self.filter.matches(relative, entry.file_type().is_dir())
            });

        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry?;
            let Some(relative) = utils::make_relative(entry.path(), root) else {
                continue;
            };
            if entry.path_is_symlink() {
                let target = fs::read_link(entry.path())
                    .map_err(|e| SnapshotError::io("read symbolic link", entry.path(), e))?;
                trace!("Collected link {:?} -> {:?}", relative, target);
                entries.push(FileEntry::symlink(relative, target));
                continue;
            }
            trace!("Collected {:?}", relative);
            entries.push(FileEntry::new(relative, entry.file_type().is_dir()));
        }

        entries.sort_by_cached_key(FileEntry::archive_path);

        debug!(
            "Collected {} entries from {:?} in {:?}",
            entries.len(),
            root,
            start.elapsed()
        );
        Ok(entries)
    }

    fn validate_root(&self) -> Result<()> {
        match fs::metadata(&self.root_path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(SnapshotError::SourceNotFound {
                    path: self.root_path.clone(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SnapshotError::SourceNotFound {
                    path: self.root_path.clone(),
                })
            }
            Err(e) => return Err(SnapshotError::io("inspect", &self.root_path, e)),
        }

        if !utils::is_repo_root(&self.root_path, &self.metadata_dir) {
            return Err(SnapshotError::NotAVersionedRepo {
                path: self.root_path.clone(),
                metadata_dir: self.metadata_dir.clone(),
            });
        }
        Ok(())
    }

    fn is_metadata(&self, relative: &Path) -> bool {
        matches!(
            relative.components().next(),
            Some(Component::Normal(first)) if first == self.metadata_dir.as_str()
        )
    }
}
