//! Snapshot creation
//!
//! [`SnapshotEngine`] ties the pieces together: it locates the repository
//! root, loads the ignore rules, collects the tree and packs it into a
//! timestamped archive.

use crate::archiver::{Archiver, SevenZipArchiver};
use crate::collector::TreeCollector;
use crate::error::{Result, SnapshotError};
use crate::filter::IgnoreRuleSet;
use crate::naming::{self, Clock, SystemClock};
use crate::types::{FileEntry, MatchMode, SnapshotOptions, SnapshotResult};
use crate::utils;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Creates snapshot archives of a repository
///
/// # Examples
///
/// ```rust,no_run
/// use git_snapshot::SnapshotEngine;
/// use std::path::Path;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let result = SnapshotEngine::new()
///     .with_ignore_pattern("*.tmp")
///     .create(Path::new("/work/my_repo"), Path::new("/backups"))?;
/// println!("Wrote {}", result.archive_path.display());
/// # Ok(())
/// # }
/// ```
pub struct SnapshotEngine<A: Archiver = SevenZipArchiver> {
    archiver: A,
    options: SnapshotOptions,
    clock: Box<dyn Clock>,
}

impl<A: Archiver + fmt::Debug> fmt::Debug for SnapshotEngine<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotEngine")
            .field("archiver", &self.archiver)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SnapshotEngine<SevenZipArchiver> {
    /// Create an engine that writes `.7z` snapshots using the system clock
    pub fn new() -> Self {
        Self::with_archiver(SevenZipArchiver::new())
    }
}

impl Default for SnapshotEngine<SevenZipArchiver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Archiver> SnapshotEngine<A> {
    /// Create an engine around a custom archive codec
    pub fn with_archiver(archiver: A) -> Self {
        Self {
            archiver,
            options: SnapshotOptions::default(),
            clock: Box::new(SystemClock),
        }
    }

    /// Replace all snapshot options
    pub fn with_options(mut self, options: SnapshotOptions) -> Self {
        self.options = options;
        self
    }

    /// Use `clock` for the archive timestamp
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Select the ignore-pattern matcher
    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.options.match_mode = mode;
        self
    }

    /// Add a pattern on top of those from the ignore file
    pub fn with_ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.options.extra_ignore_patterns.push(pattern.into());
        self
    }

    /// Search parent directories for the repository root
    pub fn discover_root(mut self, enabled: bool) -> Self {
        self.options.discover_root = enabled;
        self
    }

    /// Current options
    pub fn options(&self) -> &SnapshotOptions {
        &self.options
    }

    /// Snapshot the repository at `source` into `output_dir`
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::SourceNotFound`] if `source` is not a directory
    /// - [`SnapshotError::NotAVersionedRepo`] if no repository root was found
    /// - [`SnapshotError::InvalidSourceName`] if the root has no leaf name
    /// - [`SnapshotError::Pack`] if writing the archive fails (no partial
    ///   archive is left behind)
    #[instrument(skip(self))]
    pub fn create(&self, source: &Path, output_dir: &Path) -> Result<SnapshotResult> {
        info!("Creating snapshot of {:?} in {:?}", source, output_dir);
        let start = Instant::now();

        let root = self.resolve_root(source)?;
        let output_dir = absolute(output_dir)?;
        let archive_name = naming::generate(&root, self.clock.now())?;
        let root_name = naming::leaf_name(&root)?;

        let rules = self.build_rules(&root, &output_dir, &archive_name)?;
        let collector = TreeCollector::new(root.clone(), rules.compile(self.options.match_mode, &root))
            .with_metadata_dir(self.options.metadata_dir.as_str());
        let entries = collector.collect()?;

        fs::create_dir_all(&output_dir)
            .map_err(|e| SnapshotError::io("create output directory", &output_dir, e))?;
        let archive_path = output_dir.join(&archive_name);
        self.archiver.pack(&entries, &root, &archive_path)?;

        let counts = tally(&entries, &root);
        let result = SnapshotResult {
            archive_bytes: utils::file_size(&archive_path),
            archive_path,
            source_root: root,
            root_name,
            files: counts.files,
            directories: counts.directories,
            symlinks: counts.symlinks,
            total_bytes: counts.bytes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Snapshot {:?} written: {} files, {} directories in {}ms",
            result.archive_path, result.files, result.directories, result.duration_ms
        );
        Ok(result)
    }

    /// Canonical repository root that [`create`](Self::create) would snapshot for `source`
    ///
    /// # Errors
    ///
    /// [`SnapshotError::SourceNotFound`] or [`SnapshotError::NotAVersionedRepo`].
    pub fn resolve_root(&self, source: &Path) -> Result<PathBuf> {
        let not_found = || SnapshotError::SourceNotFound {
            path: source.to_path_buf(),
        };
        let canonical = fs::canonicalize(source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => not_found(),
            _ => SnapshotError::io("resolve source", source, e),
        })?;
        if !canonical.is_dir() {
            return Err(not_found());
        }

        let metadata_dir = self.options.metadata_dir.as_str();
        let root = if self.options.discover_root {
            utils::find_repo_root(&canonical, metadata_dir)
        } else {
            Some(canonical.clone()).filter(|dir| utils::is_repo_root(dir, metadata_dir))
        };

        let root = root.ok_or_else(|| SnapshotError::NotAVersionedRepo {
            path: canonical.clone(),
            metadata_dir: metadata_dir.to_string(),
        })?;
        if root != canonical {
            debug!("Using repository root {:?} for {:?}", root, canonical);
        }
        Ok(root)
    }

    /// Ignore file rules plus configured patterns plus output exclusion
    fn build_rules(&self, root: &Path, output_dir: &Path, archive_name: &str) -> Result<IgnoreRuleSet> {
        let mut rules = IgnoreRuleSet::load(root, &self.options.ignore_file)?;
        for pattern in &self.options.extra_ignore_patterns {
            rules.push(pattern);
        }

        if self.options.exclude_output_dir {
            match utils::make_relative(output_dir, root) {
                Some(relative) if relative.as_os_str().is_empty() => {
                    debug!("Output is the repository root, excluding {}", archive_name);
                    rules.push(format!("/{}", archive_name));
                }
                Some(relative) => {
                    let relative = crate::types::to_archive_path(&relative);
                    debug!("Output directory is inside the repository, excluding /{}/", relative);
                    rules.push(format!("/{}/", relative));
                }
                None => {}
            }
        }

        debug!("Using {} ignore rules", rules.len());
        Ok(rules)
    }
}

/// Absolute form of `path`, canonicalizing its deepest existing ancestor
///
/// The output directory may not exist yet, but it still has to be compared
/// with the canonical repository root.
fn absolute(path: &Path) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| SnapshotError::io("resolve current directory for", path, e))?
            .join(path)
    };

    let mut missing = Vec::new();
    let mut existing = path.as_path();
    loop {
        match fs::canonicalize(existing) {
            Ok(canonical) => {
                return Ok(missing.iter().rev().fold(canonical, |acc, part| acc.join(part)));
            }
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Ok(path),
            },
        }
    }
}

/// Entry counts and regular-file bytes of a collected tree
#[derive(Debug, Default)]
struct Tally {
    files: usize,
    directories: usize,
    symlinks: usize,
    bytes: u64,
}

fn tally(entries: &[FileEntry], root: &Path) -> Tally {
    entries.iter().fold(Tally::default(), |mut tally, entry| {
        if entry.is_symlink() {
            tally.symlinks += 1;
        } else if entry.is_directory {
            tally.directories += 1;
        } else {
            tally.files += 1;
            tally.bytes += utils::file_size(&root.join(&entry.path));
        }
        tally
    })
}
