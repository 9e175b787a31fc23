//! Snapshot restoration
//!
//! Restoring replaces `output/<root>` with the content of a snapshot, where
//! `<root>` is the single top-level directory inside the archive. The previous
//! content of `output/<root>` is never deleted until the new content is fully
//! in place:
//!
//! ```text
//! validate archive -> inspect root -> move target aside -> verify target is clear
//!     -> extract -> post-process -> discard backup
//!                        |
//!                     failure -> delete partial output -> move backup back
//! ```
//!
//! If moving the backup back fails as well, the backup is left where it is and
//! [`SnapshotError::RestoreFailedAndRevertFailed`] tells the caller where.

use crate::archiver::{Archiver, SevenZipArchiver};
use crate::error::{Result, SnapshotError};
use crate::types::{RestoreOptions, RestoreResult};
use crate::utils;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, error, info, instrument, warn};

/// Restores snapshot archives with automatic rollback on failure
///
/// # Examples
///
/// ```rust,no_run
/// use git_snapshot::RestoreEngine;
/// use std::path::Path;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let result = RestoreEngine::new()
///     .keep_venv(true)
///     .restore(
///         Path::new("/backups/my_repo_snapshot_20250720_143000.7z"),
///         Path::new("/work"),
///     )?;
/// println!("Restored into {}", result.target.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RestoreEngine<A: Archiver = SevenZipArchiver> {
    archiver: A,
    options: RestoreOptions,
}

impl RestoreEngine<SevenZipArchiver> {
    /// Create an engine that reads `.7z` snapshots
    pub fn new() -> Self {
        Self::with_archiver(SevenZipArchiver::new())
    }
}

impl Default for RestoreEngine<SevenZipArchiver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Archiver> RestoreEngine<A> {
    /// Create an engine around a custom archive codec
    pub fn with_archiver(archiver: A) -> Self {
        Self {
            archiver,
            options: RestoreOptions::default(),
        }
    }

    /// Replace all restore options
    pub fn with_options(mut self, options: RestoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Keep the virtualenv directory instead of removing it
    pub fn keep_venv(mut self, keep: bool) -> Self {
        self.options.keep_venv = keep;
        self
    }

    /// Current options
    pub fn options(&self) -> &RestoreOptions {
        &self.options
    }

    /// Restore `archive_path` into `output_dir`
    ///
    /// The snapshot lands in `output_dir/<root>`, where `<root>` is the archive's
    /// single top-level directory. `output_dir` is created if missing.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::ArchiveNotFound`] if the archive is missing or unreadable
    /// - [`SnapshotError::AmbiguousArchiveLayout`] if the archive does not have
    ///   exactly one top-level directory (nothing is touched on disk)
    /// - [`SnapshotError::CorruptArchive`] / [`SnapshotError::Extract`] if
    ///   extraction fails; the previous content has been put back
    /// - [`SnapshotError::RestoreFailedAndRevertFailed`] if putting the previous
    ///   content back failed too
    #[instrument(skip(self))]
    pub fn restore(&self, archive_path: &Path, output_dir: &Path) -> Result<RestoreResult> {
        info!("Restoring {:?} into {:?}", archive_path, output_dir);
        let start = Instant::now();

        let archive = validate_archive(archive_path)?;
        let root_name = self.inspect_root(&archive)?;

        fs::create_dir_all(output_dir)
            .map_err(|e| SnapshotError::io("create output directory", output_dir, e))?;
        let output_dir = fs::canonicalize(output_dir)
            .map_err(|e| SnapshotError::io("resolve output directory", output_dir, e))?;
        let target = output_dir.join(&root_name);

        let mut backup = RestoreBackup::acquire(&target, &output_dir, &root_name)?;
        let backup_created = backup.holds_content();
        // The archive may have lived inside the directory that was just moved aside.
        let archive = backup.relocate(&archive);

        let outcome = ensure_cleared(&target)
            .and_then(|()| self.archiver.extract(&archive, &output_dir))
            .and_then(|()| self.post_process(&target, &mut backup));

        let (venv_removed, venv_preserved) = match outcome {
            Ok(venv) => venv,
            Err(failure) => {
                error!("Restore failed: {}", failure);
                return Err(match backup.revert() {
                    Ok(()) => {
                        info!("Reverted {:?} to its state before the restore", target);
                        failure
                    }
                    Err(RevertFailure { error: revert, kept }) => {
                        error!("Automatic revert failed: {}", revert);
                        SnapshotError::RestoreFailedAndRevertFailed {
                            restore: Box::new(failure),
                            revert: Box::new(revert),
                            backup: kept,
                        }
                    }
                });
            }
        };

        let mut warnings = Vec::new();
        if let Err(e) = backup.discard() {
            warn!("Could not delete restore backup: {}", e);
            warnings.push(format!("Could not delete restore backup: {}", e));
        }

        let result = RestoreResult {
            target,
            root_name,
            backup_created,
            venv_removed,
            venv_preserved,
            duration_ms: start.elapsed().as_millis() as u64,
            warnings,
        };
        info!(
            "Restored {:?} in {}ms",
            result.target, result.duration_ms
        );
        Ok(result)
    }

    /// Determine the single top-level directory of the archive
    fn inspect_root(&self, archive: &Path) -> Result<String> {
        let entries = self.archiver.list_top_level_entries(archive)?;
        let ambiguous = |reason: &str| SnapshotError::AmbiguousArchiveLayout {
            path: archive.to_path_buf(),
            reason: reason.to_string(),
            entries: entries.iter().map(ToString::to_string).collect(),
        };

        match entries.as_slice() {
            [] => Err(ambiguous("archive has no entries")),
            [only] if !only.is_directory => Err(ambiguous("the only top-level entry is a file")),
            [only] if !is_plain_name(&only.name) => {
                Err(ambiguous("top-level directory name is not a plain name"))
            }
            [only] => {
                debug!("Archive root directory is {:?}", only.name);
                Ok(only.name.clone())
            }
            _ => Err(ambiguous("archive has more than one top-level entry")),
        }
    }

    /// Apply the virtualenv policy to a freshly extracted tree
    ///
    /// Returns `(removed, preserved)`.
    fn post_process(&self, target: &Path, backup: &mut RestoreBackup) -> Result<(bool, bool)> {
        let venv = target.join(&self.options.venv_dir);
        let present = fs::symlink_metadata(&venv).is_ok();

        if !self.options.keep_venv {
            if present {
                debug!("Removing {:?} from restored tree", venv);
                utils::remove_path(&venv)?;
            }
            return Ok((present, false));
        }

        if present {
            return Ok((false, false));
        }
        match backup.stashed(&self.options.venv_dir) {
            Some(previous) => {
                debug!("Carrying {:?} over into restored tree", previous);
                fs::rename(&previous, &venv)
                    .map_err(|e| SnapshotError::io("carry over virtualenv", &previous, e))?;
                Ok((false, true))
            }
            None => Ok((false, false)),
        }
    }
}

/// Check that the archive is a readable file and return its canonical path
fn validate_archive(archive: &Path) -> Result<PathBuf> {
    let not_found = || SnapshotError::ArchiveNotFound {
        path: archive.to_path_buf(),
    };
    let meta = fs::metadata(archive).map_err(|_| not_found())?;
    if !meta.is_file() {
        return Err(not_found());
    }
    File::open(archive).map_err(|_| not_found())?;
    fs::canonicalize(archive).map_err(|_| not_found())
}

/// Make sure nothing occupies the restore target before extraction
fn ensure_cleared(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SnapshotError::io("inspect restore target", target, e)),
        Ok(_) => Err(SnapshotError::io(
            "clear restore target",
            target,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "target reappeared after it was moved aside",
            ),
        )),
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Moved-aside copy of the restore target
#[derive(Debug)]
struct Stash {
    /// Hidden temporary directory holding the copy
    holder: TempDir,
    /// The previous target, inside `holder`
    path: PathBuf,
}

/// Why a revert failed, and where the previous content now lives
#[derive(Debug)]
struct RevertFailure {
    error: SnapshotError,
    kept: Option<PathBuf>,
}

/// Pre-restore content of the target, held for the duration of one restore
///
/// The backup must be settled with [`RestoreBackup::discard`] or
/// [`RestoreBackup::revert`]. Dropping it unsettled (e.g. while unwinding from
/// a panic) reverts on a best-effort basis.
#[derive(Debug)]
struct RestoreBackup {
    target: PathBuf,
    stash: Option<Stash>,
    settled: bool,
}

impl RestoreBackup {
    /// Move `target` aside into a temporary directory inside `output_dir`
    ///
    /// Keeping the backup next to the target keeps the move a same-filesystem
    /// rename. A missing target gives an empty backup.
    fn acquire(target: &Path, output_dir: &Path, root_name: &str) -> Result<Self> {
        match fs::symlink_metadata(target) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{:?} does not exist, nothing to back up", target);
                return Ok(Self {
                    target: target.to_path_buf(),
                    stash: None,
                    settled: false,
                });
            }
            Err(e) => return Err(SnapshotError::io("inspect restore target", target, e)),
            Ok(_) => {}
        }

        let holder = tempfile::Builder::new()
            .prefix(&format!(".{}.restore-backup-", root_name))
            .tempdir_in(output_dir)
            .map_err(|e| SnapshotError::io("create backup directory in", output_dir, e))?;
        let path = holder.path().join(root_name);
        fs::rename(target, &path).map_err(|e| SnapshotError::io("move aside", target, e))?;
        debug!("Moved {:?} aside to {:?}", target, path);

        Ok(Self {
            target: target.to_path_buf(),
            stash: Some(Stash { holder, path }),
            settled: false,
        })
    }

    /// Whether the target existed and was moved aside
    fn holds_content(&self) -> bool {
        self.stash.is_some()
    }

    /// Path of `relative` inside the backup, if it exists there
    fn stashed(&self, relative: &str) -> Option<PathBuf> {
        let stash = self.stash.as_ref()?;
        let path = stash.path.join(relative);
        fs::symlink_metadata(&path).ok().map(|_| path)
    }

    /// Translate a path that pointed into the target to its place in the backup
    fn relocate(&self, path: &Path) -> PathBuf {
        match (&self.stash, path.strip_prefix(&self.target)) {
            (Some(stash), Ok(relative)) => stash.path.join(relative),
            _ => path.to_path_buf(),
        }
    }

    /// Permanently delete the backup after a successful restore
    fn discard(mut self) -> Result<()> {
        self.settled = true;
        let Some(stash) = self.stash.take() else {
            return Ok(());
        };
        let holder = stash.holder.keep();
        utils::remove_dir_robustly(&holder)?;
        debug!("Deleted restore backup {:?}", holder);
        Ok(())
    }

    /// Remove whatever a failed restore left at the target and put the backup back
    fn revert(mut self) -> std::result::Result<(), RevertFailure> {
        self.settled = true;
        let stash = self.stash.take();

        if let Err(error) = utils::remove_path(&self.target) {
            return Err(RevertFailure {
                error,
                kept: stash.map(|s| s.holder.keep()),
            });
        }

        let Some(stash) = stash else {
            debug!("Removed partial output at {:?}", self.target);
            return Ok(());
        };

        match fs::rename(&stash.path, &self.target) {
            Ok(()) => {
                debug!("Moved backup {:?} back to {:?}", stash.path, self.target);
                Ok(())
            }
            Err(e) => {
                let error = SnapshotError::io("move backup back", &stash.path, e);
                Err(RevertFailure {
                    error,
                    kept: Some(stash.holder.keep()),
                })
            }
        }
    }
}

impl Drop for RestoreBackup {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!("Restore of {:?} interrupted; reverting", self.target);
        let Some(stash) = self.stash.take() else {
            return;
        };
        let reverted = utils::remove_path(&self.target).and_then(|()| {
            fs::rename(&stash.path, &self.target)
                .map_err(|e| SnapshotError::io("move backup back", &stash.path, e))
        });
        if let Err(e) = reverted {
            let kept = stash.holder.keep();
            error!("{}; previous contents kept at {:?}", e, kept);
        }
    }
}
