//! Archive codec boundary
//!
//! The engines only need three things from an archive format: pack an explicit
//! list of entries under one root directory, list the first-level names of an
//! archive without extracting it, and extract it into a directory. The
//! [`Archiver`] trait captures exactly that; [`SevenZipArchiver`] implements it
//! for `.7z` files with `sevenz-rust`.
//!
//! ## Layout
//!
//! Every snapshot stores its entries below a single directory named after the
//! repository:
//!
//! ```text
//! my_repo/
//! my_repo/.git/HEAD
//! my_repo/src/main.rs
//! ```
//!
//! That single root is what lets a restore find its destination directory.

use crate::error::{Result, SnapshotError};
use crate::naming;
use crate::types::{to_exact_archive_path, FileEntry, TopLevelEntry};
use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader, SevenZWriter};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace, warn};

/// Buffer size used when writing extracted entries
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Attribute flag saying the high 16 bits hold a Unix `st_mode` (7-Zip convention)
const UNIX_EXTENSION: u32 = 0x8000;

/// Windows directory attribute, set alongside the Unix mode for directories
const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Pack, inspect and extract snapshot archives
pub trait Archiver {
    /// Write `entries` (relative to `source_root`) into a new archive at `destination`
    ///
    /// Entries are stored under a synthetic root directory named after the leaf
    /// of `source_root`. On failure the partially written archive is removed.
    fn pack(&self, entries: &[FileEntry], source_root: &Path, destination: &Path) -> Result<()>;

    /// First-level names in the archive, sorted by name
    fn list_top_level_entries(&self, archive: &Path) -> Result<Vec<TopLevelEntry>>;

    /// Extract the whole archive into `destination`
    fn extract(&self, archive: &Path, destination: &Path) -> Result<()>;
}

/// `.7z` implementation of [`Archiver`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SevenZipArchiver;

impl SevenZipArchiver {
    /// Create a new 7z archiver
    pub fn new() -> Self {
        Self
    }

    fn write_archive(
        &self,
        entries: &[FileEntry],
        source_root: &Path,
        root_name: &str,
        destination: &Path,
    ) -> Result<()> {
        let mut writer =
            SevenZWriter::create(destination).map_err(|e| SnapshotError::pack(destination, e))?;

        let mut root_entry = SevenZArchiveEntry::from_path(source_root, root_name.to_string());
        record_mode(&mut root_entry, source_root);
        writer
            .push_archive_entry(root_entry, None::<File>)
            .map_err(|e| SnapshotError::pack(destination, e))?;

        for entry in entries {
            let source = source_root.join(&entry.path);
            let relative = to_exact_archive_path(&entry.path).ok_or_else(|| {
                SnapshotError::pack(
                    destination,
                    format!("{:?} is not a valid UTF-8 name", entry.path),
                )
            })?;
            let name = format!("{}/{}", root_name, relative);
            trace!("Packing {}", name);

            let mut archive_entry = SevenZArchiveEntry::from_path(&source, name);
            record_mode(&mut archive_entry, &source);

            let content: Option<Box<dyn Read>> = match &entry.symlink_target {
                Some(target) => {
                    // from_path looks through links; a link is stored as its target text
                    archive_entry.is_directory = false;
                    let target = target.to_str().ok_or_else(|| {
                        SnapshotError::pack(
                            destination,
                            format!("link target of {:?} is not valid UTF-8", entry.path),
                        )
                    })?;
                    Some(Box::new(io::Cursor::new(target.as_bytes().to_vec())))
                }
                None if entry.is_directory => None,
                None => {
                    let file = File::open(&source).map_err(|e| {
                        SnapshotError::pack(destination, format!("cannot read {:?}: {}", source, e))
                    })?;
                    Some(Box::new(file))
                }
            };

            writer
                .push_archive_entry(archive_entry, content)
                .map_err(|e| SnapshotError::pack(destination, e))?;
        }

        writer
            .finish()
            .map_err(|e| SnapshotError::pack(destination, e))?;
        Ok(())
    }
}

impl Archiver for SevenZipArchiver {
    fn pack(&self, entries: &[FileEntry], source_root: &Path, destination: &Path) -> Result<()> {
        let root_name = naming::leaf_name(source_root)?;
        debug!(
            "Packing {} entries from {:?} into {:?} under {}/",
            entries.len(),
            source_root,
            destination,
            root_name
        );

        let written = self.write_archive(entries, source_root, &root_name, destination);
        if written.is_err() {
            discard_partial(destination);
        }
        written
    }

    fn list_top_level_entries(&self, archive: &Path) -> Result<Vec<TopLevelEntry>> {
        ensure_archive_file(archive)?;
        let reader = SevenZReader::open(archive, Password::empty())
            .map_err(|e| SnapshotError::corrupt(archive, e))?;

        let mut top_level: BTreeMap<String, bool> = BTreeMap::new();
        for entry in &reader.archive().files {
            let Some((first, nested)) = split_first_component(entry.name()) else {
                continue;
            };
            *top_level.entry(first).or_insert(false) |= nested || entry.is_directory();
        }

        Ok(top_level
            .into_iter()
            .map(|(name, is_directory)| TopLevelEntry { name, is_directory })
            .collect())
    }

    fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        ensure_archive_file(archive)?;
        let mut reader = SevenZReader::open(archive, Password::empty())
            .map_err(|e| SnapshotError::corrupt(archive, e))?;

        debug!("Extracting {:?} into {:?}", archive, destination);
        let mut failure: Option<SnapshotError> = None;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut directory_modes: Vec<(PathBuf, u32)> = Vec::new();

        let outcome = reader.for_each_entries(|entry, data| {
            let Some(relative) = safe_relative_path(entry.name()) else {
                failure = Some(SnapshotError::corrupt(
                    archive,
                    format!("entry {:?} escapes the destination", entry.name()),
                ));
                return Ok(false);
            };
            let target = destination.join(&relative);
            let mode = unix_mode(entry);
            trace!("Extracting {:?}", relative);

            let written = if entry.is_directory() {
                if let Some(mode) = mode {
                    directory_modes.push((target.clone(), mode));
                }
                fs::create_dir_all(&target).map_err(CopyError::Write)
            } else if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
                write_symlink(data, &relative, destination)
            } else {
                write_entry(data, &target, &mut buffer).and_then(|()| match mode {
                    Some(mode) => set_mode(&target, mode).map_err(CopyError::Write),
                    None => Ok(()),
                })
            };

            match written {
                Ok(()) => Ok(true),
                Err(CopyError::Read(e)) => {
                    failure = Some(SnapshotError::corrupt(
                        archive,
                        format!("cannot decode {:?}: {}", entry.name(), e),
                    ));
                    Ok(false)
                }
                Err(CopyError::Unsafe(reason)) => {
                    failure = Some(SnapshotError::corrupt(archive, reason));
                    Ok(false)
                }
                Err(CopyError::Write(e)) => {
                    failure = Some(SnapshotError::extract(
                        archive,
                        destination,
                        format!("cannot write {:?}: {}", target, e),
                    ));
                    Ok(false)
                }
            }
        });

        if let Some(error) = failure {
            return Err(error);
        }
        outcome.map_err(|e| SnapshotError::corrupt(archive, e))?;

        // Children first, so a read-only directory does not block its own entries
        for (path, mode) in directory_modes.iter().rev() {
            set_mode(path, *mode).map_err(|e| {
                SnapshotError::extract(
                    archive,
                    destination,
                    format!("cannot set permissions on {:?}: {}", path, e),
                )
            })?;
        }
        Ok(())
    }
}

fn ensure_archive_file(archive: &Path) -> Result<()> {
    match fs::metadata(archive) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(SnapshotError::ArchiveNotFound {
            path: archive.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SnapshotError::ArchiveNotFound {
            path: archive.to_path_buf(),
        }),
        Err(e) => Err(SnapshotError::io("inspect archive", archive, e)),
    }
}

/// Remove an archive that failed to pack
fn discard_partial(destination: &Path) {
    match fs::remove_file(destination) {
        Ok(()) => debug!("Removed partial archive {:?}", destination),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial archive {:?}: {}", destination, e),
    }
}

/// Split an archive entry name into its first component and whether more follow
fn split_first_component(name: &str) -> Option<(String, bool)> {
    let normalized = name.replace('\\', "/");
    let mut parts = normalized
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".");
    let first = parts.next()?.to_string();
    Some((first, parts.next().is_some()))
}

/// Relative path for an entry name, or `None` if it would leave the destination
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Store the Unix mode of `source` in the entry attributes
#[cfg(unix)]
fn record_mode(entry: &mut SevenZArchiveEntry, source: &Path) {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = fs::symlink_metadata(source) else {
        return;
    };
    let mut attributes = UNIX_EXTENSION | (meta.mode() << 16);
    if meta.is_dir() {
        attributes |= FILE_ATTRIBUTE_DIRECTORY;
    }
    entry.has_windows_attributes = true;
    entry.windows_attributes = attributes;
}

#[cfg(not(unix))]
fn record_mode(_entry: &mut SevenZArchiveEntry, _source: &Path) {}

/// Unix `st_mode` recorded for an entry, if any
fn unix_mode(entry: &SevenZArchiveEntry) -> Option<u32> {
    (entry.has_windows_attributes && entry.windows_attributes & UNIX_EXTENSION != 0)
        .then(|| entry.windows_attributes >> 16)
}

/// Apply the permission bits of `mode`; setuid, setgid and sticky are dropped
#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Whether a link at `link` (relative to the destination) pointing at
/// `target` resolves below the destination, judged lexically
fn link_stays_inside(link: &Path, target: &Path) -> bool {
    let mut depth = link.components().count().saturating_sub(1);
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(up) => depth = up,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Recreate a symbolic link whose target text is the entry content
fn write_symlink(
    data: &mut dyn Read,
    relative: &Path,
    destination: &Path,
) -> std::result::Result<(), CopyError> {
    let mut raw = String::new();
    data.read_to_string(&mut raw).map_err(CopyError::Read)?;
    let link_target = PathBuf::from(&raw);
    if raw.is_empty() || !link_stays_inside(relative, &link_target) {
        return Err(CopyError::Unsafe(format!(
            "link {:?} points outside the destination ({:?})",
            relative, raw
        )));
    }

    let link = destination.join(relative);
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(CopyError::Write)?;
    }
    create_symlink(&link_target, &link).map_err(CopyError::Write)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_target: &Path, link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symbolic links are not supported here: {:?}", link),
    ))
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
    /// Entry content would place data outside the destination
    Unsafe(String),
}

fn write_entry(
    data: &mut dyn Read,
    target: &Path,
    buffer: &mut [u8],
) -> std::result::Result<(), CopyError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(CopyError::Write)?;
    }
    let mut file = File::create(target).map_err(CopyError::Write)?;
    loop {
        let read = match data.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        file.write_all(&buffer[..read]).map_err(CopyError::Write)?;
    }
    file.flush().map_err(CopyError::Write)
}
