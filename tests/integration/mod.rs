//! Integration tests for snapshot and restore scenarios
//!
//! Archives are written with the real `.7z` codec. Failures during extraction
//! are injected by wrapping [`SevenZipArchiver`].

use ::git_snapshot::naming::FixedClock;
use ::git_snapshot::*;
use chrono::NaiveDate;
use sevenz_rust::{SevenZArchiveEntry, SevenZWriter};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Build a small repository under `parent/name`
pub fn make_repo(parent: &Path, name: &str) -> PathBuf {
    let root = parent.join(name);
    fs::create_dir_all(root.join(".git/objects/ab")).unwrap();
    fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    fs::write(root.join(".git/objects/ab/cdef"), [7u8; 64]).unwrap();
    fs::write(root.join(".gitignore"), "# generated\n*.pyc\n__pycache__/\n/dist\n").unwrap();
    fs::create_dir_all(root.join("pkg/__pycache__")).unwrap();
    fs::write(root.join("pkg/__init__.py"), "").unwrap();
    fs::write(root.join("pkg/core.py"), "def run():\n    return 42\n").unwrap();
    fs::write(root.join("pkg/core.pyc"), [0u8; 16]).unwrap();
    fs::write(root.join("pkg/__pycache__/core.cpython-312.pyc"), [0u8; 16]).unwrap();
    fs::create_dir_all(root.join("dist")).unwrap();
    fs::write(root.join("dist/pkg.whl"), "wheel").unwrap();
    fs::create_dir_all(root.join("docs/dist")).unwrap();
    fs::write(root.join("docs/dist/index.md"), "# Docs").unwrap();
    root
}

/// Every file below `root` with its content, keyed by `/`-joined relative path
pub fn file_map(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, fs::read(e.path()).unwrap())
        })
        .collect()
}

fn noon() -> FixedClock {
    FixedClock(
        NaiveDate::from_ymd_opt(2025, 7, 20)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap(),
    )
}

/// Extracts for real, then reports a failure
struct FailingAfterExtract;

impl Archiver for FailingAfterExtract {
    fn pack(&self, entries: &[FileEntry], source_root: &Path, destination: &Path) -> Result<()> {
        SevenZipArchiver::new().pack(entries, source_root, destination)
    }

    fn list_top_level_entries(&self, archive: &Path) -> Result<Vec<TopLevelEntry>> {
        SevenZipArchiver::new().list_top_level_entries(archive)
    }

    fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        SevenZipArchiver::new().extract(archive, destination)?;
        Err(SnapshotError::extract(archive, destination, "simulated failure partway"))
    }
}

/// Fails extraction after destroying the moved-aside backup content
struct DestroysBackup;

impl Archiver for DestroysBackup {
    fn pack(&self, entries: &[FileEntry], source_root: &Path, destination: &Path) -> Result<()> {
        SevenZipArchiver::new().pack(entries, source_root, destination)
    }

    fn list_top_level_entries(&self, archive: &Path) -> Result<Vec<TopLevelEntry>> {
        SevenZipArchiver::new().list_top_level_entries(archive)
    }

    fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        for entry in fs::read_dir(destination).unwrap() {
            let holder = entry.unwrap().path();
            if holder.file_name().unwrap().to_string_lossy().contains(".restore-backup-") {
                for stashed in fs::read_dir(&holder).unwrap() {
                    fs::remove_dir_all(stashed.unwrap().path()).unwrap();
                }
            }
        }
        Err(SnapshotError::extract(archive, destination, "simulated failure"))
    }
}

#[test]
fn test_round_trip_reproduces_file_set() {
    let work = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let restored = TempDir::new().unwrap();
    let root = make_repo(work.path(), "my_repo");

    let snapshot = SnapshotEngine::new()
        .with_clock(noon())
        .create(&root, backups.path())
        .unwrap();
    assert_eq!(
        snapshot.archive_path,
        fs::canonicalize(backups.path())
            .unwrap()
            .join("my_repo_snapshot_20250720_120000.7z")
    );

    RestoreEngine::new()
        .restore(&snapshot.archive_path, restored.path())
        .unwrap();

    let expected: BTreeMap<_, _> = file_map(&root)
        .into_iter()
        .filter(|(path, _)| !path.ends_with(".pyc") && !path.starts_with("dist/"))
        .collect();
    let actual = file_map(&restored.path().join("my_repo"));
    assert_eq!(actual, expected);
    // `/dist` is anchored, so the nested docs/dist survives
    assert!(actual.contains_key("docs/dist/index.md"));
}

#[test]
fn test_back_to_back_snapshots_share_root() {
    let work = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let root = make_repo(work.path(), "twice");
    let archiver = SevenZipArchiver::new();

    let first = create_snapshot(&root, &backups.path().join("a")).unwrap();
    let second = create_snapshot(&root, &backups.path().join("b")).unwrap();

    let first_roots = archiver.list_top_level_entries(&first.archive_path).unwrap();
    let second_roots = archiver.list_top_level_entries(&second.archive_path).unwrap();
    assert_eq!(first_roots, second_roots);
    assert_eq!(
        first_roots,
        vec![TopLevelEntry {
            name: "twice".to_string(),
            is_directory: true,
        }]
    );
}

#[test]
fn test_ambiguous_archive_leaves_target_untouched() {
    let work = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    for name in ["foo", "bar"] {
        fs::create_dir_all(work.path().join(name)).unwrap();
        fs::write(work.path().join(name).join("file.txt"), name).unwrap();
    }

    let archive = work.path().join("two_roots.7z");
    let mut writer = SevenZWriter::create(&archive).unwrap();
    for name in ["foo", "bar"] {
        let dir = work.path().join(name);
        writer
            .push_archive_entry(SevenZArchiveEntry::from_path(&dir, name.to_string()), None::<fs::File>)
            .unwrap();
        let file = dir.join("file.txt");
        writer
            .push_archive_entry(
                SevenZArchiveEntry::from_path(&file, format!("{}/file.txt", name)),
                Some(fs::File::open(&file).unwrap()),
            )
            .unwrap();
    }
    writer.finish().unwrap();

    fs::create_dir_all(out.path().join("foo")).unwrap();
    fs::write(out.path().join("foo/mine.txt"), "untouched").unwrap();
    let before = file_map(out.path());

    let err = restore_snapshot(&archive, out.path(), false).unwrap_err();
    match &err {
        SnapshotError::AmbiguousArchiveLayout { entries, .. } => {
            assert_eq!(entries, &vec!["bar/".to_string(), "foo/".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(file_map(out.path()), before);
}

#[test]
fn test_failed_extract_rolls_back() {
    let work = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let root = make_repo(work.path(), "D");

    let snapshot = create_snapshot(&root, backups.path()).unwrap();

    fs::create_dir_all(out.path().join("D")).unwrap();
    fs::write(out.path().join("D/keep.txt"), "keep me").unwrap();

    let err = RestoreEngine::with_archiver(FailingAfterExtract)
        .restore(&snapshot.archive_path, out.path())
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Extract { .. }));

    let names: Vec<_> = fs::read_dir(out.path().join("D"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, vec!["keep.txt"]);
    assert_eq!(fs::read_to_string(out.path().join("D/keep.txt")).unwrap(), "keep me");
    // No backup directory is left next to the target
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 1);
}

#[test]
fn test_failed_revert_reports_both_errors() {
    let work = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let root = make_repo(work.path(), "D");

    let snapshot = create_snapshot(&root, backups.path()).unwrap();
    fs::create_dir_all(out.path().join("D")).unwrap();
    fs::write(out.path().join("D/keep.txt"), "keep me").unwrap();

    let err = RestoreEngine::with_archiver(DestroysBackup)
        .restore(&snapshot.archive_path, out.path())
        .unwrap_err();

    assert!(err.requires_manual_recovery());
    match err {
        SnapshotError::RestoreFailedAndRevertFailed { restore, backup, .. } => {
            assert!(matches!(*restore, SnapshotError::Extract { .. }));
            let backup = backup.expect("target existed, so a backup was made");
            assert!(backup.is_dir(), "backup directory must be kept for recovery");
            assert!(backup.starts_with(fs::canonicalize(out.path()).unwrap()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_restore_from_archive_inside_target() {
    let work = TempDir::new().unwrap();
    let root = make_repo(work.path(), "self_contained");

    let snapshot = create_snapshot(&root, &root.join("snapshots")).unwrap();
    fs::write(root.join("pkg/core.py"), "broken").unwrap();

    let result = restore_snapshot(&snapshot.archive_path, work.path(), false).unwrap();
    assert!(result.backup_created);
    assert_eq!(
        fs::read_to_string(root.join("pkg/core.py")).unwrap(),
        "def run():\n    return 42\n"
    );
    // The archive lived in the replaced tree and was never packed into itself
    assert!(!root.join("snapshots").exists());
}

#[test]
fn test_venv_policy() {
    let work = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let root = make_repo(work.path(), "py");
    fs::create_dir_all(root.join(".venv/lib")).unwrap();
    fs::write(root.join(".venv/lib/site.py"), "snapshot venv").unwrap();

    let snapshot = create_snapshot(&root, backups.path()).unwrap();

    let dropped = TempDir::new().unwrap();
    let result = restore_snapshot(&snapshot.archive_path, dropped.path(), false).unwrap();
    assert!(result.venv_removed);
    assert!(!dropped.path().join("py/.venv").exists());

    let kept = TempDir::new().unwrap();
    let result = restore_snapshot(&snapshot.archive_path, kept.path(), true).unwrap();
    assert!(!result.venv_removed);
    assert_eq!(
        fs::read_to_string(kept.path().join("py/.venv/lib/site.py")).unwrap(),
        "snapshot venv"
    );
}

#[test]
fn test_gitignore_compat_mode_honors_negation() {
    let work = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let restored = TempDir::new().unwrap();
    let root = make_repo(work.path(), "neg");
    fs::write(root.join(".gitignore"), "*.log\n!keep.log\n").unwrap();
    fs::write(root.join("drop.log"), "x").unwrap();
    fs::write(root.join("keep.log"), "y").unwrap();

    let snapshot = SnapshotEngine::new()
        .with_match_mode(MatchMode::Gitignore)
        .create(&root, backups.path())
        .unwrap();
    restore_snapshot(&snapshot.archive_path, restored.path(), false).unwrap();

    assert!(restored.path().join("neg/keep.log").is_file());
    assert!(!restored.path().join("neg/drop.log").exists());
}

#[cfg(unix)]
#[test]
fn test_round_trip_keeps_modes_and_links() {
    use std::os::unix::fs::PermissionsExt;

    let work = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let restored = TempDir::new().unwrap();
    let root = make_repo(work.path(), "linked");
    fs::create_dir_all(root.join(".git/hooks")).unwrap();
    let hook = root.join(".git/hooks/pre-commit");
    fs::write(&hook, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(root.join("real.txt"), "real content").unwrap();
    std::os::unix::fs::symlink("real.txt", root.join("link.txt")).unwrap();

    let snapshot = create_snapshot(&root, backups.path()).unwrap();
    assert_eq!(snapshot.symlinks, 1);
    restore_snapshot(&snapshot.archive_path, restored.path(), false).unwrap();

    let target = restored.path().join("linked");
    let mode = fs::metadata(target.join(".git/hooks/pre-commit"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);

    let link = target.join("link.txt");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("real.txt"));
    assert_eq!(fs::read_to_string(&link).unwrap(), "real content");
}
