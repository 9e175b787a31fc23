//! Main test module for git-snapshot
//!
//! This module includes all test suites:
//! - Integration tests for create/restore scenarios against real archives
//! - Property-based tests for filtering invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::git_snapshot::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo(root: &std::path::Path) {
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    }

    #[test]
    fn test_repository_with_only_metadata() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let root = work.path().join("bare");
        init_repo(&root);

        let snapshot = create_snapshot(&root, out.path()).unwrap();
        assert_eq!(snapshot.files, 1);
        assert_eq!(snapshot.directories, 1);

        let restored = TempDir::new().unwrap();
        restore_snapshot(&snapshot.archive_path, restored.path(), false).unwrap();
        assert!(restored.path().join("bare/.git/HEAD").is_file());
    }

    #[test]
    fn test_special_filenames() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let root = work.path().join("repo");
        init_repo(&root);

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "ünïcödé.txt",
        ];
        for name in &special_names {
            fs::write(root.join(name), name.as_bytes()).unwrap();
        }

        let snapshot = create_snapshot(&root, out.path()).unwrap();
        let restored = TempDir::new().unwrap();
        restore_snapshot(&snapshot.archive_path, restored.path(), false).unwrap();

        for name in &special_names {
            let content = fs::read_to_string(restored.path().join("repo").join(name)).unwrap();
            assert_eq!(content, *name);
        }
    }

    #[test]
    fn test_empty_files_and_directories_survive() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let root = work.path().join("repo");
        init_repo(&root);
        fs::create_dir_all(root.join("empty/nested")).unwrap();
        fs::write(root.join("zero.bin"), b"").unwrap();

        let snapshot = create_snapshot(&root, out.path()).unwrap();
        let restored = TempDir::new().unwrap();
        restore_snapshot(&snapshot.archive_path, restored.path(), false).unwrap();

        let target = restored.path().join("repo");
        assert!(target.join("empty/nested").is_dir());
        assert_eq!(fs::read(target.join("zero.bin")).unwrap().len(), 0);
    }

    #[test]
    fn test_not_a_repository() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(work.path().join("file.txt"), "x").unwrap();

        let err = create_snapshot(work.path(), out.path()).unwrap_err();
        assert!(matches!(err, SnapshotError::NotAVersionedRepo { .. }));
        assert!(err.user_message().contains("not a git repository"));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_restore_missing_archive() {
        let out = TempDir::new().unwrap();
        let err = restore_snapshot(&out.path().join("missing.7z"), out.path(), false).unwrap_err();
        assert!(matches!(err, SnapshotError::ArchiveNotFound { .. }));
        assert!(err.is_archive_problem());
    }

    #[test]
    fn test_restore_garbage_file() {
        let out = TempDir::new().unwrap();
        let archive = out.path().join("garbage.7z");
        fs::write(&archive, b"this is not a 7z archive").unwrap();

        let err = restore_snapshot(&archive, out.path(), false).unwrap_err();
        assert!(matches!(err, SnapshotError::CorruptArchive { .. }));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 1);
    }
}
