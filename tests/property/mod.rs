//! Property-based testing for git-snapshot
//!
//! Uses proptest to check the collection invariants over randomly generated
//! trees and ignore patterns.

use ::git_snapshot::collector::TreeCollector;
use ::git_snapshot::filter::IgnoreRuleSet;
use ::git_snapshot::naming;
use ::git_snapshot::*;
use chrono::NaiveDate;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Generate random relative file paths (0-2 directories deep)
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let component = prop_oneof![
        Just("src"),
        Just("build"),
        Just("cache"),
        Just("docs"),
        Just("objects"),
    ];
    let file = prop_oneof![
        Just("main.rs"),
        Just("notes.txt"),
        Just("trace.log"),
        Just("data.bin"),
        Just("build"),
    ];
    (prop::collection::vec(component, 0..3), file).prop_map(|(dirs, file)| {
        let mut path: PathBuf = dirs.into_iter().collect();
        path.push(file);
        path
    })
}

/// Generate patterns from the simplified grammar
fn pattern_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("*.log".to_string()),
        Just("build/".to_string()),
        Just("/docs".to_string()),
        Just("cache".to_string()),
        Just("src/*.txt".to_string()),
        Just("**/objects".to_string()),
        Just("*.bin".to_string()),
    ]
}

/// Write the generated files below a fresh repository
fn build_tree(root: &Path, files: &[PathBuf]) -> BTreeSet<PathBuf> {
    fs::create_dir_all(root.join(".git/objects")).unwrap();
    fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    fs::write(root.join(".git/objects/trace.log"), "packed").unwrap();
    fs::create_dir_all(root.join(".git/build")).unwrap();
    fs::write(root.join(".git/build/data.bin"), "x").unwrap();

    let mut written = BTreeSet::new();
    for file in files {
        let target = root.join(file);
        // A generated file name may collide with a generated directory
        if file.ancestors().skip(1).any(|a| root.join(a).is_file()) || target.is_dir() {
            continue;
        }
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, file.to_string_lossy().as_bytes()).unwrap();
        written.insert(file.clone());
    }
    written
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_collect_never_returns_excluded_paths(
        files in prop::collection::vec(path_strategy(), 1..12),
        patterns in prop::collection::vec(pattern_strategy(), 0..4),
    ) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("repo");
        build_tree(&root, &files);

        let rules = IgnoreRuleSet::from_lines(&patterns);
        let filter = rules.compile(MatchMode::Simple, &root);
        let entries = TreeCollector::new(root.clone(), rules.compile(MatchMode::Simple, &root))
            .collect()
            .unwrap();

        for entry in &entries {
            let in_metadata = entry.path.starts_with(".git");
            if in_metadata {
                continue;
            }
            // Neither the entry nor any of its ancestors may match a rule
            for ancestor in entry.path.ancestors().filter(|a| !a.as_os_str().is_empty()) {
                let is_dir = ancestor != entry.path.as_path() || entry.is_directory;
                prop_assert!(
                    !filter.matches(ancestor, is_dir),
                    "{:?} collected although {:?} is excluded by {:?}",
                    entry.path, ancestor, patterns
                );
            }
        }

        let paths: BTreeSet<_> = entries.iter().map(|e| e.archive_path()).collect();
        prop_assert!(paths.contains(".git/HEAD"));
        prop_assert!(paths.contains(".git/objects/trace.log"));
        prop_assert!(paths.contains(".git/build/data.bin"));
    }

    #[test]
    fn prop_unfiltered_collect_returns_every_file(
        files in prop::collection::vec(path_strategy(), 1..12),
    ) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("repo");
        let written = build_tree(&root, &files);

        let entries = TreeCollector::new(root.clone(), IgnoreRuleSet::empty().compile(MatchMode::Simple, &root))
            .collect()
            .unwrap();

        let collected: BTreeSet<PathBuf> = entries
            .iter()
            .filter(|e| !e.is_directory && !e.path.starts_with(".git"))
            .map(|e| e.path.clone())
            .collect();
        prop_assert_eq!(collected, written);
    }

    #[test]
    fn prop_archive_name_shape(
        leaf in "[a-zA-Z0-9_-]{1,24}",
        secs in 0i64..4_000_000_000,
    ) {
        let now = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(secs);
        let name = naming::generate(&Path::new("/work").join(&leaf), now).unwrap();

        let expected = format!("{}_snapshot_{}.7z", leaf, now.format("%Y%m%d_%H%M%S"));
        prop_assert_eq!(&name, &expected);
        prop_assert_eq!(name.len(), leaf.len() + "_snapshot_YYYYMMDD_HHMMSS.7z".len());
    }
}
