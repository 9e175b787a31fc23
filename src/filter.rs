//! Ignore rules and path filtering
//!
//! Rules come from a single ignore file at the repository root. They are
//! compiled once into a [`PathFilter`] and then queried per path while the
//! tree is walked.
//!
//! ## Pattern grammar ([`MatchMode::Simple`])
//!
//! ```text
//! # comment, blank lines are ignored
//! *.log        any file or directory named *.log, at any depth
//! build/       directories named build (and everything below them)
//! /dist        only dist at the repository root
//! docs/*.pdf   a slash inside the pattern anchors it to the root
//! **/cache     cache at any depth
//! \#notes      literal leading '#'
//! ```
//!
//! Negation (`!pattern`) is not part of the simplified grammar. Use
//! [`MatchMode::Gitignore`] for full `.gitignore` semantics.

use crate::error::{Result, SnapshotError};
use crate::types::MatchMode;
use globset::{GlobBuilder, GlobMatcher};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Decides whether a path relative to the source root is excluded
pub trait PathFilter: std::fmt::Debug {
    /// Returns true if `path` must be left out of the snapshot
    ///
    /// A path is excluded when it or any of its ancestor directories matches.
    fn matches(&self, path: &Path, is_directory: bool) -> bool;
}

/// Ordered ignore patterns read from one ignore file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRuleSet {
    patterns: Vec<String>,
    source: Option<PathBuf>,
}

impl IgnoreRuleSet {
    /// An empty rule set that excludes nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a rule set from ignore-file lines, dropping blanks and comments
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = lines
            .into_iter()
            .filter_map(|line| clean_line(line.as_ref()))
            .collect();
        Self {
            patterns,
            source: None,
        }
    }

    /// Load `<root>/<file_name>`
    ///
    /// A missing file yields an empty rule set, never an error.
    pub fn load(root: &Path, file_name: &str) -> Result<Self> {
        let path = root.join(file_name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No {} at {:?}; proceeding without exclusions", file_name, root);
                return Ok(Self::empty());
            }
            Err(e) => return Err(SnapshotError::io("read ignore file", path, e)),
        };

        let mut rules = Self::from_lines(content.lines());
        debug!("Loaded {} ignore patterns from {:?}", rules.len(), path);
        rules.source = Some(path);
        Ok(rules)
    }

    /// Append a pattern after the ones already loaded
    pub fn push(&mut self, pattern: impl AsRef<str>) {
        if let Some(pattern) = clean_line(pattern.as_ref()) {
            self.patterns.push(pattern);
        }
    }

    /// Patterns in file order
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// File the patterns were read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether there are no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Compile the rules into a filter using the requested matcher
    pub fn compile(&self, mode: MatchMode, root: &Path) -> Box<dyn PathFilter> {
        match mode {
            MatchMode::Simple => Box::new(RuleSet::new(self)),
            MatchMode::Gitignore => Box::new(GitignoreFilter::new(root, self)),
        }
    }
}

fn clean_line(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let line = if line.ends_with("\\ ") {
        line
    } else {
        line.trim_end()
    };
    if line.trim().is_empty() || line.starts_with('#') {
        None
    } else {
        Some(line.to_string())
    }
}

/// How a single rule compares against a path component
#[derive(Debug)]
enum RuleMatcher {
    Literal(String),
    Glob(GlobMatcher),
}

/// One compiled pattern of the simplified grammar
#[derive(Debug)]
struct IgnoreRule {
    matcher: RuleMatcher,
    /// Compare against the full relative path instead of the final component
    anchored: bool,
    /// Only match directories
    dir_only: bool,
}

#[derive(Debug)]
enum RuleError {
    Negation,
    Empty,
    Glob(globset::Error),
}

impl IgnoreRule {
    fn compile(pattern: &str) -> std::result::Result<Self, RuleError> {
        if pattern.starts_with('!') {
            return Err(RuleError::Negation);
        }

        let mut body = pattern
            .strip_prefix('\\')
            .filter(|rest| rest.starts_with('#') || rest.starts_with('!'))
            .unwrap_or(pattern);

        let dir_only = body.ends_with('/');
        body = body.trim_end_matches('/');

        let rooted = body.starts_with('/');
        body = body.trim_start_matches('/');
        if body.is_empty() {
            return Err(RuleError::Empty);
        }

        let mut anchored = rooted || body.contains('/');
        if !rooted {
            if let Some(rest) = body.strip_prefix("**/") {
                if !rest.contains('/') {
                    body = rest;
                    anchored = false;
                }
            }
        }

        let matcher = if body.contains(['*', '?', '[', '\\']) {
            let glob = GlobBuilder::new(body)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
                .map_err(RuleError::Glob)?;
            RuleMatcher::Glob(glob.compile_matcher())
        } else {
            RuleMatcher::Literal(body.to_string())
        };

        Ok(Self {
            matcher,
            anchored,
            dir_only,
        })
    }

    fn matches_node(&self, relative: &str, name: &str, is_directory: bool) -> bool {
        if self.dir_only && !is_directory {
            return false;
        }
        let subject = if self.anchored { relative } else { name };
        match &self.matcher {
            RuleMatcher::Literal(literal) => literal == subject,
            RuleMatcher::Glob(glob) => glob.is_match(subject),
        }
    }
}

/// Filter for the simplified ignore grammar
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<IgnoreRule>,
}

impl RuleSet {
    /// Compile every usable pattern of `rules`
    ///
    /// Negated and malformed patterns are skipped with a warning.
    pub fn new(rules: &IgnoreRuleSet) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        for pattern in rules.patterns() {
            match IgnoreRule::compile(pattern) {
                Ok(rule) => compiled.push(rule),
                Err(RuleError::Negation) => {
                    warn!("Negated ignore pattern '{}' is not supported; skipping", pattern)
                }
                Err(RuleError::Empty) => debug!("Ignoring empty pattern '{}'", pattern),
                Err(RuleError::Glob(e)) => warn!("Invalid ignore pattern '{}': {}", pattern, e),
            }
        }
        Self { rules: compiled }
    }

    /// Number of compiled rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rule compiled
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl PathFilter for RuleSet {
    fn matches(&self, path: &Path, is_directory: bool) -> bool {
        if self.rules.is_empty() {
            return false;
        }

        let names: Vec<String> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        let mut relative = String::new();
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                relative.push('/');
            }
            relative.push_str(name);
            // Every ancestor is a directory; only the last component uses the flag.
            let node_is_dir = i + 1 < names.len() || is_directory;
            if self
                .rules
                .iter()
                .any(|rule| rule.matches_node(&relative, name, node_is_dir))
            {
                return true;
            }
        }
        false
    }
}

/// Filter with full `.gitignore` semantics backed by the `ignore` crate
#[derive(Debug)]
pub struct GitignoreFilter {
    matcher: Gitignore,
}

impl GitignoreFilter {
    /// Build the matcher for a repository rooted at `root`
    pub fn new(root: &Path, rules: &IgnoreRuleSet) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in rules.patterns() {
            if let Err(e) = builder.add_line(None, pattern) {
                warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }
        let matcher = builder.build().unwrap_or_else(|e| {
            warn!("Failed to build gitignore matcher: {}", e);
            Gitignore::empty()
        });
        Self { matcher }
    }
}

impl PathFilter for GitignoreFilter {
    fn matches(&self, path: &Path, is_directory: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(path, is_directory)
            .is_ignore()
    }
}
