//! # git-snapshot CLI
//!
//! Command-line front end for the git-snapshot library.
//!
//! ## Usage
//! ```bash
//! # Snapshot the repository containing the current directory into <root>/snapshots
//! git-snapshot create
//!
//! # Snapshot another repository, with extra exclusions
//! git-snapshot create -s ~/work/my_repo -o ~/backups -i "*.sqlite"
//!
//! # Restore a snapshot into the current directory (creates ./my_repo)
//! git-snapshot restore ~/backups/my_repo_snapshot_20250720_143000.7z
//!
//! # Restore but keep the existing virtualenv
//! git-snapshot restore snap.7z -o ~/work --keep-venv
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use git_snapshot::utils::format_bytes;
use git_snapshot::{MatchMode, RestoreEngine, SnapshotEngine, SnapshotError};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Output directory for `create`, relative to the repository root
const DEFAULT_OUTPUT_DIR: &str = "snapshots";

/// git-snapshot - Archive a git repository and restore it safely
#[derive(Parser)]
#[command(name = "git-snapshot")]
#[command(version)]
#[command(about = "Snapshot a git repository into a .7z archive and restore it with rollback")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a snapshot of a repository
    Create {
        /// Repository (or a directory inside it) to snapshot
        #[arg(short, long, default_value = ".")]
        source: PathBuf,

        /// Directory the archive is written to [default: <repository root>/snapshots]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Additional ignore patterns
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Interpret .gitignore with full git semantics (negation, nested rules)
        #[arg(long)]
        gitignore_compat: bool,
    },

    /// Restore a snapshot, replacing the existing copy
    Restore {
        /// Snapshot archive to restore
        #[arg(value_name = "SNAPSHOT_FILE")]
        snapshot_file: PathBuf,

        /// Directory the repository is restored into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Keep the .venv directory instead of removing it
        #[arg(long)]
        keep_venv: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "git_snapshot=debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<SnapshotError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("cannot determine the current directory")?;

    match cli.command {
        Commands::Create {
            source,
            output,
            ignore,
            gitignore_compat,
        } => cmd_create(
            &cwd.join(source),
            output.map(|dir| cwd.join(dir)),
            ignore,
            gitignore_compat,
        ),
        Commands::Restore {
            snapshot_file,
            output,
            keep_venv,
        } => cmd_restore(&cwd.join(snapshot_file), &cwd.join(output), keep_venv),
    }
}

/// Create a snapshot archive
///
/// The repository root is found by walking up from `source`, so the command
/// works from any directory inside the repository. Without `--output` the
/// archive goes to `snapshots/` under that root.
fn cmd_create(
    source: &Path,
    output: Option<PathBuf>,
    ignore: Vec<String>,
    gitignore_compat: bool,
) -> anyhow::Result<()> {
    println!("{}", "Creating snapshot...".blue().bold());

    let mode = if gitignore_compat {
        MatchMode::Gitignore
    } else {
        MatchMode::Simple
    };
    let engine = ignore
        .into_iter()
        .fold(SnapshotEngine::new(), |engine, pattern| engine.with_ignore_pattern(pattern))
        .with_match_mode(mode)
        .discover_root(true);

    let output = match output {
        Some(dir) => dir,
        None => engine.resolve_root(source)?.join(DEFAULT_OUTPUT_DIR),
    };

    let pb = spinner("Collecting and compressing files...");
    let result = engine.create(source, &output);
    pb.finish_and_clear();
    let result = result?;

    println!(
        "{} Created snapshot {}",
        "✓".green().bold(),
        result.archive_path.display().to_string().yellow().bold()
    );
    println!("  Repository: {}", result.source_root.display().to_string().cyan());
    println!("  Files: {}", result.files.to_string().cyan());
    println!("  Directories: {}", result.directories.to_string().cyan());
    if result.symlinks > 0 {
        println!("  Links: {}", result.symlinks.to_string().cyan());
    }
    println!(
        "  Size: {} ({} compressed)",
        format_bytes(result.total_bytes).cyan(),
        format_bytes(result.archive_bytes).cyan()
    );
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );

    Ok(())
}

/// Restore a snapshot archive
///
/// Any existing copy of the repository in `output` is replaced. If extraction
/// fails, the previous copy is put back.
fn cmd_restore(archive: &Path, output: &Path, keep_venv: bool) -> anyhow::Result<()> {
    println!(
        "{} {}",
        "Restoring snapshot".blue().bold(),
        archive.display().to_string().yellow()
    );

    let pb = spinner("Extracting files...");
    let result = RestoreEngine::new().keep_venv(keep_venv).restore(archive, output);
    pb.finish_and_clear();
    let result = result?;

    println!("{} Restoration complete", "✓".green().bold());
    println!("  Restored into: {}", result.target.display().to_string().cyan());
    if result.backup_created {
        println!("  Replaced existing copy: {}", "yes".yellow());
    }
    if result.venv_removed {
        println!("  Removed: {}", ".venv".yellow());
    }
    if result.venv_preserved {
        println!("  Kept existing: {}", ".venv".cyan());
    }
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );

    if !result.warnings.is_empty() {
        println!("\n{}", "Warnings:".yellow().bold());
        for warning in &result.warnings {
            println!("  - {}", warning.yellow());
        }
    }

    Ok(())
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
