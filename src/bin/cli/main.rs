//! CLI tool for canonicalizing ZIP/7z archives.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use walkdir::WalkDir;

use trrntzip::{Canonicalizer, Options, TrrntZipStatus, is_supported_path};

/// Normalize ZIP and 7z archives into canonical TorrentZip form
#[derive(Parser)]
#[command(name = "trrntzip")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Archives or directories to process
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Do not recurse into subdirectories
    #[arg(short = 's', long)]
    no_recursion: bool,

    /// Force a rebuild even for archives that are already canonical
    #[arg(short = 'f', long)]
    force: bool,

    /// Check files only, never rewrite
    #[arg(short = 'c', long)]
    check_only: bool,

    /// Verbose logging
    #[arg(short = 'l', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let options = Options {
        force_rebuild: cli.force,
        check_only: cli.check_only,
        verbose: cli.verbose,
    };

    let canonicalizer = Canonicalizer::new(options)
        .with_status_callback(Box::new(|percent| {
            print!("{percent:3}% ");
            let _ = std::io::stdout().flush();
        }))
        .with_log_callback(Box::new(|line| println!("{line}")));

    let mut failures = 0usize;
    for path in &cli.paths {
        if path.is_dir() {
            failures += process_dir(&canonicalizer, path, cli.no_recursion);
        } else if is_supported_path(path) {
            failures += process_file(&canonicalizer, path);
        } else {
            eprintln!("skipping {}: not a .zip or .7z file", path.display());
        }
    }

    if failures > 0 {
        eprintln!("{failures} file(s) failed");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Processes one archive; returns 1 on failure, 0 otherwise.
fn process_file(canonicalizer: &Canonicalizer, path: &Path) -> usize {
    match canonicalizer.process(path) {
        Ok(status) if status.contains(TrrntZipStatus::CORRUPT_ZIP) => 1,
        Ok(_) => 0,
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            1
        }
    }
}

/// Walks a directory for archives; a failed file is reported and the
/// walk continues.
fn process_dir(canonicalizer: &Canonicalizer, dir: &Path, no_recursion: bool) -> usize {
    println!("Checking Dir : {}", dir.display());

    let mut walker = WalkDir::new(dir).sort_by_file_name();
    if no_recursion {
        walker = walker.max_depth(1);
    }

    let mut failures = 0usize;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                eprintln!("walk error: {e}");
                continue;
            }
        };
        if entry.file_type().is_file() && is_supported_path(entry.path()) {
            failures += process_file(canonicalizer, entry.path());
        }
    }
    failures
}
