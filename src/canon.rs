//! Canonical-form checking and the per-archive processing entry point.
//!
//! Canonical order is ascending byte-wise comparison with uppercase ASCII
//! `A..Z` folded to lowercase for comparison only. A directory entry is
//! redundant when the archive also holds an entry inside it; redundant
//! directories are dropped from the rebuild set, empty directories are
//! kept.
//!
//! [`Canonicalizer::process`] drives the whole state machine for one
//! archive: open, validate, and rebuild when needed. Configuration is an
//! explicit [`Options`] value; progress and log lines go through injected
//! callbacks.

use std::cmp::Ordering;
use std::path::Path;

use crate::container::{self, Container};
use crate::status::{TrrntZipStatus, ZipStatus};
use crate::{Result, rebuild};

/// Compares two entry names in canonical order.
///
/// Byte-wise on the names' characters, folding only `A..Z` to lowercase;
/// shorter strings order before their extensions.
pub fn torrentzip_name_cmp(a: &str, b: &str) -> Ordering {
    let fold = |c: char| -> u32 {
        let v = c as u32;
        if (65..=90).contains(&v) { v + 0x20 } else { v }
    };

    let mut a_chars = a.chars();
    let mut b_chars = b.chars();
    loop {
        match (a_chars.next(), b_chars.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match fold(x).cmp(&fold(y)) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
}

/// Returns `true` when `name` starts with `prefix` under the canonical
/// fold.
pub fn is_prefix_fold(prefix: &str, name: &str) -> bool {
    let fold = |c: char| -> u32 {
        let v = c as u32;
        if (65..=90).contains(&v) { v + 0x20 } else { v }
    };

    let mut name_chars = name.chars();
    prefix
        .chars()
        .all(|p| name_chars.next().is_some_and(|n| fold(p) == fold(n)))
}

/// One entry row as seen by the canonicalizer.
#[derive(Debug, Clone)]
pub struct ZippedEntry {
    /// Index into the source archive.
    pub index: usize,
    /// Entry name.
    pub name: String,
    /// Uncompressed size.
    pub size: u64,
    /// Stored CRC-32.
    pub crc: u32,
}

impl ZippedEntry {
    /// Whether this row names a directory.
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Sorts the rows into canonical order and drops redundant directory
/// entries, reporting what had to change.
pub fn check_entries(entries: &mut Vec<ZippedEntry>) -> TrrntZipStatus {
    let mut status = TrrntZipStatus::UNKNOWN;

    let sorted = entries
        .windows(2)
        .all(|pair| torrentzip_name_cmp(&pair[0].name, &pair[1].name) != Ordering::Greater);
    if !sorted {
        entries.sort_by(|a, b| torrentzip_name_cmp(&a.name, &b.name));
        status |= TrrntZipStatus::UNSORTED;
    }

    // After sorting, everything inside a directory sits immediately
    // after its entry, so the adjacent pair is enough to spot redundancy
    let mut keep = vec![true; entries.len()];
    for i in 0..entries.len().saturating_sub(1) {
        if entries[i].is_directory()
            && entries[i + 1].name.len() > entries[i].name.len()
            && is_prefix_fold(&entries[i].name, &entries[i + 1].name)
        {
            keep[i] = false;
            status |= TrrntZipStatus::EXTRA_DIRECTORY;
        }
    }
    if status.contains(TrrntZipStatus::EXTRA_DIRECTORY) {
        let mut keep_iter = keep.into_iter();
        entries.retain(|_| keep_iter.next().unwrap_or(true));
    }

    status
}

/// Configuration for one canonicalization run.
///
/// Passed explicitly into [`Canonicalizer`]; nothing here is ambient
/// state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Rebuild even when the archive is already canonical.
    pub force_rebuild: bool,
    /// Verify only; never rewrite anything.
    pub check_only: bool,
    /// Emit extra per-file log lines.
    pub verbose: bool,
}

/// Per-archive progress callback (percent complete, 0-100).
pub type StatusCallback = Box<dyn Fn(u32) + Send + Sync>;
/// Human-readable log line callback.
pub type LogCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Drives canonicalization of individual archives.
pub struct Canonicalizer {
    options: Options,
    status_callback: Option<StatusCallback>,
    log_callback: Option<LogCallback>,
}

impl Canonicalizer {
    /// Creates a canonicalizer with the given options.
    pub fn new(options: Options) -> Self {
        Self {
            options,
            status_callback: None,
            log_callback: None,
        }
    }

    /// Installs a percent-complete callback.
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.status_callback = Some(callback);
        self
    }

    /// Installs a log line callback.
    pub fn with_log_callback(mut self, callback: LogCallback) -> Self {
        self.log_callback = Some(callback);
        self
    }

    fn log(&self, line: &str) {
        if let Some(cb) = &self.log_callback {
            cb(line);
        }
    }

    /// Processes one archive through the canonical state machine:
    /// `Unknown -> {ValidCanonical, CorruptArchive, NotCanonical}`, with
    /// a rebuild for the non-canonical case.
    ///
    /// A corrupt archive is reported and left untouched. An archive that
    /// is already canonical (and not forced) is a no-op.
    pub fn process(&self, path: &Path) -> Result<TrrntZipStatus> {
        if self.options.verbose {
            self.log("");
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.log(&format!("{name} - "));

        // Open and parse; a parse failure is terminal for this archive
        let expected = crate::fsutil::last_write_time(path).ok();
        let mut archive = match Container::open(path, expected, true) {
            Ok(archive) => archive,
            Err(e) => {
                log::warn!("{}: {e}", path.display());
                self.log(container::describe_open_failure(&e));
                return Ok(TrrntZipStatus::CORRUPT_ZIP);
            }
        };

        let mut status = TrrntZipStatus::UNKNOWN;
        if archive.status() == ZipStatus::TrrntZip {
            status |= TrrntZipStatus::VALID_TRRNTZIP;
        }

        // The claimed marker is never trusted alone: entry metadata is
        // re-validated independently
        let mut rows: Vec<ZippedEntry> = (0..archive.entry_count())
            .map(|index| {
                let meta = archive.entry_meta(index);
                ZippedEntry {
                    index,
                    name: meta.name,
                    size: meta.uncompressed_size,
                    crc: meta.crc,
                }
            })
            .collect();
        status |= check_entries(&mut rows);

        if status == TrrntZipStatus::VALID_TRRNTZIP && !self.options.force_rebuild
            || self.options.check_only
        {
            self.log("Skipping File");
            archive.close()?;
            return Ok(status);
        }

        self.log("TorrentZipping");
        rebuild::rezip(&mut archive, &rows, self.status_callback.as_deref())
    }
}
