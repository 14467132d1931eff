//! Error types for archive canonicalization.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when opening, parsing, rebuilding, or verifying ZIP and 7z
//! archives, along with a convenient [`Result<T>`] type alias.
//!
//! # Error Categories
//!
//! Errors fall into several categories:
//!
//! | Category | Variants | Typical Cause |
//! |----------|----------|---------------|
//! | Open | [`FileNotFound`][Error::FileNotFound], [`TimestampMismatch`][Error::TimestampMismatch], [`Locked`][Error::Locked], [`OpeningFailed`][Error::OpeningFailed], [`PathTooLong`][Error::PathTooLong], [`AlreadyOpen`][Error::AlreadyOpen] | File system state |
//! | Structural | [`SignatureError`][Error::SignatureError], [`CentralDirError`][Error::CentralDirError], [`LocalFileHeaderError`][Error::LocalFileHeaderError], [`EndOfCentralDirError`][Error::EndOfCentralDirError], [`Zip64Error`][Error::Zip64Error], [`UnsupportedCompression`][Error::UnsupportedCompression] | Malformed archive data |
//! | Integrity | [`CrcMismatch`][Error::CrcMismatch] | Corrupted entry data |
//! | I/O | [`Io`][Error::Io], [`DecodeError`][Error::DecodeError] | Read/write failures mid-stream |
//!
//! Structural and open errors abort the current archive operation
//! immediately; they are never silently downgraded.

use std::io;

/// The main error type for archive operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The archive file does not exist.
    #[error("file not found: {path}")]
    FileNotFound {
        /// The path that was not found.
        path: String,
    },

    /// The archive's last-write time does not match the expected value.
    ///
    /// Callers that cache entry metadata pass the timestamp observed at
    /// scan time; the open fails if the file changed underneath them.
    #[error("timestamp mismatch for {path}")]
    TimestampMismatch {
        /// The path whose timestamp changed.
        path: String,
    },

    /// The archive file is locked by another process.
    #[error("file locked: {path}")]
    Locked {
        /// The locked path.
        path: String,
    },

    /// The archive could not be opened for an OS-level reason other than
    /// the ones above.
    #[error("error opening file: {path}")]
    OpeningFailed {
        /// The path that failed to open.
        path: String,
    },

    /// The archive path exceeds the platform path length limit.
    #[error("path too long: {path}")]
    PathTooLong {
        /// The over-long path.
        path: String,
    },

    /// The archive instance is already open.
    #[error("archive already open")]
    AlreadyOpen,

    /// The file's magic bytes do not match the expected container
    /// signature.
    #[error("bad archive signature")]
    SignatureError,

    /// The ZIP central directory (or a 7z header section) is malformed.
    #[error("central directory error: {0}")]
    CentralDirError(String),

    /// A ZIP local file header is malformed or disagrees with its central
    /// directory record.
    #[error("local file header error: {0}")]
    LocalFileHeaderError(String),

    /// The ZIP end-of-central-directory record is malformed.
    #[error("end of central directory error: {0}")]
    EndOfCentralDirError(String),

    /// A Zip64 record (end-of-central-directory or locator) is malformed.
    #[error("Zip64 record error: {0}")]
    Zip64Error(String),

    /// An entry uses a compression method this build cannot decode.
    #[error("unsupported compression method {method_id:#x}")]
    UnsupportedCompression {
        /// The offending method identifier (ZIP method or 7z coder id).
        method_id: u64,
    },

    /// A recomputed CRC-32 does not match the stored value.
    #[error("{}", CrcMismatchDisplay { entry_name: entry_name.as_deref(), expected: *expected, actual: *actual })]
    CrcMismatch {
        /// The entry name, if known.
        entry_name: Option<String>,
        /// The CRC stored in the archive.
        expected: u32,
        /// The CRC computed from the decoded bytes.
        actual: u32,
    },

    /// Decoding an entry's compressed stream failed.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// There is no write entry to roll back.
    #[error("no entry to roll back")]
    RollBackError,

    /// A read operation was attempted on an archive open for writing.
    #[error("archive is open for writing")]
    ReadingFromWriteArchive,

    /// A write operation was attempted on an archive open for reading.
    #[error("archive is open for reading")]
    WritingToReadArchive,
}

struct CrcMismatchDisplay<'a> {
    entry_name: Option<&'a str>,
    expected: u32,
    actual: u32,
}

impl std::fmt::Display for CrcMismatchDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CRC mismatch")?;
        if let Some(name) = self.entry_name {
            write!(f, " for {}", name)?;
        }
        write!(
            f,
            ": expected {:#010x}, got {:#010x}",
            self.expected, self.actual
        )
    }
}

impl Error {
    /// Returns `true` for errors in the open category: the archive file
    /// could not be opened at all.
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            Error::FileNotFound { .. }
                | Error::TimestampMismatch { .. }
                | Error::Locked { .. }
                | Error::OpeningFailed { .. }
                | Error::PathTooLong { .. }
                | Error::AlreadyOpen
        )
    }

    /// Returns `true` for structural errors: the container bytes are
    /// malformed or use an unsupported feature.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::SignatureError
                | Error::CentralDirError(_)
                | Error::LocalFileHeaderError(_)
                | Error::EndOfCentralDirError(_)
                | Error::Zip64Error(_)
                | Error::UnsupportedCompression { .. }
        )
    }

    /// Returns `true` if this is a data corruption error.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CrcMismatch { .. } | Error::DecodeError(_))
    }

    /// Creates a CrcMismatch error.
    pub fn crc_mismatch(entry_name: Option<String>, expected: u32, actual: u32) -> Self {
        Error::CrcMismatch {
            entry_name,
            expected,
            actual,
        }
    }
}

/// A specialized Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
