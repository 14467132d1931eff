//! Container dispatch over the two archive kinds.
//!
//! ZIP and 7z implement one capability set (open, entry metadata, read
//! streams, deep scan, close); [`Container`] selects the codec by file
//! extension and dispatches. An open container owns its file handle
//! exclusively and is not safe to share across threads.

use std::io::{self, Read};
use std::path::Path;

use filetime::FileTime;

use crate::sevenzip::{SevenZipArchive, SevenZipReadStream};
use crate::status::{FileVerdict, ZipStatus};
use crate::zip::{ZipArchive, ZipReadStream};
use crate::{Error, Result};

/// An opened archive of either kind.
#[derive(Debug)]
pub enum Container {
    /// A ZIP archive.
    Zip(ZipArchive),
    /// A 7z archive.
    SevenZip(SevenZipArchive),
}

/// Metadata for one entry, independent of container kind.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    /// Entry name with forward-slash separators.
    pub name: String,
    /// Uncompressed size in bytes.
    pub uncompressed_size: u64,
    /// Stored CRC-32.
    pub crc: u32,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Verification state.
    pub status: FileVerdict,
}

impl Container {
    /// Opens an archive, selecting the codec by file extension (`.7z`
    /// for 7z, anything else ZIP).
    pub fn open(
        path: &Path,
        expected_timestamp: Option<FileTime>,
        read_headers: bool,
    ) -> Result<Self> {
        if is_sevenzip_path(path) {
            Ok(Container::SevenZip(SevenZipArchive::open(
                path,
                expected_timestamp,
                read_headers,
            )?))
        } else {
            Ok(Container::Zip(ZipArchive::open(
                path,
                expected_timestamp,
                read_headers,
            )?))
        }
    }

    /// The archive's file path.
    pub fn path(&self) -> &Path {
        match self {
            Container::Zip(a) => a.path(),
            Container::SevenZip(a) => a.path(),
        }
    }

    /// Canonical status determined at open time.
    pub fn status(&self) -> ZipStatus {
        match self {
            Container::Zip(a) => a.status(),
            Container::SevenZip(a) => a.status(),
        }
    }

    /// Number of entries.
    pub fn entry_count(&self) -> usize {
        match self {
            Container::Zip(a) => a.entry_count(),
            Container::SevenZip(a) => a.entry_count(),
        }
    }

    /// Metadata for one entry.
    pub fn entry_meta(&self, index: usize) -> EntryMeta {
        match self {
            Container::Zip(a) => {
                let e = a.entry(index);
                EntryMeta {
                    name: e.name.clone(),
                    uncompressed_size: e.uncompressed_size,
                    crc: e.crc,
                    is_directory: e.is_directory(),
                    status: e.status,
                }
            }
            Container::SevenZip(a) => {
                let e = a.entry(index);
                EntryMeta {
                    name: e.name.clone(),
                    uncompressed_size: e.uncompressed_size,
                    crc: e.crc,
                    is_directory: e.is_directory,
                    status: e.status,
                }
            }
        }
    }

    /// Opens a decompressing read stream for one entry.
    pub fn open_read_stream(
        &mut self,
        index: usize,
    ) -> Result<(ContainerReadStream<'_>, u64)> {
        match self {
            Container::Zip(a) => {
                let (stream, size) = a.open_read_stream(index, false)?;
                Ok((ContainerReadStream::Zip(stream), size))
            }
            Container::SevenZip(a) => {
                let (stream, size) = a.open_read_stream(index)?;
                Ok((ContainerReadStream::SevenZip(stream), size))
            }
        }
    }

    /// Runs the verification pipeline over every entry.
    pub fn deep_scan(&mut self) {
        match self {
            Container::Zip(a) => a.deep_scan(),
            Container::SevenZip(a) => a.deep_scan(),
        }
    }

    /// Closes the archive.
    pub fn close(&mut self) -> Result<()> {
        match self {
            Container::Zip(a) => a.close(),
            Container::SevenZip(a) => a.close(),
        }
    }
}

/// A read stream over one entry, either kind.
pub enum ContainerReadStream<'a> {
    /// ZIP entry stream.
    Zip(ZipReadStream<'a>),
    /// 7z entry stream.
    SevenZip(SevenZipReadStream<'a>),
}

impl Read for ContainerReadStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ContainerReadStream::Zip(s) => s.read(buf),
            ContainerReadStream::SevenZip(s) => s.read(buf),
        }
    }
}

/// Returns `true` when the path names a file this crate processes
/// (`.zip` or `.7z`, case-insensitive).
pub fn is_supported_path(path: &Path) -> bool {
    matches!(
        extension_lower(path).as_deref(),
        Some("zip") | Some("7z")
    )
}

fn is_sevenzip_path(path: &Path) -> bool {
    extension_lower(path).as_deref() == Some("7z")
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Maps an open/structural error into a short human-readable message for
/// per-file reporting.
pub fn describe_open_failure(error: &Error) -> &'static str {
    match error {
        Error::FileNotFound { .. } => "file not found",
        Error::TimestampMismatch { .. } => "file changed on disk",
        Error::Locked { .. } => "file is locked",
        Error::UnsupportedCompression { .. } => "unsupported compression method",
        _ => "archive is corrupt",
    }
}
