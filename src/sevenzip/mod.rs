//! 7z container codec.
//!
//! [`SevenZipArchive`] reads 7z archives: the fixed signature header, the
//! (possibly LZMA-encoded) metadata header, and entry data through
//! resolved folder decode graphs. The write path produces version 0.3
//! archives with either one shared LZMA stream for all entries or one
//! store-only folder per entry.

pub mod files;
pub mod graph;
pub mod header;
pub mod reader;
pub mod signature;
pub mod streams;
pub mod torrent7z;
pub mod write;

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::fsutil;
use crate::status::{FileVerdict, ZipStatus};
use crate::zip::OpenMode;
use crate::{Error, Result};

use graph::ByteStream;
use header::ArchiveHeader;
use signature::{SIGNATURE_HEADER_SIZE, SignatureHeader};
use streams::StreamsInfo;

/// Property tags used in 7z headers.
pub mod property_id {
    /// End of section marker.
    pub const END: u8 = 0x00;
    /// Plain header.
    pub const HEADER: u8 = 0x01;
    /// Archive properties.
    pub const ARCHIVE_PROPERTIES: u8 = 0x02;
    /// Additional streams info.
    pub const ADDITIONAL_STREAMS_INFO: u8 = 0x03;
    /// Main streams info.
    pub const MAIN_STREAMS_INFO: u8 = 0x04;
    /// Files info.
    pub const FILES_INFO: u8 = 0x05;
    /// Pack info.
    pub const PACK_INFO: u8 = 0x06;
    /// Unpack info.
    pub const UNPACK_INFO: u8 = 0x07;
    /// Substreams info.
    pub const SUBSTREAMS_INFO: u8 = 0x08;
    /// Size table.
    pub const SIZE: u8 = 0x09;
    /// CRC table.
    pub const CRC: u8 = 0x0A;
    /// Folder definitions.
    pub const FOLDER: u8 = 0x0B;
    /// Coder unpack sizes.
    pub const CODERS_UNPACK_SIZE: u8 = 0x0C;
    /// Unpack stream counts per folder.
    pub const NUM_UNPACK_STREAM: u8 = 0x0D;
    /// Empty stream flags.
    pub const EMPTY_STREAM: u8 = 0x0E;
    /// Empty file flags.
    pub const EMPTY_FILE: u8 = 0x0F;
    /// Anti-item flags.
    pub const ANTI: u8 = 0x10;
    /// File names.
    pub const NAME: u8 = 0x11;
    /// Creation times.
    pub const CTIME: u8 = 0x12;
    /// Access times.
    pub const ATIME: u8 = 0x13;
    /// Modification times.
    pub const MTIME: u8 = 0x14;
    /// Windows attributes.
    pub const WIN_ATTRIBUTES: u8 = 0x15;
    /// Comment.
    pub const COMMENT: u8 = 0x16;
    /// Encoded header.
    pub const ENCODED_HEADER: u8 = 0x17;
    /// Start position.
    pub const START_POS: u8 = 0x18;
    /// Padding.
    pub const DUMMY: u8 = 0x19;
}

/// One logical entry of a 7z archive.
#[derive(Debug, Clone, Default)]
pub struct SevenZipEntry {
    /// Entry name with forward-slash separators; directories carry a
    /// trailing slash.
    pub name: String,
    /// Uncompressed size.
    pub uncompressed_size: u64,
    /// Stored CRC-32 of the uncompressed bytes.
    pub crc: u32,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Folder holding this entry's data (entries with the empty-stream
    /// flag have none).
    pub folder_index: Option<usize>,
    /// Decompressed offset of this entry within its folder.
    pub stream_offset: u64,
    /// Verification state, advanced by deep scans.
    pub status: FileVerdict,
    /// MD5 digest, populated by deep scans only.
    pub md5: Option<[u8; 16]>,
    /// SHA-1 digest, populated by deep scans only.
    pub sha1: Option<[u8; 20]>,
}

/// A reader that counts decompressed bytes handed out, tracking the
/// current position within an open folder stream.
pub struct CountingReader {
    inner: ByteStream,
    consumed: u64,
}

impl CountingReader {
    fn new(inner: ByteStream) -> Self {
        Self { inner, consumed: 0 }
    }
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

/// An open folder decode session. Accesses within the same folder at or
/// past the current position reuse the session; anything else re-resolves
/// the graph from the start.
struct OpenFolder {
    folder_index: usize,
    stream: CountingReader,
}

/// A 7z archive, open for reading or writing.
pub struct SevenZipArchive {
    path: PathBuf,
    last_write_time: Option<FileTime>,
    file: Option<File>,
    open_mode: OpenMode,
    status: ZipStatus,
    entries: Vec<SevenZipEntry>,
    streams_info: Option<StreamsInfo>,
    open_folder: Option<OpenFolder>,
    writer: Option<write::WriterState>,
}

impl std::fmt::Debug for SevenZipArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SevenZipArchive")
            .field("path", &self.path)
            .field("last_write_time", &self.last_write_time)
            .field("open_mode", &self.open_mode)
            .field("status", &self.status)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl SevenZipArchive {
    /// Opens an archive for reading.
    ///
    /// See [`crate::zip::ZipArchive::open`] for the timestamp staleness
    /// contract. With `read_headers` set, the metadata header is parsed,
    /// entries are populated, and the torrent7z marker is checked.
    pub fn open(
        path: &Path,
        expected_timestamp: Option<FileTime>,
        read_headers: bool,
    ) -> Result<Self> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(Error::FileNotFound { path: display });
        }

        let last_write_time = fsutil::last_write_time(path)?;
        if let Some(expected) = expected_timestamp
            && expected != last_write_time
        {
            return Err(Error::TimestampMismatch { path: display });
        }

        let mut file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::FileNotFound {
                path: display.clone(),
            },
            io::ErrorKind::PermissionDenied => Error::Locked {
                path: display.clone(),
            },
            _ => Error::OpeningFailed {
                path: display.clone(),
            },
        })?;

        let mut archive = Self {
            path: path.to_path_buf(),
            last_write_time: Some(last_write_time),
            file: None,
            open_mode: OpenMode::Read,
            status: ZipStatus::None,
            entries: Vec::new(),
            streams_info: None,
            open_folder: None,
            writer: None,
        };

        if !read_headers {
            archive.file = Some(file);
            return Ok(archive);
        }

        file.seek(SeekFrom::Start(0))?;
        let signature = SignatureHeader::parse(&mut file)?;
        let parsed = header::read_archive_header(&mut file, &signature)?;

        if torrent7z::detect(&mut file)? {
            archive.status = ZipStatus::TrrntZip;
        }

        archive.entries = populate_entries(&parsed)?;
        archive.streams_info = parsed.streams_info;
        archive.file = Some(file);

        log::debug!(
            "opened {}: {} entries, status {:?}",
            archive.path.display(),
            archive.entries.len(),
            archive.status
        );

        Ok(archive)
    }

    /// The archive's file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last-write time observed when the archive was opened.
    pub fn timestamp(&self) -> Option<FileTime> {
        self.last_write_time
    }

    /// Current open state.
    pub fn open_mode(&self) -> OpenMode {
        self.open_mode
    }

    /// Canonical status determined at open time.
    pub fn status(&self) -> ZipStatus {
        self.status
    }

    /// Number of entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Borrow one entry's metadata.
    pub fn entry(&self, index: usize) -> &SevenZipEntry {
        &self.entries[index]
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut SevenZipEntry {
        &mut self.entries[index]
    }

    /// Opens a decompressing read stream for one entry.
    ///
    /// Repeated accesses within an already-decoded folder reuse the open
    /// decode session when the requested offset is not behind the current
    /// position; otherwise the folder graph is resolved afresh.
    pub fn open_read_stream(&mut self, index: usize) -> Result<(SevenZipReadStream<'_>, u64)> {
        if self.open_mode != OpenMode::Read {
            return Err(Error::ReadingFromWriteArchive);
        }

        let entry = &self.entries[index];
        if entry.is_directory {
            return Err(Error::DecodeError(format!(
                "cannot open a stream for directory {}",
                entry.name
            )));
        }

        let (size, stream_offset) = (entry.uncompressed_size, entry.stream_offset);
        let Some(folder_index) = entry.folder_index else {
            // Empty-stream entry: zero bytes by definition
            return Ok((SevenZipReadStream::Empty, 0));
        };

        let reusable = self
            .open_folder
            .as_ref()
            .is_some_and(|of| of.folder_index == folder_index && stream_offset >= of.stream.consumed);

        if !reusable {
            self.open_folder = None;
            let stream = self.resolve_folder_stream(folder_index)?;
            self.open_folder = Some(OpenFolder {
                folder_index,
                stream: CountingReader::new(stream),
            });
        }

        let of = self.open_folder.as_mut().expect("open folder just ensured");
        let already_consumed = of.stream.consumed;
        skip_forward(&mut of.stream, stream_offset - already_consumed)?;

        Ok((SevenZipReadStream::Folder((&mut of.stream).take(size)), size))
    }

    /// Opens fresh packed-stream readers for a folder and resolves its
    /// decode graph.
    fn resolve_folder_stream(&self, folder_index: usize) -> Result<ByteStream> {
        let streams_info = self
            .streams_info
            .as_ref()
            .ok_or_else(|| Error::DecodeError("archive has no stream data".into()))?;
        let folder = streams_info
            .folders
            .get(folder_index)
            .ok_or_else(|| Error::DecodeError("folder index out of range".into()))?;

        let mut packed: Vec<ByteStream> = Vec::with_capacity(folder.packed_stream_indices.len());
        for i in 0..folder.packed_stream_indices.len() {
            let global = folder.packed_stream_base + i;
            let info = streams_info.packed_streams.get(global).ok_or_else(|| {
                Error::DecodeError("packed stream index out of range".into())
            })?;

            // Each packed stream gets its own handle: multi-input coders
            // read their streams interleaved
            let mut handle = File::open(&self.path)?;
            handle.seek(SeekFrom::Start(
                SIGNATURE_HEADER_SIZE + streams_info.pack_position + info.position,
            ))?;
            packed.push(Box::new(BufReader::new(handle.take(info.packed_size))));
        }

        graph::resolve_folder(folder, packed)
    }

    /// Runs the verification pipeline over every entry, recording
    /// per-entry verdicts and MD5/SHA-1 digests.
    pub fn deep_scan(&mut self) {
        for index in 0..self.entries.len() {
            if self.entries[index].is_directory || self.entries[index].uncompressed_size == 0 {
                let empty = crate::verify::EntryHashes::empty();
                let entry = self.entry_mut(index);
                entry.md5 = Some(empty.md5);
                entry.sha1 = Some(empty.sha1);
                entry.status = FileVerdict::Good;
                continue;
            }

            let stored_crc = self.entries[index].crc;
            let hashed = match self.open_read_stream(index) {
                Ok((stream, _)) => crate::verify::hash_stream(stream).ok(),
                Err(_) => None,
            };

            let entry = self.entry_mut(index);
            match hashed {
                Some((hashes, _)) => {
                    entry.md5 = Some(hashes.md5);
                    entry.sha1 = Some(hashes.sha1);
                    entry.status = if hashes.crc32 == stored_crc {
                        FileVerdict::Good
                    } else {
                        FileVerdict::CrcError
                    };
                }
                None => entry.status = FileVerdict::DecodeError,
            }
        }
    }

    /// Closes the archive. In write mode this serializes the header and
    /// patches the signature header.
    pub fn close(&mut self) -> Result<()> {
        match self.open_mode {
            OpenMode::Closed => Ok(()),
            OpenMode::Read => {
                self.open_folder = None;
                self.file = None;
                self.open_mode = OpenMode::Closed;
                Ok(())
            }
            OpenMode::Write => self.close_writing(),
        }
    }
}

/// A read stream over one 7z entry's decompressed bytes.
pub enum SevenZipReadStream<'a> {
    /// A length-limited view into the open folder decode session.
    Folder(io::Take<&'a mut CountingReader>),
    /// An empty-stream entry.
    Empty,
}

impl Read for SevenZipReadStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SevenZipReadStream::Folder(s) => s.read(buf),
            SevenZipReadStream::Empty => Ok(0),
        }
    }
}

/// Builds the entry table from a parsed header.
///
/// Entries with the empty-stream flag carry no folder data; among those,
/// entries without the empty-file flag are directories (their names gain
/// a trailing slash if absent).
fn populate_entries(header: &ArchiveHeader) -> Result<Vec<SevenZipEntry>> {
    let Some(files_info) = header.files_info.as_ref() else {
        return Ok(Vec::new());
    };
    let empty_folders: Vec<streams::Folder> = Vec::new();
    let folders = header
        .streams_info
        .as_ref()
        .map_or(empty_folders.as_slice(), |si| si.folders.as_slice());

    let mut entries = Vec::with_capacity(files_info.names.len());
    let mut folder_index = 0usize;
    let mut substream_index = 0usize;
    let mut stream_offset = 0u64;
    let mut empty_index = 0usize;

    for (i, name) in files_info.names.iter().enumerate() {
        let mut entry = SevenZipEntry {
            name: name.clone(),
            ..SevenZipEntry::default()
        };

        if !files_info.empty_stream_flags.get(i).copied().unwrap_or(false) {
            let folder = folders.get(folder_index).ok_or_else(|| {
                Error::CentralDirError("more file streams than folder substreams".into())
            })?;
            let substream = folder.substreams.get(substream_index).ok_or_else(|| {
                Error::CentralDirError("substream index out of range".into())
            })?;

            entry.uncompressed_size = substream.size;
            entry.crc = substream.crc.unwrap_or(0);
            entry.folder_index = Some(folder_index);
            entry.stream_offset = stream_offset;

            stream_offset += substream.size;
            substream_index += 1;
            if substream_index >= folder.substreams.len() {
                folder_index += 1;
                substream_index = 0;
                stream_offset = 0;
            }
        } else {
            let is_file = files_info.empty_file_flags.get(empty_index).copied().unwrap_or(false);
            empty_index += 1;
            entry.is_directory = !is_file;
            if entry.is_directory && !entry.name.ends_with('/') {
                entry.name.push('/');
            }
        }

        entries.push(entry);
    }

    Ok(entries)
}

/// Reads and discards `count` bytes.
fn skip_forward<R: Read>(reader: &mut R, count: u64) -> Result<()> {
    let mut remaining = count;
    let mut scratch = [0u8; 8192];
    while remaining > 0 {
        let chunk = scratch.len().min(remaining as usize);
        let n = reader.read(&mut scratch[..chunk])?;
        if n == 0 {
            return Err(Error::DecodeError(
                "decoded folder stream ended early".into(),
            ));
        }
        remaining -= n as u64;
    }
    Ok(())
}
