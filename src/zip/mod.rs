//! ZIP container codec.
//!
//! [`ZipArchive`] reads existing archives (locating the end-of-central-
//! directory record by backward scan, following Zip64 records when the
//! 32-bit fields saturate, and cross-validating every local file header
//! against its central-directory copy) and writes canonical archives
//! (maximum-compression deflate, fixed timestamps, and the 22-byte
//! `TORRENTZIPPED-` comment carrying the central directory's CRC-32).

pub mod records;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::checksum::{Crc32, Crc32Writer};
use crate::codec::{DeflateDecoder, DeflateEncoder};
use crate::fsutil;
use crate::status::{FileVerdict, ZipStatus};
use crate::{Error, Result};

use records::{
    END_OF_CENTRAL_DIR_SIGNATURE, GP_FLAG_MAX_COMPRESSION, GP_FLAG_UTF8, LocalFileEntry,
    METHOD_DEFLATE, METHOD_STORE, ZIP64_END_OF_CENTRAL_DIR_SIGNATURE, ZIP64_LOCATOR_SIGNATURE,
    read_u16, read_u32, read_u64,
};

/// The canonical comment prefix; the remaining 8 bytes are the uppercase
/// hex CRC-32 of the central directory.
pub const TORRENTZIP_COMMENT_PREFIX: &[u8; 14] = b"TORRENTZIPPED-";

/// Deflate encoding of the empty stream, written as the data of empty
/// entries (directories and zero-length files).
const EMPTY_DEFLATE_STREAM: [u8; 2] = [0x03, 0x00];

/// Open state of an archive instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Not open.
    #[default]
    Closed,
    /// Open for reading.
    Read,
    /// Open for writing.
    Write,
}

/// A ZIP archive, open for reading or writing.
#[derive(Debug)]
pub struct ZipArchive {
    path: PathBuf,
    last_write_time: Option<FileTime>,
    file: Option<File>,
    open_mode: OpenMode,
    entries: Vec<LocalFileEntry>,
    central_dir_start: u64,
    central_dir_size: u64,
    zip64: bool,
    status: ZipStatus,
}

impl ZipArchive {
    /// Opens an archive for reading.
    ///
    /// `expected_timestamp`, when given, must match the file's current
    /// last-write time (staleness check for callers holding cached
    /// metadata). With `read_headers` set, every central-directory record
    /// and local file header is read and cross-validated, and the
    /// canonical marker is verified.
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

        let file = File::open(path).map_err(|e| match e.kind() {
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
            file: Some(file),
            open_mode: OpenMode::Read,
            entries: Vec::new(),
            central_dir_start: 0,
            central_dir_size: 0,
            zip64: false,
            status: ZipStatus::None,
        };

        if read_headers {
            archive.read_structure()?;
        }

        Ok(archive)
    }

    /// Creates a new archive for writing, truncating any existing file.
    pub fn create(path: &Path) -> Result<Self> {
        fsutil::create_dir_for_file(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|_| Error::OpeningFailed {
                path: path.display().to_string(),
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            last_write_time: None,
            file: Some(file),
            open_mode: OpenMode::Write,
            entries: Vec::new(),
            central_dir_start: 0,
            central_dir_size: 0,
            zip64: false,
            status: ZipStatus::None,
        })
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
    pub fn entry(&self, index: usize) -> &LocalFileEntry {
        &self.entries[index]
    }

    /// Mutably borrow one entry (used by deep scans to record verdicts).
    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut LocalFileEntry {
        &mut self.entries[index]
    }

    fn file_mut(&mut self) -> &mut File {
        self.file.as_mut().expect("archive file handle missing")
    }

    // ---------------------------------------------------------------
    // Read path
    // ---------------------------------------------------------------

    /// Scans backward from EOF for the end-of-central-directory
    /// signature, in 1 KiB chunks, up to the maximum comment distance.
    fn find_end_of_central_dir(&mut self) -> Result<u64> {
        let file = self.file_mut();
        let file_size = file.metadata()?.len();
        if file_size < 22 {
            return Err(Error::EndOfCentralDirError("file too small".into()));
        }

        let max_back_search = 0xFFFFu64.min(file_size);
        const CHUNK: u64 = 0x400;
        let mut buffer = vec![0u8; (CHUNK + 4) as usize];

        let mut back = 4u64;
        while back < max_back_search {
            back = (back + CHUNK).min(max_back_search);
            let read_size = back.min(CHUNK + 4) as usize;

            file.seek(SeekFrom::Start(file_size - back))?;
            file.read_exact(&mut buffer[..read_size])?;

            for i in (0..=read_size - 4).rev() {
                if buffer[i..i + 4] == END_OF_CENTRAL_DIR_SIGNATURE.to_le_bytes() {
                    return Ok(file_size - back + i as u64);
                }
            }
        }

        Err(Error::EndOfCentralDirError(
            "end of central directory signature not found".into(),
        ))
    }

    /// Parses the EOCD record at the given offset. Returns the raw
    /// comment bytes.
    fn read_end_of_central_dir(&mut self, eocd_offset: u64) -> Result<Vec<u8>> {
        let bad = |what: &str| Error::EndOfCentralDirError(what.into());

        let (entries_this_disk, cd_size, cd_start, comment, trailing_data) = {
            let file = self.file.as_mut().expect("archive file handle missing");
            file.seek(SeekFrom::Start(eocd_offset))?;

            if read_u32(file)? != END_OF_CENTRAL_DIR_SIGNATURE {
                return Err(bad("bad signature"));
            }
            if read_u16(file)? != 0 {
                return Err(bad("multi-disk archives are not supported"));
            }
            if read_u16(file)? != 0 {
                return Err(bad("multi-disk archives are not supported"));
            }

            let entries_this_disk = read_u16(file)? as u64;
            if read_u16(file)? as u64 != entries_this_disk {
                return Err(bad("entry count disagreement"));
            }

            let cd_size = read_u32(file)? as u64;
            let cd_start = read_u32(file)? as u64;

            let comment_len = read_u16(file)? as usize;
            let mut comment = vec![0u8; comment_len];
            file.read_exact(&mut comment)?;

            let trailing_data = file.stream_position()? != file.metadata()?.len();
            (entries_this_disk, cd_size, cd_start, comment, trailing_data)
        };

        self.central_dir_size = cd_size;
        self.central_dir_start = cd_start;
        if trailing_data {
            self.status = ZipStatus::ExtraData;
        }

        // Zip64 archives saturate these fields; the real values follow
        // from the locator.
        if cd_start == 0xFFFF_FFFF || cd_size == 0xFFFF_FFFF || entries_this_disk == 0xFFFF {
            self.zip64 = true;
            if eocd_offset < 20 {
                return Err(Error::Zip64Error("no room for a Zip64 locator".into()));
            }
            let zip64_eocd_offset = self.read_zip64_locator(eocd_offset - 20)?;
            self.read_zip64_end_of_central_dir(zip64_eocd_offset)?;
        } else {
            self.entries = Vec::with_capacity(entries_this_disk as usize);
            self.entries
                .resize_with(entries_this_disk as usize, LocalFileEntry::default);
        }

        Ok(comment)
    }

    fn read_zip64_locator(&mut self, offset: u64) -> Result<u64> {
        let file = self.file_mut();
        file.seek(SeekFrom::Start(offset))?;

        if read_u32(file)? != ZIP64_LOCATOR_SIGNATURE {
            return Err(Error::Zip64Error("bad locator signature".into()));
        }
        if read_u32(file)? != 0 {
            return Err(Error::Zip64Error("locator disk number not zero".into()));
        }
        let zip64_eocd_offset = read_u64(file)?;
        if read_u32(file)? != 1 {
            return Err(Error::Zip64Error("locator total disks not one".into()));
        }

        Ok(zip64_eocd_offset)
    }

    fn read_zip64_end_of_central_dir(&mut self, offset: u64) -> Result<()> {
        let bad = |what: &str| Error::Zip64Error(what.into());

        let (entries_this_disk, cd_size, cd_start) = {
            let file = self.file.as_mut().expect("archive file handle missing");
            file.seek(SeekFrom::Start(offset))?;

            if read_u32(file)? != ZIP64_END_OF_CENTRAL_DIR_SIGNATURE {
                return Err(bad("bad signature"));
            }
            if read_u64(file)? != 44 {
                return Err(bad("unexpected record size"));
            }
            read_u16(file)?; // version made by
            if read_u16(file)? != 45 {
                return Err(bad("unexpected version needed"));
            }
            if read_u32(file)? != 0 {
                return Err(bad("disk number not zero"));
            }
            if read_u32(file)? != 0 {
                return Err(bad("central directory disk not zero"));
            }

            let entries_this_disk = read_u64(file)?;
            if read_u64(file)? != entries_this_disk {
                return Err(bad("entry count disagreement"));
            }
            (entries_this_disk, read_u64(file)?, read_u64(file)?)
        };

        self.central_dir_size = cd_size;
        self.central_dir_start = cd_start;
        self.entries = Vec::with_capacity(entries_this_disk as usize);
        self.entries
            .resize_with(entries_this_disk as usize, LocalFileEntry::default);
        Ok(())
    }

    /// Checks a 22-byte comment for the canonical marker and verifies it
    /// against the CRC of the raw central-directory bytes.
    fn verify_canonical_comment(&mut self, comment: &[u8]) -> Result<bool> {
        if comment.len() != 22 || &comment[..14] != TORRENTZIP_COMMENT_PREFIX {
            return Ok(false);
        }

        let start = self.central_dir_start;
        let size = self.central_dir_size;
        let file = self.file_mut();
        file.seek(SeekFrom::Start(start))?;

        let mut crc = Crc32::new();
        let mut remaining = size;
        let mut buffer = [0u8; 8192];
        while remaining > 0 {
            let chunk = buffer.len().min(remaining as usize);
            file.read_exact(&mut buffer[..chunk])?;
            crc.update(&buffer[..chunk]);
            remaining -= chunk as u64;
        }

        let expected = format!("{:08X}", crc.finalize());
        Ok(expected.as_bytes() == &comment[14..22])
    }

    /// Reads the full archive structure and determines canonical status.
    fn read_structure(&mut self) -> Result<()> {
        let eocd_offset = self.find_end_of_central_dir()?;
        let comment = self.read_end_of_central_dir(eocd_offset)?;

        let mut trrntzip = self.verify_canonical_comment(&comment)?;

        // Central directory
        let entry_count = self.entries.len();
        let start = self.central_dir_start;
        let mut zip64 = self.zip64;
        let entries = {
            let file = self.file.as_mut().expect("archive file handle missing");
            file.seek(SeekFrom::Start(start))?;
            let mut reader = BufReader::new(&mut *file);
            let mut entries = Vec::with_capacity(entry_count);
            for _ in 0..entry_count {
                let entry = LocalFileEntry::read_central(&mut reader)?;
                zip64 |= entry.zip64;
                entries.push(entry);
            }
            entries
        };
        self.zip64 = zip64;
        self.entries = entries;

        // Local headers, cross-validated against the central copies
        for i in 0..self.entries.len() {
            let (file, entry) = (
                self.file.as_mut().expect("archive file handle missing"),
                &mut self.entries[i],
            );
            entry.read_local(file)?;
            trrntzip &= entry.trrntzip
                && entry.compression_method == METHOD_DEFLATE
                && entry.gp_flags & !GP_FLAG_UTF8 == GP_FLAG_MAX_COMPRESSION;
        }

        // Canonical order: ascending, case-insensitive ASCII
        if trrntzip {
            for pair in self.entries.windows(2) {
                if crate::canon::torrentzip_name_cmp(&pair[0].name, &pair[1].name)
                    != std::cmp::Ordering::Less
                {
                    trrntzip = false;
                    break;
                }
            }
        }

        // A directory entry immediately followed by something inside it
        // is redundant and breaks canonical form
        if trrntzip {
            for pair in self.entries.windows(2) {
                if pair[0].is_directory() && crate::canon::is_prefix_fold(&pair[0].name, &pair[1].name)
                {
                    trrntzip = false;
                    break;
                }
            }
        }

        if trrntzip && self.status == ZipStatus::None {
            self.status = ZipStatus::TrrntZip;
        }

        log::debug!(
            "opened {}: {} entries, status {:?}",
            self.path.display(),
            self.entries.len(),
            self.status
        );

        Ok(())
    }

    /// Opens a read stream for one entry.
    ///
    /// With `raw` set the compressed bytes are returned untouched;
    /// otherwise the stream decodes to the entry's uncompressed bytes.
    /// Returns the stream and its length.
    pub fn open_read_stream(&mut self, index: usize, raw: bool) -> Result<(ZipReadStream<'_>, u64)> {
        if self.open_mode != OpenMode::Read {
            return Err(Error::ReadingFromWriteArchive);
        }

        {
            let (file, entry) = (
                self.file.as_mut().expect("archive file handle missing"),
                &mut self.entries[index],
            );
            if entry.data_location == 0 {
                entry.read_local(file)?;
            }
        }

        let entry = &self.entries[index];
        let data_location = entry.data_location;
        let compressed_size = entry.compressed_size;
        let uncompressed_size = entry.uncompressed_size;
        let method = entry.compression_method;

        let file = self.file.as_mut().expect("archive file handle missing");
        file.seek(SeekFrom::Start(data_location))?;
        let file = &*file;

        if raw || method == METHOD_STORE {
            let stream = ZipReadStream::Stored(file.take(compressed_size));
            let size = if raw { compressed_size } else { uncompressed_size };
            return Ok((stream, size));
        }

        let limited = file.take(compressed_size);
        let stream = ZipReadStream::Deflate(DeflateDecoder::new(BufReader::new(limited)));
        Ok((stream, uncompressed_size))
    }

    // ---------------------------------------------------------------
    // Write path
    // ---------------------------------------------------------------

    /// Appends a local header and opens a write stream for a new entry.
    ///
    /// The canonical path compresses with maximum-compression deflate;
    /// passing [`METHOD_STORE`] stores the bytes raw (and disqualifies
    /// the archive from the canonical comment).
    pub fn open_write_stream(
        &mut self,
        name: &str,
        uncompressed_size: u64,
        method: u16,
    ) -> Result<ZipWriteStream<'_>> {
        if self.open_mode != OpenMode::Write {
            return Err(Error::WritingToReadArchive);
        }

        let mut entry = LocalFileEntry::new_for_write(name);
        entry.compression_method = method;
        entry.uncompressed_size = uncompressed_size;
        entry.trrntzip = method == METHOD_DEFLATE;

        let file = self.file.as_mut().expect("archive file handle missing");
        entry.write_local(file)?;
        self.entries.push(entry);

        let file = self.file.as_mut().expect("archive file handle missing");
        if method == METHOD_STORE {
            Ok(ZipWriteStream::Stored(file))
        } else {
            Ok(ZipWriteStream::Deflate(DeflateEncoder::new(file)))
        }
    }

    /// Finalizes the most recently opened write entry: records the CRC,
    /// patches the placeholder header fields, and gives empty entries
    /// the two-byte empty-deflate marker.
    pub fn close_write_stream(&mut self, crc: u32) -> Result<()> {
        let file = self.file.as_mut().expect("archive file handle missing");
        let entry = self
            .entries
            .last_mut()
            .ok_or(Error::RollBackError)?;

        entry.compressed_size = file.stream_position()? - entry.data_location;

        if entry.compressed_size == 0 && entry.uncompressed_size == 0 {
            file.write_all(&EMPTY_DEFLATE_STREAM)?;
            entry.compressed_size = file.stream_position()? - entry.data_location;
        }

        entry.crc = crc;
        entry.patch_local(file)
    }

    /// Discards the most recently opened write entry and rewinds the
    /// stream to its local header. This is the only recovery path for a
    /// failed write.
    pub fn rollback(&mut self) -> Result<()> {
        if self.open_mode != OpenMode::Write {
            return Err(Error::WritingToReadArchive);
        }
        let entry = self.entries.pop().ok_or(Error::RollBackError)?;
        let file = self.file.as_mut().expect("archive file handle missing");
        file.seek(SeekFrom::Start(entry.local_header_offset))?;
        Ok(())
    }

    /// Closes the archive.
    ///
    /// In write mode this writes the central directory (computing its
    /// CRC-32 as it goes), the canonical comment when every entry came
    /// through the max-compression path, Zip64 records if required, and
    /// the end-of-central-directory record.
    pub fn close(&mut self) -> Result<()> {
        match self.open_mode {
            OpenMode::Closed => Ok(()),
            OpenMode::Read => {
                self.file = None;
                self.open_mode = OpenMode::Closed;
                Ok(())
            }
            OpenMode::Write => self.close_write(),
        }
    }

    fn close_write(&mut self) -> Result<()> {
        let mut trrntzip = true;
        self.zip64 = false;

        let file = self.file.as_mut().expect("archive file handle missing");
        self.central_dir_start = file.stream_position()?;
        if self.central_dir_start >= 0xFFFF_FFFF {
            self.zip64 = true;
        }

        // Stream the central directory through a CRC accumulator; the
        // digest lands in the canonical comment
        let mut crc_writer = Crc32Writer::new(&mut *file);
        for entry in &mut self.entries {
            entry.write_central(&mut crc_writer)?;
            self.zip64 |= entry.zip64;
            trrntzip &= entry.trrntzip;
        }
        let central_dir_crc = crc_writer.crc();
        self.central_dir_size = crc_writer.bytes_written();
        drop(crc_writer);

        let comment: Vec<u8> = if trrntzip {
            let mut c = TORRENTZIP_COMMENT_PREFIX.to_vec();
            c.extend_from_slice(format!("{central_dir_crc:08X}").as_bytes());
            c
        } else {
            Vec::new()
        };
        self.status = if trrntzip {
            ZipStatus::TrrntZip
        } else {
            ZipStatus::None
        };

        if self.zip64 {
            let zip64_eocd_offset = file.stream_position()?;
            self.write_zip64_records(zip64_eocd_offset)?;
        }
        self.write_end_of_central_dir(&comment)?;

        let file = self.file.as_mut().expect("archive file handle missing");
        let end = file.stream_position()?;
        file.set_len(end)?;
        file.flush()?;

        self.file = None;
        self.open_mode = OpenMode::Closed;
        self.last_write_time = Some(fsutil::last_write_time(&self.path)?);
        Ok(())
    }

    fn write_zip64_records(&mut self, zip64_eocd_offset: u64) -> Result<()> {
        let entry_count = self.entries.len() as u64;
        let (cd_size, cd_start) = (self.central_dir_size, self.central_dir_start);
        let file = self.file.as_mut().expect("archive file handle missing");

        file.write_all(&ZIP64_END_OF_CENTRAL_DIR_SIGNATURE.to_le_bytes())?;
        file.write_all(&44u64.to_le_bytes())?; // record size
        file.write_all(&45u16.to_le_bytes())?; // version made by
        file.write_all(&45u16.to_le_bytes())?; // version needed
        file.write_all(&0u32.to_le_bytes())?; // this disk
        file.write_all(&0u32.to_le_bytes())?; // central directory disk
        file.write_all(&entry_count.to_le_bytes())?;
        file.write_all(&entry_count.to_le_bytes())?;
        file.write_all(&cd_size.to_le_bytes())?;
        file.write_all(&cd_start.to_le_bytes())?;

        file.write_all(&ZIP64_LOCATOR_SIGNATURE.to_le_bytes())?;
        file.write_all(&0u32.to_le_bytes())?; // zip64 EOCD disk
        file.write_all(&zip64_eocd_offset.to_le_bytes())?;
        file.write_all(&1u32.to_le_bytes())?; // total disks
        Ok(())
    }

    fn write_end_of_central_dir(&mut self, comment: &[u8]) -> Result<()> {
        let entry_count = self.entries.len();
        let clamped_count: u16 = if entry_count >= 0xFFFF {
            0xFFFF
        } else {
            entry_count as u16
        };
        let clamped_size: u32 = if self.central_dir_size >= 0xFFFF_FFFF {
            0xFFFF_FFFF
        } else {
            self.central_dir_size as u32
        };
        let clamped_start: u32 = if self.central_dir_start >= 0xFFFF_FFFF {
            0xFFFF_FFFF
        } else {
            self.central_dir_start as u32
        };

        let file = self.file.as_mut().expect("archive file handle missing");
        file.write_all(&END_OF_CENTRAL_DIR_SIGNATURE.to_le_bytes())?;
        file.write_all(&0u16.to_le_bytes())?; // this disk
        file.write_all(&0u16.to_le_bytes())?; // central directory disk
        file.write_all(&clamped_count.to_le_bytes())?;
        file.write_all(&clamped_count.to_le_bytes())?;
        file.write_all(&clamped_size.to_le_bytes())?;
        file.write_all(&clamped_start.to_le_bytes())?;
        file.write_all(&(comment.len() as u16).to_le_bytes())?;
        file.write_all(comment)?;
        Ok(())
    }

    /// Aborts a write, deleting the half-written file.
    pub fn close_failed(&mut self) -> Result<()> {
        if self.open_mode == OpenMode::Write {
            self.file = None;
            fsutil::remove_if_exists(&self.path)?;
        } else {
            self.file = None;
        }
        self.open_mode = OpenMode::Closed;
        Ok(())
    }

    /// Runs the verification pipeline over every entry, recording
    /// per-entry verdicts and MD5/SHA-1 digests.
    pub fn deep_scan(&mut self) {
        for index in 0..self.entries.len() {
            if self.entries[index].uncompressed_size == 0 {
                let empty = crate::verify::EntryHashes::empty();
                let entry = self.entry_mut(index);
                entry.md5 = Some(empty.md5);
                entry.sha1 = Some(empty.sha1);
                entry.status = FileVerdict::Good;
                continue;
            }

            let stored_crc = self.entries[index].crc;
            let hashed = match self.open_read_stream(index, false) {
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
}

/// A read stream over one entry's data.
pub enum ZipReadStream<'a> {
    /// Decoding deflate stream.
    Deflate(DeflateDecoder<BufReader<io::Take<&'a File>>>),
    /// Stored (or raw) bytes, length-limited.
    Stored(io::Take<&'a File>),
}

impl Read for ZipReadStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ZipReadStream::Deflate(s) => s.read(buf),
            ZipReadStream::Stored(s) => s.read(buf),
        }
    }
}

/// A write stream for one new entry.
pub enum ZipWriteStream<'a> {
    /// Maximum-compression deflate.
    Deflate(DeflateEncoder<&'a mut File>),
    /// Raw stored bytes.
    Stored(&'a mut File),
}

impl ZipWriteStream<'_> {
    /// Finishes the compressed stream. Must be called before
    /// [`ZipArchive::close_write_stream`].
    pub fn finish(self) -> Result<()> {
        match self {
            ZipWriteStream::Deflate(encoder) => {
                encoder.finish()?;
                Ok(())
            }
            ZipWriteStream::Stored(_) => Ok(()),
        }
    }
}

impl Write for ZipWriteStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ZipWriteStream::Deflate(s) => s.write(buf),
            ZipWriteStream::Stored(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ZipWriteStream::Deflate(s) => s.flush(),
            ZipWriteStream::Stored(s) => s.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Crc32;
    use std::io::Write as _;

    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) -> ZipArchive {
        let mut archive = ZipArchive::create(path).unwrap();
        for (name, data) in entries {
            let mut stream = archive
                .open_write_stream(name, data.len() as u64, METHOD_DEFLATE)
                .unwrap();
            stream.write_all(data).unwrap();
            stream.finish().unwrap();
            archive.close_write_stream(Crc32::compute(data)).unwrap();
        }
        archive.close().unwrap();
        archive
    }

    #[test]
    fn test_write_then_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.zip");

        write_archive(&path, &[("a.txt", b"alpha"), ("b.txt", b"beta bytes")]);

        let mut archive = ZipArchive::open(&path, None, true).unwrap();
        assert_eq!(archive.entry_count(), 2);
        assert_eq!(archive.entry(0).name, "a.txt");
        assert_eq!(archive.entry(1).name, "b.txt");
        assert_eq!(archive.status(), ZipStatus::TrrntZip);

        let (mut stream, size) = archive.open_read_stream(0, false).unwrap();
        assert_eq!(size, 5);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"alpha");

        let (mut stream, _) = archive.open_read_stream(1, false).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"beta bytes");
    }

    #[test]
    fn test_canonical_comment_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker.zip");
        write_archive(&path, &[("x", b"payload")]);

        let bytes = std::fs::read(&path).unwrap();
        let comment = &bytes[bytes.len() - 22..];
        assert_eq!(&comment[..14], TORRENTZIP_COMMENT_PREFIX);
        assert!(
            comment[14..]
                .iter()
                .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b))
        );
    }

    #[test]
    fn test_marker_invalidated_by_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mutated.zip");
        write_archive(&path, &[("x", b"payload")]);

        let mut archive = ZipArchive::open(&path, None, true).unwrap();
        assert_eq!(archive.status(), ZipStatus::TrrntZip);
        let cd_start = archive.central_dir_start;
        archive.close().unwrap();

        // Flip one central-directory byte (inside the name field) and the
        // marker check must fail
        let mut bytes = std::fs::read(&path).unwrap();
        let idx = cd_start as usize + 46;
        bytes[idx] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        // The local/central name comparison now fails too; structure
        // errors are surfaced, not silently ignored
        assert!(ZipArchive::open(&path, None, true).is_err());
    }

    #[test]
    fn test_empty_entry_marker_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.zip");
        write_archive(&path, &[("dir/", b"")]);

        let mut archive = ZipArchive::open(&path, None, true).unwrap();
        assert_eq!(archive.entry(0).compressed_size, 2);
        assert_eq!(archive.entry(0).uncompressed_size, 0);
        assert!(archive.entry(0).is_directory());

        let (mut stream, size) = archive.open_read_stream(0, false).unwrap();
        assert_eq!(size, 0);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_eocd_found_behind_long_comment() {
        // An empty archive whose EOCD carries a 1000-byte comment; the
        // backward scan must step over it
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&END_OF_CENTRAL_DIR_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]); // disk numbers
        bytes.extend_from_slice(&[0u8; 4]); // entry counts
        bytes.extend_from_slice(&0u32.to_le_bytes()); // cd size
        bytes.extend_from_slice(&0u32.to_le_bytes()); // cd start
        bytes.extend_from_slice(&1000u16.to_le_bytes());
        bytes.extend_from_slice(&[b'x'; 1000]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commented.zip");
        std::fs::write(&path, &bytes).unwrap();

        let archive = ZipArchive::open(&path, None, true).unwrap();
        assert_eq!(archive.entry_count(), 0);
        assert_eq!(archive.status(), ZipStatus::None);
    }

    #[test]
    fn test_timestamp_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.zip");
        write_archive(&path, &[("a", b"1")]);

        let wrong = FileTime::from_unix_time(12345, 0);
        let err = ZipArchive::open(&path, Some(wrong), true).unwrap_err();
        assert!(matches!(err, Error::TimestampMismatch { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = ZipArchive::open(Path::new("/nonexistent/a.zip"), None, true).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[test]
    fn test_unsorted_archive_not_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unsorted.zip");
        write_archive(&path, &[("b.txt", b"2"), ("a.txt", b"1")]);

        let archive = ZipArchive::open(&path, None, true).unwrap();
        assert_eq!(archive.status(), ZipStatus::None);
    }

    #[test]
    fn test_rollback_discards_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rolled.zip");

        let mut archive = ZipArchive::create(&path).unwrap();
        let mut stream = archive.open_write_stream("keep", 4, METHOD_DEFLATE).unwrap();
        stream.write_all(b"keep").unwrap();
        stream.finish().unwrap();
        archive.close_write_stream(Crc32::compute(b"keep")).unwrap();

        let mut stream = archive.open_write_stream("drop", 4, METHOD_DEFLATE).unwrap();
        stream.write_all(b"drop").unwrap();
        stream.finish().unwrap();
        archive.close_write_stream(Crc32::compute(b"drop")).unwrap();
        archive.rollback().unwrap();

        archive.close().unwrap();

        let archive = ZipArchive::open(&path, None, true).unwrap();
        assert_eq!(archive.entry_count(), 1);
        assert_eq!(archive.entry(0).name, "keep");
        assert_eq!(archive.status(), ZipStatus::TrrntZip);
    }

    #[test]
    fn test_deep_scan_good_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.zip");
        write_archive(&path, &[("a.bin", b"scan me"), ("empty", b"")]);

        let mut archive = ZipArchive::open(&path, None, true).unwrap();
        archive.deep_scan();

        assert_eq!(archive.entry(0).status, FileVerdict::Good);
        assert!(archive.entry(0).md5.is_some());
        assert_eq!(archive.entry(1).status, FileVerdict::Good);
        assert_eq!(
            archive.entry(1).md5.unwrap(),
            crate::verify::EntryHashes::empty().md5
        );
    }
}
