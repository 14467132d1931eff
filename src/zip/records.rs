//! ZIP record structures: local file headers, central directory records,
//! and their binary encodings.
//!
//! Central-directory records are the authoritative copy; local headers are
//! re-read and cross-validated field by field when an archive is opened
//! with header reading enabled. Any disagreement is a structural error,
//! except a differing general-purpose flag, which merely disqualifies the
//! archive from canonical status.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::checksum::Crc32;
use crate::status::FileVerdict;
use crate::{Error, Result};

/// `PK\x03\x04`
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4B50;
/// `PK\x01\x02`
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4B50;
/// `PK\x05\x06`
pub const END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x0605_4B50;
/// `PK\x06\x06`
pub const ZIP64_END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x0606_4B50;
/// `PK\x06\x07`
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;
/// `PK\x07\x08` (optional data-descriptor marker)
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4B50;

/// Fixed DOS mod-time for canonical entries (23:32:00).
pub const TORRENTZIP_DOS_TIME: u16 = 48128;
/// Fixed DOS mod-date for canonical entries (1996-12-24).
pub const TORRENTZIP_DOS_DATE: u16 = 8600;

/// General-purpose flag for maximum-compression deflate.
pub const GP_FLAG_MAX_COMPRESSION: u16 = 2;
/// General-purpose flag bit: names are UTF-8.
pub const GP_FLAG_UTF8: u16 = 1 << 11;
/// General-purpose flag bit: sizes/CRC follow the data (data descriptor).
pub const GP_FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Deflate compression method id.
pub const METHOD_DEFLATE: u16 = 8;
/// Store (no compression) method id.
pub const METHOD_STORE: u16 = 0;

pub(crate) fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Decodes a stored file name.
///
/// With the UTF-8 flag clear, each raw byte maps to the Unicode scalar of
/// the same value (bytes 0-255 only); with it set, the bytes must be valid
/// UTF-8.
pub fn decode_name(bytes: &[u8], utf8: bool) -> Result<String> {
    if utf8 {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::CentralDirError("file name is not valid UTF-8".into()))
    } else {
        Ok(bytes.iter().map(|&b| b as char).collect())
    }
}

/// Encodes a file name, returning the bytes and whether UTF-8 mode is
/// required (any character above U+00FF forces UTF-8).
pub fn encode_name(name: &str) -> (Vec<u8>, bool) {
    if name.chars().any(|c| c as u32 > 255) {
        (name.as_bytes().to_vec(), true)
    } else {
        (name.chars().map(|c| c as u8).collect(), false)
    }
}

/// One entry of the archive, backed by a central-directory record and its
/// local file header.
#[derive(Debug, Clone, Default)]
pub struct LocalFileEntry {
    /// Entry name with forward-slash separators.
    pub name: String,
    /// General-purpose bit flags from the central directory.
    pub gp_flags: u16,
    /// Compression method (deflate or store).
    pub compression_method: u16,
    /// DOS mod time.
    pub last_mod_time: u16,
    /// DOS mod date.
    pub last_mod_date: u16,
    /// Stored CRC-32 of the uncompressed data.
    pub crc: u32,
    /// Compressed size in bytes.
    pub compressed_size: u64,
    /// Uncompressed size in bytes.
    pub uncompressed_size: u64,
    /// Offset of the local file header.
    pub local_header_offset: u64,
    /// Whether Zip64 extra data is present/needed.
    pub zip64: bool,
    /// Whether the local header matched the canonical expectations.
    pub trrntzip: bool,
    /// Verification state (advanced by deep scans).
    pub status: FileVerdict,
    /// MD5 digest, populated by deep scans only.
    pub md5: Option<[u8; 16]>,
    /// SHA-1 digest, populated by deep scans only.
    pub sha1: Option<[u8; 20]>,

    pub(crate) data_location: u64,
    pub(crate) crc_location: u64,
    pub(crate) extra_location: u64,
}

impl LocalFileEntry {
    /// Creates an entry for the canonical write path: maximum-compression
    /// deflate with the fixed TorrentZip timestamps.
    pub fn new_for_write(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gp_flags: GP_FLAG_MAX_COMPRESSION,
            compression_method: METHOD_DEFLATE,
            last_mod_time: TORRENTZIP_DOS_TIME,
            last_mod_date: TORRENTZIP_DOS_DATE,
            ..Self::default()
        }
    }

    /// Returns `true` if this entry names a directory.
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Reads one central-directory record.
    pub fn read_central<R: Read>(r: &mut R) -> Result<Self> {
        let signature = read_u32(r)?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(Error::CentralDirError(format!(
                "bad central directory signature {signature:#010x}"
            )));
        }

        read_u16(r)?; // version made by
        read_u16(r)?; // version needed to extract

        let gp_flags = read_u16(r)?;
        let compression_method = read_u16(r)?;
        if compression_method != METHOD_DEFLATE && compression_method != METHOD_STORE {
            return Err(Error::UnsupportedCompression {
                method_id: compression_method as u64,
            });
        }

        let last_mod_time = read_u16(r)?;
        let last_mod_date = read_u16(r)?;
        let crc = read_u32(r)?;
        let mut compressed_size = read_u32(r)? as u64;
        let mut uncompressed_size = read_u32(r)? as u64;

        let name_len = read_u16(r)? as usize;
        let extra_len = read_u16(r)? as usize;
        let comment_len = read_u16(r)? as usize;

        read_u16(r)?; // disk number start
        read_u16(r)?; // internal file attributes
        read_u32(r)?; // external file attributes

        let mut local_header_offset = read_u32(r)? as u64;

        let mut name_bytes = vec![0u8; name_len];
        r.read_exact(&mut name_bytes)?;
        let mut name = decode_name(&name_bytes, gp_flags & GP_FLAG_UTF8 != 0)?;

        let mut extra = vec![0u8; extra_len];
        r.read_exact(&mut extra)?;

        let mut comment = vec![0u8; comment_len];
        r.read_exact(&mut comment)?;

        let mut zip64 = false;
        let mut pos = 0usize;
        while pos + 4 <= extra.len() {
            let block_type = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
            let block_len = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
            pos += 4;
            let end = pos + block_len;
            if end > extra.len() {
                return Err(Error::CentralDirError("extra field overruns record".into()));
            }
            match block_type {
                0x0001 => {
                    zip64 = true;
                    let mut field = &extra[pos..end];
                    if uncompressed_size == 0xFFFF_FFFF {
                        uncompressed_size = read_u64(&mut field)?;
                    }
                    if compressed_size == 0xFFFF_FFFF {
                        compressed_size = read_u64(&mut field)?;
                    }
                    if local_header_offset == 0xFFFF_FFFF {
                        local_header_offset = read_u64(&mut field)?;
                    }
                }
                0x7075 => {
                    if let Some(unicode_name) =
                        parse_unicode_path_field(&extra[pos..end], &name_bytes)?
                    {
                        name = unicode_name;
                    }
                }
                _ => {}
            }
            pos = end;
        }

        Ok(Self {
            name,
            gp_flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc,
            compressed_size,
            uncompressed_size,
            local_header_offset,
            zip64,
            ..Self::default()
        })
    }

    /// Writes this entry's central-directory record.
    pub fn write_central<W: Write>(&mut self, w: &mut W) -> Result<()> {
        let mut extra: Vec<u8> = Vec::new();
        self.zip64 = false;

        let cd_uncompressed = if self.uncompressed_size >= 0xFFFF_FFFF {
            self.zip64 = true;
            extra.extend_from_slice(&self.uncompressed_size.to_le_bytes());
            0xFFFF_FFFFu32
        } else {
            self.uncompressed_size as u32
        };

        let cd_compressed = if self.compressed_size >= 0xFFFF_FFFF {
            self.zip64 = true;
            extra.extend_from_slice(&self.compressed_size.to_le_bytes());
            0xFFFF_FFFFu32
        } else {
            self.compressed_size as u32
        };

        let cd_offset = if self.local_header_offset >= 0xFFFF_FFFF {
            self.zip64 = true;
            extra.extend_from_slice(&self.local_header_offset.to_le_bytes());
            0xFFFF_FFFFu32
        } else {
            self.local_header_offset as u32
        };

        if !extra.is_empty() {
            let payload_len = extra.len() as u16;
            let mut prefixed = Vec::with_capacity(extra.len() + 4);
            prefixed.extend_from_slice(&0x0001u16.to_le_bytes());
            prefixed.extend_from_slice(&payload_len.to_le_bytes());
            prefixed.extend_from_slice(&extra);
            extra = prefixed;
        }

        let (name_bytes, needs_utf8) = encode_name(&self.name);
        if needs_utf8 {
            self.gp_flags |= GP_FLAG_UTF8;
        }

        let version_needed: u16 = if self.zip64 { 45 } else { 20 };

        w.write_all(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())?;
        w.write_all(&0u16.to_le_bytes())?; // version made by
        w.write_all(&version_needed.to_le_bytes())?;
        w.write_all(&self.gp_flags.to_le_bytes())?;
        w.write_all(&self.compression_method.to_le_bytes())?;
        w.write_all(&self.last_mod_time.to_le_bytes())?;
        w.write_all(&self.last_mod_date.to_le_bytes())?;
        w.write_all(&self.crc.to_le_bytes())?;
        w.write_all(&cd_compressed.to_le_bytes())?;
        w.write_all(&cd_uncompressed.to_le_bytes())?;
        w.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
        w.write_all(&(extra.len() as u16).to_le_bytes())?;
        w.write_all(&0u16.to_le_bytes())?; // file comment length
        w.write_all(&0u16.to_le_bytes())?; // disk number start
        w.write_all(&0u16.to_le_bytes())?; // internal file attributes
        w.write_all(&0u32.to_le_bytes())?; // external file attributes
        w.write_all(&cd_offset.to_le_bytes())?;
        w.write_all(&name_bytes)?;
        w.write_all(&extra)?;

        Ok(())
    }

    /// Reads and cross-validates this entry's local file header against
    /// the central-directory copy.
    ///
    /// On success, `data_location` points at the entry's compressed bytes
    /// and `trrntzip` records whether the local flags agree with the
    /// central copy.
    pub fn read_local(&mut self, f: &mut File) -> Result<()> {
        self.trrntzip = true;

        f.seek(SeekFrom::Start(self.local_header_offset))?;

        let signature = read_u32(f)?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(Error::LocalFileHeaderError(format!(
                "bad local header signature for {}",
                self.name
            )));
        }

        read_u16(f)?; // version needed to extract
        let local_flags = read_u16(f)?;
        if local_flags != self.gp_flags {
            self.trrntzip = false;
        }

        let entry_name = self.name.clone();
        let mismatch =
            move |field: &str| Error::LocalFileHeaderError(format!("{field} mismatch for {entry_name}"));

        if read_u16(f)? != self.compression_method {
            return Err(mismatch("compression method"));
        }
        if read_u16(f)? != self.last_mod_time {
            return Err(mismatch("mod time"));
        }
        if read_u16(f)? != self.last_mod_date {
            return Err(mismatch("mod date"));
        }

        let local_crc = read_u32(f)?;
        let has_descriptor = self.gp_flags & GP_FLAG_DATA_DESCRIPTOR != 0;
        if !has_descriptor && local_crc != self.crc {
            return Err(mismatch("CRC"));
        }

        let local_compressed = read_u32(f)?;
        if self.zip64 && local_compressed != 0xFFFF_FFFF && local_compressed as u64 != self.compressed_size
        {
            return Err(mismatch("compressed size"));
        }
        if has_descriptor && local_compressed != 0 {
            return Err(mismatch("compressed size"));
        }
        if !self.zip64 && !has_descriptor && local_compressed as u64 != self.compressed_size {
            return Err(mismatch("compressed size"));
        }

        let local_uncompressed = read_u32(f)?;
        if self.zip64
            && local_uncompressed != 0xFFFF_FFFF
            && local_uncompressed as u64 != self.uncompressed_size
        {
            return Err(mismatch("uncompressed size"));
        }
        if has_descriptor && local_uncompressed != 0 {
            return Err(mismatch("uncompressed size"));
        }
        if !self.zip64 && !has_descriptor && local_uncompressed as u64 != self.uncompressed_size {
            return Err(mismatch("uncompressed size"));
        }

        let name_len = read_u16(f)? as usize;
        let extra_len = read_u16(f)? as usize;

        let mut name_bytes = vec![0u8; name_len];
        f.read_exact(&mut name_bytes)?;
        let mut local_name = decode_name(&name_bytes, local_flags & GP_FLAG_UTF8 != 0)?;

        let mut extra = vec![0u8; extra_len];
        f.read_exact(&mut extra)?;

        let mut pos = 0usize;
        while pos + 4 <= extra.len() {
            let block_type = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
            let block_len = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
            pos += 4;
            let end = pos + block_len;
            if end > extra.len() {
                return Err(Error::LocalFileHeaderError(
                    "extra field overruns local header".into(),
                ));
            }
            match block_type {
                0x0001 => {
                    let mut field = &extra[pos..end];
                    if local_uncompressed == 0xFFFF_FFFF
                        && read_u64(&mut field)? != self.uncompressed_size
                    {
                        return Err(mismatch("Zip64 uncompressed size"));
                    }
                    if local_compressed == 0xFFFF_FFFF
                        && read_u64(&mut field)? != self.compressed_size
                    {
                        return Err(mismatch("Zip64 compressed size"));
                    }
                }
                0x7075 => {
                    if let Some(unicode_name) =
                        parse_unicode_path_field(&extra[pos..end], &name_bytes)?
                    {
                        local_name = unicode_name;
                    }
                }
                _ => {}
            }
            pos = end;
        }

        if local_name != self.name {
            return Err(mismatch("file name"));
        }

        self.data_location = self.local_header_offset + 30 + name_len as u64 + extra_len as u64;

        if !has_descriptor {
            return Ok(());
        }

        // Trailing data descriptor, with or without its optional signature
        f.seek(SeekFrom::Start(self.data_location + self.compressed_size))?;
        let mut descriptor_crc = read_u32(f)?;
        if descriptor_crc == DATA_DESCRIPTOR_SIGNATURE {
            descriptor_crc = read_u32(f)?;
        }
        if descriptor_crc != self.crc {
            return Err(mismatch("data descriptor CRC"));
        }
        if read_u32(f)? as u64 != self.compressed_size {
            return Err(mismatch("data descriptor compressed size"));
        }
        if read_u32(f)? as u64 != self.uncompressed_size {
            return Err(mismatch("data descriptor uncompressed size"));
        }

        Ok(())
    }

    /// Writes this entry's local file header with placeholder CRC/size
    /// fields, recording the patch locations.
    pub fn write_local(&mut self, f: &mut File) -> Result<()> {
        self.zip64 = self.uncompressed_size >= 0xFFFF_FFFF;

        let (name_bytes, needs_utf8) = encode_name(&self.name);
        if needs_utf8 {
            self.gp_flags |= GP_FLAG_UTF8;
        }

        let version_needed: u16 = if self.zip64 { 45 } else { 20 };
        // Zip64 extra data placeholder, patched after the data is written
        let extra_len: u16 = if self.zip64 { 20 } else { 0 };

        self.local_header_offset = f.stream_position()?;

        f.write_all(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes())?;
        f.write_all(&version_needed.to_le_bytes())?;
        f.write_all(&self.gp_flags.to_le_bytes())?;
        f.write_all(&self.compression_method.to_le_bytes())?;
        f.write_all(&self.last_mod_time.to_le_bytes())?;
        f.write_all(&self.last_mod_date.to_le_bytes())?;

        self.crc_location = f.stream_position()?;
        f.write_all(&0xFFFF_FFFFu32.to_le_bytes())?;
        f.write_all(&0xFFFF_FFFFu32.to_le_bytes())?;
        f.write_all(&0xFFFF_FFFFu32.to_le_bytes())?;

        f.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
        f.write_all(&extra_len.to_le_bytes())?;
        f.write_all(&name_bytes)?;

        self.extra_location = f.stream_position()?;
        f.write_all(&vec![0u8; extra_len as usize])?;

        self.data_location = f.stream_position()?;
        Ok(())
    }

    /// Seeks back and patches the CRC and size fields written as
    /// placeholders by [`write_local`](Self::write_local), restoring the
    /// stream position afterwards.
    pub fn patch_local(&mut self, f: &mut File) -> Result<()> {
        let position = f.stream_position()?;

        f.seek(SeekFrom::Start(self.crc_location))?;
        f.write_all(&self.crc.to_le_bytes())?;

        if self.zip64 {
            f.write_all(&0xFFFF_FFFFu32.to_le_bytes())?;
            f.write_all(&0xFFFF_FFFFu32.to_le_bytes())?;

            f.seek(SeekFrom::Start(self.extra_location))?;
            f.write_all(&0x0001u16.to_le_bytes())?;
            f.write_all(&16u16.to_le_bytes())?;
            f.write_all(&self.uncompressed_size.to_le_bytes())?;
            f.write_all(&self.compressed_size.to_le_bytes())?;
        } else {
            f.write_all(&(self.compressed_size as u32).to_le_bytes())?;
            f.write_all(&(self.uncompressed_size as u32).to_le_bytes())?;
        }

        f.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

/// Parses an Info-ZIP Unicode Path field (0x7075), returning the UTF-8
/// name if its stored CRC of the raw header name matches.
///
/// In the central directory a mismatch is a structural error; a missing
/// or undersized field is.
fn parse_unicode_path_field(field: &[u8], raw_name: &[u8]) -> Result<Option<String>> {
    if field.len() < 5 {
        return Err(Error::CentralDirError(
            "Unicode path extra field too short".into(),
        ));
    }

    // field[0] is the version byte
    let stored_crc = u32::from_le_bytes(field[1..5].try_into().unwrap());
    if stored_crc != Crc32::compute(raw_name) {
        return Err(Error::CentralDirError(
            "Unicode path extra field CRC mismatch".into(),
        ));
    }

    let name = String::from_utf8(field[5..].to_vec())
        .map_err(|_| Error::CentralDirError("Unicode path is not valid UTF-8".into()))?;
    Ok(Some(name))
}
