//! The fixed 32-byte 7z signature header.
//!
//! Layout: 6-byte magic, 2-byte version, CRC-32 of the following 20
//! bytes, then next-header offset / size / CRC. On the write path the
//! header is emitted blank and patched when the archive closes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::checksum::Crc32;
use crate::{Error, Result};

use super::reader::read_u32_le;

/// The 7z magic bytes: `'7' 'z' 0xBC 0xAF 0x27 0x1C`.
pub const SIGNATURE: &[u8; 6] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Total size of the signature header.
pub const SIGNATURE_HEADER_SIZE: u64 = 32;

/// Parsed signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Archive format version, major.
    pub version_major: u8,
    /// Archive format version, minor.
    pub version_minor: u8,
    /// Offset from the end of the signature header to the next header.
    pub next_header_offset: u64,
    /// Size of the next header in bytes.
    pub next_header_size: u64,
    /// CRC-32 of the next header bytes.
    pub next_header_crc: u32,
}

impl SignatureHeader {
    /// Parses and validates a signature header from the start of a
    /// reader.
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 6];
        r.read_exact(&mut magic)?;
        if magic != *SIGNATURE {
            return Err(Error::SignatureError);
        }

        let mut version = [0u8; 2];
        r.read_exact(&mut version)?;

        let start_header_crc = read_u32_le(r)?;

        let mut start_header = [0u8; 20];
        r.read_exact(&mut start_header)?;
        if Crc32::compute(&start_header) != start_header_crc {
            return Err(Error::SignatureError);
        }

        let next_header_offset = u64::from_le_bytes(start_header[0..8].try_into().unwrap());
        let next_header_size = u64::from_le_bytes(start_header[8..16].try_into().unwrap());
        let next_header_crc = u32::from_le_bytes(start_header[16..20].try_into().unwrap());

        Ok(Self {
            version_major: version[0],
            version_minor: version[1],
            next_header_offset,
            next_header_size,
            next_header_crc,
        })
    }

    /// Absolute file position of the next header.
    pub fn next_header_position(&self) -> u64 {
        SIGNATURE_HEADER_SIZE + self.next_header_offset
    }
}

/// Writes a blank signature header (version 0.3, zeroed start header).
///
/// The start-header fields are patched by [`patch_signature_header`] once
/// the archive's real header has been written.
pub fn write_blank_signature_header(f: &mut File) -> Result<()> {
    f.write_all(SIGNATURE)?;
    f.write_all(&[0u8, 3u8])?; // version major, minor
    f.write_all(&0u32.to_le_bytes())?; // start header CRC
    f.write_all(&0u64.to_le_bytes())?; // next header offset
    f.write_all(&0u64.to_le_bytes())?; // next header size
    f.write_all(&0u32.to_le_bytes())?; // next header CRC
    Ok(())
}

/// Patches the blank signature header with the final next-header
/// location, recomputing the start-header CRC. The stream position is
/// restored afterwards.
pub fn patch_signature_header(
    f: &mut File,
    header_position: u64,
    header_size: u64,
    header_crc: u32,
) -> Result<()> {
    let end = f.stream_position()?;

    let mut start_header = [0u8; 20];
    start_header[0..8].copy_from_slice(&(header_position - SIGNATURE_HEADER_SIZE).to_le_bytes());
    start_header[8..16].copy_from_slice(&header_size.to_le_bytes());
    start_header[16..20].copy_from_slice(&header_crc.to_le_bytes());

    f.seek(SeekFrom::Start(8))?;
    f.write_all(&Crc32::compute(&start_header).to_le_bytes())?;
    f.write_all(&start_header)?;

    f.seek(SeekFrom::Start(end))?;
    Ok(())
}
