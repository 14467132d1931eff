//! torrent7z canonical-marker detection.
//!
//! A torrent7z archive ends with a 38-byte trailer: a stored CRC-32
//! (little-endian) followed by a 34-byte identifier (16 binary bytes, one
//! version byte, then the ASCII tag `torrent7z_0.9beta`). Verification
//! rebuilds a fixed 302-byte composite buffer - the first 128 bytes of
//! the file, the 128 bytes preceding the trailer, the trailer's own file
//! offset, and the trailer with its stored CRC blanked to `FF FF FF FF` -
//! and compares its CRC-32 against the stored value. Only an exact match
//! counts; the version byte is wildcarded.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::Result;
use crate::checksum::Crc32;

use super::signature::SIGNATURE;

/// Bytes hashed from each end of the file.
const CRC_WINDOW: usize = 128;
/// 16-byte binary id + 1 version byte + "torrent7z_0.9beta".
const T7Z_ID_SIZE: usize = 34;
/// Identifier plus the stored CRC.
const TRAILER_SIZE: usize = T7Z_ID_SIZE + 4;
/// Composite buffer: both windows, the 8-byte trailer offset, and the
/// trailer itself.
const COMPOSITE_SIZE: usize = CRC_WINDOW * 2 + 8 + TRAILER_SIZE;

/// The torrent7z identifier with its version byte (index 16) zeroed;
/// the version is wildcarded during comparison.
const T7Z_ID: [u8; T7Z_ID_SIZE] = [
    0xA9, 0x9F, 0xD1, 0x57, 0x08, 0xA9, 0xD7, 0xEA, 0x29, 0x64, 0xB2, 0x36, 0x1B, 0x83, 0x52,
    0x33, 0x00, b't', b'o', b'r', b'r', b'e', b'n', b't', b'7', b'z', b'_', b'0', b'.', b'9',
    b'b', b'e', b't', b'a',
];

fn read_up_to(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Checks whether the file carries a valid torrent7z trailer.
pub fn detect(file: &mut File) -> Result<bool> {
    let file_len = file.metadata()?.len();
    if file_len < TRAILER_SIZE as u64 {
        return Ok(false);
    }

    let mut buffer = [0u8; COMPOSITE_SIZE];

    // First window, zero-padded for short files
    file.seek(SeekFrom::Start(0))?;
    read_up_to(file, &mut buffer[..CRC_WINDOW])?;

    // Second window plus the trailer, read from the end
    let tail_len = CRC_WINDOW + TRAILER_SIZE;
    let tail_start = file_len.saturating_sub(tail_len as u64);
    file.seek(SeekFrom::Start(tail_start))?;
    let mut read = read_up_to(file, &mut buffer[CRC_WINDOW..CRC_WINDOW + tail_len])?;

    if read < tail_len {
        // Short file: slide the trailer into its fixed slot and zero the
        // gap in the second window
        if read >= TRAILER_SIZE {
            read -= TRAILER_SIZE;
        }
        if read < SIGNATURE.len() {
            read = SIGNATURE.len();
        }
        for b in &mut buffer[CRC_WINDOW + read..CRC_WINDOW * 2] {
            *b = 0;
        }
        buffer.copy_within(
            CRC_WINDOW + read..CRC_WINDOW + read + TRAILER_SIZE,
            CRC_WINDOW * 2 + 8,
        );
    } else {
        buffer.copy_within(
            CRC_WINDOW * 2..CRC_WINDOW * 2 + TRAILER_SIZE,
            CRC_WINDOW * 2 + 8,
        );
    }

    // The trailer's own offset participates in the digest (low 32 bits)
    let trailer_offset = file_len - TRAILER_SIZE as u64;
    buffer[CRC_WINDOW * 2..CRC_WINDOW * 2 + 4]
        .copy_from_slice(&(trailer_offset as u32).to_le_bytes());
    buffer[CRC_WINDOW * 2 + 4..CRC_WINDOW * 2 + 8].copy_from_slice(&[0; 4]);

    if buffer[..SIGNATURE.len()] != *SIGNATURE {
        return Ok(false);
    }

    let id_offset = CRC_WINDOW * 2 + 8 + 4;
    let mut expected_id = T7Z_ID;
    expected_id[16] = buffer[id_offset + 16];
    if buffer[id_offset..id_offset + T7Z_ID_SIZE] != expected_id {
        return Ok(false);
    }

    let crc_offset = CRC_WINDOW * 2 + 8;
    let stored_crc =
        u32::from_le_bytes(buffer[crc_offset..crc_offset + 4].try_into().unwrap());
    buffer[crc_offset..crc_offset + 4].copy_from_slice(&[0xFF; 4]);

    Ok(Crc32::compute(&buffer) == stored_crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Builds a synthetic archive body with a freshly computed torrent7z
    /// trailer appended.
    fn write_t7z_fixture(path: &std::path::Path, body: &[u8], corrupt: bool) {
        let mut content = body.to_vec();
        // 4 CRC placeholder bytes followed by the identifier (version 1)
        let mut id = T7Z_ID;
        id[16] = 0x01;
        content.extend_from_slice(&[0xFF; 4]);
        content.extend_from_slice(&id);

        // Reproduce the composite used by the detector
        let mut composite = vec![0u8; COMPOSITE_SIZE];
        let head = body.len().min(CRC_WINDOW);
        composite[..head].copy_from_slice(&content[..head]);

        let trailer_offset = content.len() - TRAILER_SIZE;
        let window_start = trailer_offset.saturating_sub(CRC_WINDOW);
        let window = &content[window_start..trailer_offset];
        composite[CRC_WINDOW..CRC_WINDOW + window.len()].copy_from_slice(window);

        composite[CRC_WINDOW * 2..CRC_WINDOW * 2 + 4]
            .copy_from_slice(&(trailer_offset as u32).to_le_bytes());
        composite[CRC_WINDOW * 2 + 8..].copy_from_slice(&content[trailer_offset..]);

        let crc = Crc32::compute(&composite);
        let trailer_crc = if corrupt { crc ^ 1 } else { crc };
        content[trailer_offset..trailer_offset + 4].copy_from_slice(&trailer_crc.to_le_bytes());

        let mut file = File::create(path).unwrap();
        file.write_all(&content).unwrap();
    }

    fn seven_zip_body(len: usize) -> Vec<u8> {
        let mut body = SIGNATURE.to_vec();
        body.extend((0..len.saturating_sub(6)).map(|i| (i * 31 % 251) as u8));
        body
    }

    #[test]
    fn test_detect_valid_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valid.7z");
        write_t7z_fixture(&path, &seven_zip_body(600), false);

        let mut file = File::open(&path).unwrap();
        assert!(detect(&mut file).unwrap());
    }

    #[test]
    fn test_detect_corrupted_trailer_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.7z");
        write_t7z_fixture(&path, &seven_zip_body(600), true);

        let mut file = File::open(&path).unwrap();
        assert!(!detect(&mut file).unwrap());
    }

    #[test]
    fn test_detect_plain_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.7z");
        std::fs::write(&path, seven_zip_body(600)).unwrap();

        let mut file = File::open(&path).unwrap();
        assert!(!detect(&mut file).unwrap());
    }

    #[test]
    fn test_detect_mutated_body_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mutated.7z");
        write_t7z_fixture(&path, &seven_zip_body(600), false);

        // Flip one byte inside the leading CRC window
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[64] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let mut file = File::open(&path).unwrap();
        assert!(!detect(&mut file).unwrap());
    }

    #[test]
    fn test_detect_tiny_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.7z");
        std::fs::write(&path, b"7z").unwrap();

        let mut file = File::open(&path).unwrap();
        assert!(!detect(&mut file).unwrap());
    }
}
