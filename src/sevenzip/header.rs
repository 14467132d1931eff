//! Top-level 7z header parsing.
//!
//! The next-header block is either a plain tagged-property stream or an
//! "encoded header": a streams-info section describing a single-coder
//! folder whose decoded output is the real header.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::checksum::Crc32;
use crate::codec;
use crate::{Error, Result};

use super::files::FilesInfo;
use super::property_id;
use super::reader::read_u8;
use super::signature::{SIGNATURE_HEADER_SIZE, SignatureHeader};
use super::streams::StreamsInfo;

/// Parsed archive header.
#[derive(Debug, Clone, Default)]
pub struct ArchiveHeader {
    /// Main streams section (absent for archives without data).
    pub streams_info: Option<StreamsInfo>,
    /// Files section (absent for entry-less archives).
    pub files_info: Option<FilesInfo>,
}

/// Reads and parses the archive header located by the signature header.
///
/// The header bytes are verified against the signature header's CRC
/// before parsing; encoded headers are decompressed through their
/// single-coder folder first.
pub fn read_archive_header(file: &mut File, signature: &SignatureHeader) -> Result<ArchiveHeader> {
    if signature.next_header_size == 0 {
        return Ok(ArchiveHeader::default());
    }

    file.seek(SeekFrom::Start(signature.next_header_position()))?;
    let mut header_bytes = vec![0u8; signature.next_header_size as usize];
    file.read_exact(&mut header_bytes)?;

    let actual_crc = Crc32::compute(&header_bytes);
    if actual_crc != signature.next_header_crc {
        return Err(Error::CentralDirError(format!(
            "header CRC mismatch: expected {:#010x}, got {actual_crc:#010x}",
            signature.next_header_crc
        )));
    }

    let mut cursor = Cursor::new(header_bytes.as_slice());
    match read_u8(&mut cursor)? {
        property_id::HEADER => parse_header_body(&mut cursor),

        property_id::ENCODED_HEADER => {
            let streams_info = StreamsInfo::parse(&mut cursor)?;
            let decoded = decode_header(file, &streams_info)?;

            let mut inner = Cursor::new(decoded.as_slice());
            match read_u8(&mut inner)? {
                property_id::HEADER => parse_header_body(&mut inner),
                tag => Err(Error::CentralDirError(format!(
                    "unexpected marker {tag:#x} in decoded header"
                ))),
            }
        }

        tag => Err(Error::CentralDirError(format!(
            "unexpected header marker {tag:#x}"
        ))),
    }
}

/// Parses the body of a plain header (after the header marker).
fn parse_header_body<R: Read>(r: &mut R) -> Result<ArchiveHeader> {
    let mut header = ArchiveHeader::default();

    loop {
        let tag = read_u8(r)?;
        match tag {
            property_id::END => break,
            property_id::MAIN_STREAMS_INFO => {
                header.streams_info = Some(StreamsInfo::parse(r)?);
            }
            property_id::FILES_INFO => {
                header.files_info = Some(FilesInfo::parse(r)?);
            }
            _ => {
                return Err(Error::CentralDirError(format!(
                    "unexpected property {tag:#x} in header"
                )));
            }
        }
    }

    Ok(header)
}

/// Decompresses an encoded header through its single-coder folder.
fn decode_header(file: &mut File, streams_info: &StreamsInfo) -> Result<Vec<u8>> {
    let folder = match streams_info.folders.as_slice() {
        [folder] => folder,
        _ => {
            return Err(Error::CentralDirError(
                "encoded header must use exactly one folder".into(),
            ));
        }
    };
    let [coder] = folder.coders.as_slice() else {
        return Err(Error::CentralDirError(
            "encoded header must use exactly one coder".into(),
        ));
    };
    let packed = streams_info.packed_streams.first().ok_or_else(|| {
        Error::CentralDirError("encoded header missing its packed stream".into())
    })?;

    file.seek(SeekFrom::Start(
        SIGNATURE_HEADER_SIZE + streams_info.pack_position + packed.position,
    ))?;
    let mut packed_bytes = vec![0u8; packed.packed_size as usize];
    file.read_exact(&mut packed_bytes)?;

    let unpack_size = folder.final_unpack_size();
    let mut decoder = codec::build_decoder(
        Cursor::new(packed_bytes),
        &coder.method_id,
        coder.properties.as_deref().unwrap_or(&[]),
        unpack_size,
    )?;

    let mut decoded = Vec::with_capacity(unpack_size as usize);
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::DecodeError(format!("encoded header: {e}")))?;

    if let Some(expected) = folder.unpack_crc {
        let actual = Crc32::compute(&decoded);
        if actual != expected {
            return Err(Error::CentralDirError(format!(
                "encoded header CRC mismatch: expected {expected:#010x}, got {actual:#010x}"
            )));
        }
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_header_body() {
        let data = [property_id::END];
        let header = parse_header_body(&mut Cursor::new(&data[..])).unwrap();
        assert!(header.streams_info.is_none());
        assert!(header.files_info.is_none());
    }

    #[test]
    fn test_parse_header_body_rejects_unknown() {
        let data = [property_id::ARCHIVE_PROPERTIES, property_id::END];
        let err = parse_header_body(&mut Cursor::new(&data[..])).unwrap_err();
        assert!(matches!(err, Error::CentralDirError(_)));
    }
}
