//! Compression codec infrastructure.
//!
//! The canonicalizer treats codecs as opaque stream transformers: a
//! decoder turns a compressed byte stream into the original bytes, an
//! encoder does the reverse. This module provides the dispatch from 7z
//! method identifiers to concrete decoder constructors; the ZIP side only
//! ever needs DEFLATE and store.

pub mod bcj;
pub mod bcj2;
pub mod bzip2;
pub mod copy;
pub mod deflate;
pub mod lzma;

use std::io::{self, Read};

use crate::{Error, Result};

pub use bcj::BcjX86Decoder;
pub use bcj2::Bcj2Decoder;
pub use bzip2::Bzip2Decoder;
pub use copy::CopyDecoder;
pub use deflate::{DeflateDecoder, DeflateEncoder};
pub use lzma::{Lzma2Decoder, LzmaDecoder, LzmaEncoder, LzmaEncoderOptions};

/// A decoder that reads compressed data and produces uncompressed output.
pub trait Decoder: Read + Send {
    /// Returns the 7z method ID for this decoder.
    fn method_id(&self) -> &'static [u8];
}

impl std::fmt::Debug for dyn Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("method_id", &self.method_id())
            .finish()
    }
}

/// 7z method identifiers for the supported coder set.
pub mod method {
    /// Copy (no compression).
    pub const COPY: &[u8] = &[0x00];
    /// LZMA compression.
    pub const LZMA: &[u8] = &[0x03, 0x01, 0x01];
    /// LZMA2 compression.
    pub const LZMA2: &[u8] = &[0x21];
    /// BZip2 compression.
    pub const BZIP2: &[u8] = &[0x04, 0x02, 0x02];
    /// BCJ (x86) filter.
    pub const BCJ_X86: &[u8] = &[0x03, 0x03, 0x01, 0x03];
    /// BCJ2 (4-stream x86) filter.
    pub const BCJ2: &[u8] = &[0x03, 0x03, 0x01, 0x1B];

    /// Returns a human-readable name for a method ID.
    pub fn name(id: &[u8]) -> &'static str {
        match id {
            COPY => "Copy",
            LZMA => "LZMA",
            LZMA2 => "LZMA2",
            BZIP2 => "BZip2",
            BCJ_X86 => "BCJ (x86)",
            BCJ2 => "BCJ2",
            _ => "Unknown",
        }
    }

    /// Packs a method ID into a u64 for error reporting.
    pub fn id_u64(id: &[u8]) -> u64 {
        id.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }
}

/// Builds a decoder for a single-input coder.
///
/// BCJ2 takes four input streams and is constructed directly by the graph
/// resolver; passing its method ID here is an error.
///
/// # Arguments
///
/// * `input` - The compressed data source
/// * `method_id` - Coder method identifier from the archive header
/// * `properties` - Opaque coder properties blob
/// * `unpack_size` - Exact size of this coder's decoded output
pub fn build_decoder<R: Read + Send + 'static>(
    input: R,
    method_id: &[u8],
    properties: &[u8],
    unpack_size: u64,
) -> Result<Box<dyn Decoder>> {
    match method_id {
        method::COPY => Ok(Box::new(CopyDecoder::new(input, unpack_size))),
        method::LZMA => Ok(Box::new(LzmaDecoder::new(input, properties, unpack_size)?)),
        method::LZMA2 => Ok(Box::new(Lzma2Decoder::new(input, properties)?)),
        method::BZIP2 => Ok(Box::new(Bzip2Decoder::new(input))),
        method::BCJ_X86 => Ok(Box::new(BcjX86Decoder::new(input))),
        _ => Err(Error::UnsupportedCompression {
            method_id: method::id_u64(method_id),
        }),
    }
}

/// Maps a codec-internal error into `io::Error` for `Read` impls.
pub(crate) fn codec_io_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_method_names() {
        assert_eq!(method::name(method::LZMA), "LZMA");
        assert_eq!(method::name(method::BCJ2), "BCJ2");
        assert_eq!(method::name(&[0x09, 0x09]), "Unknown");
    }

    #[test]
    fn test_method_id_u64() {
        assert_eq!(method::id_u64(method::LZMA), 0x030101);
        assert_eq!(method::id_u64(method::LZMA2), 0x21);
        assert_eq!(method::id_u64(method::BCJ2), 0x0303011B);
    }

    #[test]
    fn test_build_decoder_copy() {
        let data = b"raw bytes";
        let mut dec =
            build_decoder(Cursor::new(data.to_vec()), method::COPY, &[], data.len() as u64)
                .unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_build_decoder_unknown_method() {
        let err = build_decoder(Cursor::new(vec![]), &[0x03, 0x04, 0x01], &[], 0).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedCompression { method_id: 0x030401 }
        ));
    }
}
