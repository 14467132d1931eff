//! LZMA and LZMA2 codec wrappers.
//!
//! 7z LZMA streams carry no end marker, so decoders are constructed with
//! the exact output size from the folder's unpack-size table. The encoder
//! exposes its 5-byte properties blob for embedding in output headers.

use std::io::{self, Read, Write};

use crate::{Error, Result};

use super::{Decoder, codec_io_error, method};

/// LZMA decoder.
pub struct LzmaDecoder<R> {
    inner: lzma_rust2::LzmaReader<R>,
}

impl<R> std::fmt::Debug for LzmaDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaDecoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> LzmaDecoder<R> {
    /// Creates a new LZMA decoder.
    ///
    /// `properties` is the 5-byte 7z blob: one packed lc/lp/pb byte
    /// followed by the little-endian dictionary size.
    pub fn new(input: R, properties: &[u8], unpack_size: u64) -> Result<Self> {
        if properties.len() < 5 {
            return Err(Error::DecodeError(
                "LZMA properties too short (need 5 bytes)".into(),
            ));
        }

        let props_byte = properties[0];
        let dict_size = u32::from_le_bytes(properties[1..5].try_into().unwrap());

        let reader =
            lzma_rust2::LzmaReader::new_with_props(input, unpack_size, props_byte, dict_size, None)
                .map_err(|e| Error::Io(codec_io_error(e)))?;

        Ok(Self { inner: reader })
    }
}

impl<R: Read + Send> Read for LzmaDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for LzmaDecoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::LZMA
    }
}

/// LZMA2 decoder.
pub struct Lzma2Decoder<R> {
    inner: lzma_rust2::Lzma2Reader<R>,
}

impl<R> std::fmt::Debug for Lzma2Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lzma2Decoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> Lzma2Decoder<R> {
    /// Creates a new LZMA2 decoder from the 1-byte dictionary-size
    /// properties blob.
    pub fn new(input: R, properties: &[u8]) -> Result<Self> {
        let Some(&prop) = properties.first() else {
            return Err(Error::DecodeError("LZMA2 properties missing".into()));
        };

        let dict_size = decode_lzma2_dict_size(prop)?;
        let reader = lzma_rust2::Lzma2Reader::new(input, dict_size, None);

        Ok(Self { inner: reader })
    }
}

impl<R: Read + Send> Read for Lzma2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for Lzma2Decoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::LZMA2
    }
}

/// Decodes the LZMA2 dictionary size from the property byte.
fn decode_lzma2_dict_size(prop: u8) -> Result<u32> {
    if prop > 40 {
        return Err(Error::DecodeError(format!(
            "invalid LZMA2 dictionary size property: {prop}"
        )));
    }

    if prop == 40 {
        return Ok(0xFFFF_FFFF);
    }

    let base_log = (prop as u32) / 2 + 12;
    let dict_size = if prop % 2 == 0 {
        1u32 << base_log
    } else {
        3u32 << (base_log - 1)
    };

    Ok(dict_size)
}

/// LZMA encoder options.
///
/// The 7z writer compresses with a 16 MiB dictionary and an end marker,
/// matching the stream layout other TorrentZip-family tools emit.
#[derive(Debug, Clone)]
pub struct LzmaEncoderOptions {
    /// Compression preset level (0-9).
    pub preset: u32,
    /// Dictionary size in bytes.
    pub dict_size: u32,
}

impl Default for LzmaEncoderOptions {
    fn default() -> Self {
        Self {
            preset: 9,
            dict_size: 1 << 24,
        }
    }
}

impl LzmaEncoderOptions {
    fn to_lzma_options(&self) -> lzma_rust2::LzmaOptions {
        let mut opts = lzma_rust2::LzmaOptions::with_preset(self.preset);
        opts.dict_size = self.dict_size;
        opts
    }

    /// Returns the 5-byte LZMA properties blob for these options.
    pub fn properties(&self) -> Vec<u8> {
        let opts = self.to_lzma_options();
        let mut props = vec![opts.get_props()];
        props.extend_from_slice(&opts.dict_size.to_le_bytes());
        props
    }
}

/// LZMA encoder writing a raw (headerless) stream with an end marker.
pub struct LzmaEncoder<W: Write> {
    inner: lzma_rust2::LzmaWriter<W>,
}

impl<W: Write> std::fmt::Debug for LzmaEncoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaEncoder").finish_non_exhaustive()
    }
}

impl<W: Write + Send> LzmaEncoder<W> {
    /// Creates a new LZMA encoder.
    pub fn new(output: W, options: &LzmaEncoderOptions) -> Result<Self> {
        let lzma_opts = options.to_lzma_options();
        let writer = lzma_rust2::LzmaWriter::new_no_header(output, &lzma_opts, true)
            .map_err(|e| Error::Io(codec_io_error(e)))?;

        Ok(Self { inner: writer })
    }

    /// Finishes encoding and flushes all data to the underlying writer.
    pub fn finish(self) -> io::Result<()> {
        self.inner.finish().map_err(codec_io_error)?;
        Ok(())
    }
}

impl<W: Write + Send> Write for LzmaEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_lzma_properties_blob() {
        let opts = LzmaEncoderOptions::default();
        let props = opts.properties();
        assert_eq!(props.len(), 5);
        assert_eq!(&props[1..5], &(1u32 << 24).to_le_bytes());
    }

    #[test]
    fn test_lzma_roundtrip() {
        let plain = b"the quick brown fox jumps over the lazy dog".repeat(50);

        let opts = LzmaEncoderOptions::default();
        let mut compressed = Vec::new();
        let mut encoder = LzmaEncoder::new(&mut compressed, &opts).unwrap();
        encoder.write_all(&plain).unwrap();
        encoder.finish().unwrap();

        let mut decoder = LzmaDecoder::new(
            Cursor::new(compressed),
            &opts.properties(),
            plain.len() as u64,
        )
        .unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn test_lzma_short_properties_rejected() {
        let err = LzmaDecoder::new(Cursor::new(vec![]), &[0x5D, 0x00], 0).unwrap_err();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[test]
    fn test_lzma2_dict_size_decoding() {
        assert_eq!(decode_lzma2_dict_size(0).unwrap(), 1 << 12);
        assert_eq!(decode_lzma2_dict_size(1).unwrap(), 3 << 11);
        assert_eq!(decode_lzma2_dict_size(2).unwrap(), 1 << 13);
        assert_eq!(decode_lzma2_dict_size(40).unwrap(), 0xFFFF_FFFF);
        assert!(decode_lzma2_dict_size(41).is_err());
    }
}
