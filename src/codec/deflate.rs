//! DEFLATE codec wrappers.
//!
//! The ZIP write path always uses maximum compression: TorrentZip output
//! bytes must depend only on entry content and names, so the level is not
//! configurable.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::bufread::DeflateDecoder as FlateDecoder;
use flate2::write::DeflateEncoder as FlateEncoder;

/// Raw DEFLATE decoder.
pub struct DeflateDecoder<R> {
    inner: FlateDecoder<R>,
}

impl<R> std::fmt::Debug for DeflateDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateDecoder").finish_non_exhaustive()
    }
}

impl<R: io::BufRead> DeflateDecoder<R> {
    /// Creates a new DEFLATE decoder over a buffered source.
    pub fn new(input: R) -> Self {
        Self {
            inner: FlateDecoder::new(input),
        }
    }
}

impl<R: io::BufRead> Read for DeflateDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Raw DEFLATE encoder at maximum compression.
pub struct DeflateEncoder<W: Write> {
    inner: FlateEncoder<W>,
}

impl<W: Write> std::fmt::Debug for DeflateEncoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateEncoder").finish_non_exhaustive()
    }
}

impl<W: Write> DeflateEncoder<W> {
    /// Creates a new maximum-compression DEFLATE encoder.
    pub fn new(output: W) -> Self {
        Self {
            inner: FlateEncoder::new(output, Compression::best()),
        }
    }

    /// Finishes the stream and returns the underlying writer.
    pub fn finish(self) -> io::Result<W> {
        self.inner.finish()
    }
}

impl<W: Write> Write for DeflateEncoder<W> {
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
    use std::io::{BufReader, Cursor};

    #[test]
    fn test_deflate_roundtrip() {
        let plain = b"deterministic bytes, deterministic bytes".repeat(20);

        let mut encoder = DeflateEncoder::new(Vec::new());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();
        assert!(compressed.len() < plain.len());

        let mut decoder = DeflateDecoder::new(BufReader::new(Cursor::new(compressed)));
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn test_deflate_deterministic() {
        let plain = b"same input, same output";

        let mut enc1 = DeflateEncoder::new(Vec::new());
        enc1.write_all(plain).unwrap();
        let out1 = enc1.finish().unwrap();

        let mut enc2 = DeflateEncoder::new(Vec::new());
        enc2.write_all(plain).unwrap();
        let out2 = enc2.finish().unwrap();

        assert_eq!(out1, out2);
    }
}
