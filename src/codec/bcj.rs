//! BCJ x86 filter decoder.
//!
//! BCJ converts relative CALL/JMP targets in x86 code to absolute
//! addresses before compression; decoding reverses the transform. It sits
//! behind a decompressor in a folder's coder chain (LZMA output feeds the
//! BCJ input through a bind pair).

use std::io::{self, Read};

use lzma_rust2::filter::bcj::BcjReader;

use super::{Decoder, method};

/// BCJ x86 filter decoder.
pub struct BcjX86Decoder<R> {
    inner: BcjReader<R>,
}

impl<R> std::fmt::Debug for BcjX86Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BcjX86Decoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> BcjX86Decoder<R> {
    /// Creates a new BCJ x86 filter decoder.
    pub fn new(input: R) -> Self {
        Self {
            inner: BcjReader::new_x86(input, 0),
        }
    }
}

impl<R: Read + Send> Read for BcjX86Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for BcjX86Decoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::BCJ_X86
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_bcj_x86_passthrough_non_code() {
        // Bytes with no E8/E9 opcodes pass through unchanged.
        let data = vec![0x00u8, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];
        let mut decoder = BcjX86Decoder::new(Cursor::new(data.clone()));
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_bcj_x86_method_id() {
        let decoder = BcjX86Decoder::new(Cursor::new(Vec::<u8>::new()));
        assert_eq!(decoder.method_id(), method::BCJ_X86);
    }
}
