//! BCJ2 filter decoder.
//!
//! BCJ2 is the 4-stream variant of the x86 branch filter: the main stream
//! carries code with CALL/JMP target bytes removed, two side streams carry
//! the 32-bit targets (big-endian, CALL and JMP separately), and a fourth
//! stream holds range-coded selector bits saying which E8/E9/Jcc sites
//! were converted. The decoder merges all four back into the original
//! code.

use std::io::{self, BufReader, Read};

use crate::{Error, Result};

use super::{Decoder, method};

const NUM_MOVE_BITS: u32 = 5;
const NUM_BIT_MODEL_TOTAL_BITS: u32 = 11;
const BIT_MODEL_TOTAL: u32 = 1 << NUM_BIT_MODEL_TOTAL_BITS;
const TOP_VALUE: u32 = 1 << 24;
const INITIAL_PROB: u32 = BIT_MODEL_TOTAL / 2;

/// Range decoder for the BCJ2 selector stream.
#[derive(Debug)]
struct RangeDecoder<R> {
    reader: R,
    range: u32,
    code: u32,
}

impl<R: Read> RangeDecoder<R> {
    fn new(mut reader: R) -> Result<Self> {
        let mut code = 0u32;
        // 5 priming bytes; the first is shifted out entirely
        for _ in 0..5 {
            let mut byte = [0u8; 1];
            reader.read_exact(&mut byte).map_err(Error::Io)?;
            code = (code << 8) | byte[0] as u32;
        }

        Ok(Self {
            reader,
            range: 0xFFFF_FFFF,
            code,
        })
    }

    fn decode_bit(&mut self, prob: &mut u32) -> io::Result<u32> {
        let bound = (self.range >> NUM_BIT_MODEL_TOTAL_BITS) * *prob;

        let bit = if self.code < bound {
            self.range = bound;
            *prob += (BIT_MODEL_TOTAL - *prob) >> NUM_MOVE_BITS;
            0
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> NUM_MOVE_BITS;
            1
        };

        if self.range < TOP_VALUE {
            let mut byte = [0u8; 1];
            // EOF yields a zero byte, which is the correct range-coder
            // finale; real errors propagate.
            match self.reader.read(&mut byte) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(e),
            }
            self.code = (self.code << 8) | byte[0] as u32;
            self.range <<= 8;
        }

        Ok(bit)
    }
}

/// BCJ2 decoder merging 4 input streams into the original x86 code.
#[derive(Debug)]
pub struct Bcj2Decoder<R> {
    main: BufReader<R>,
    call: R,
    jump: R,
    range: RangeDecoder<R>,
    // 256 CALL contexts (keyed by previous byte) + 1 JMP + 1 Jcc
    probs: [u32; 258],
    prev_byte: u8,
    written: u32,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl<R: Read> Bcj2Decoder<R> {
    /// Creates a new BCJ2 decoder from the four input streams, in header
    /// order: main, call, jump, range-coded selector.
    pub fn new(main: R, call: R, jump: R, range: R) -> Result<Self> {
        Ok(Self {
            main: BufReader::new(main),
            call,
            jump,
            range: RangeDecoder::new(range)?,
            probs: [INITIAL_PROB; 258],
            prev_byte: 0,
            written: 0,
            buffer: Vec::with_capacity(1 << 16),
            buffer_pos: 0,
        })
    }

    #[inline]
    fn is_branch_site(prev: u8, curr: u8) -> bool {
        (curr & 0xFE) == 0xE8 || (prev == 0x0F && (curr & 0xF0) == 0x80)
    }

    #[inline]
    fn prob_index(prev: u8, curr: u8) -> usize {
        match curr {
            0xE8 => prev as usize,
            0xE9 => 256,
            _ => 257,
        }
    }

    fn fill_buffer(&mut self) -> io::Result<()> {
        self.buffer.clear();
        self.buffer_pos = 0;

        loop {
            let mut byte = [0u8; 1];
            match self.main.read(&mut byte) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
            let b = byte[0];

            self.written += 1;
            self.buffer.push(b);

            if Self::is_branch_site(self.prev_byte, b) {
                let idx = Self::prob_index(self.prev_byte, b);
                let converted = {
                    let mut prob = self.probs[idx];
                    let bit = self.range.decode_bit(&mut prob)?;
                    self.probs[idx] = prob;
                    bit == 1
                };

                if converted {
                    let side: &mut dyn Read = if b == 0xE8 {
                        &mut self.call
                    } else {
                        &mut self.jump
                    };

                    let mut dest_bytes = [0u8; 4];
                    side.read_exact(&mut dest_bytes)?;

                    // Absolute big-endian back to relative little-endian
                    let dest = u32::from_be_bytes(dest_bytes);
                    let relative = dest.wrapping_sub(self.written + 4);

                    self.buffer.extend_from_slice(&relative.to_le_bytes());
                    self.prev_byte = (relative >> 24) as u8;
                    self.written += 4;
                } else {
                    self.prev_byte = b;
                }
            } else {
                self.prev_byte = b;
            }

            if self.buffer.len() >= self.buffer.capacity() / 2 {
                return Ok(());
            }
        }
    }
}

impl<R: Read> Read for Bcj2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffer_pos >= self.buffer.len() {
            self.fill_buffer()?;
            if self.buffer.is_empty() {
                return Ok(0);
            }
        }

        let available = self.buffer.len() - self.buffer_pos;
        let to_copy = available.min(buf.len());
        buf[..to_copy].copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + to_copy]);
        self.buffer_pos += to_copy;

        Ok(to_copy)
    }
}

impl<R: Read + Send> Decoder for Bcj2Decoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::BCJ2
    }
}
