//! Folder decode-graph resolution.
//!
//! A folder's coders and bind pairs describe a decode graph without any
//! required ordering. Resolution builds one input slot per coder input,
//! assigns each slot a source (another coder's output via a bind pair, or
//! raw packed bytes), then repeatedly scans for coders whose inputs are
//! all available until every coder is constructed. The unique coder
//! output no bind pair consumes is the folder's decompressed output.
//!
//! Resolution is a pure function: it consumes the packed-stream readers
//! and returns a fresh decode stream owned by the caller. No resolver
//! state is kept on the folder.

use std::io::Read;

use crate::codec::{self, method};
use crate::{Error, Result};

use super::streams::Folder;

/// A boxed byte stream feeding or produced by a coder.
pub type ByteStream = Box<dyn Read + Send>;

/// Where one coder input gets its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputSource {
    /// Fed by the coder output with this global index.
    CoderOutput(usize),
    /// Fed by the packed stream with this folder-local index.
    PackedStream(usize),
    /// No source; resolving such a folder is an error.
    Unbound,
}

/// Resolves a folder's decode graph over its packed-stream readers,
/// returning the folder's final output stream.
///
/// `packed` must hold one reader per folder packed-stream index, in
/// pack-table order.
pub fn resolve_folder(folder: &Folder, packed: Vec<ByteStream>) -> Result<ByteStream> {
    if packed.len() != folder.packed_stream_indices.len() {
        return Err(Error::DecodeError(format!(
            "folder expects {} packed streams, got {}",
            folder.packed_stream_indices.len(),
            packed.len()
        )));
    }

    // Unknown methods are surfaced before any construction starts
    for coder in &folder.coders {
        let known = matches!(
            coder.method_id.as_slice(),
            method::COPY | method::LZMA | method::LZMA2 | method::BZIP2 | method::BCJ_X86
        ) || coder.method_id.as_slice() == method::BCJ2;
        if !known {
            return Err(Error::UnsupportedCompression {
                method_id: method::id_u64(&coder.method_id),
            });
        }
    }

    let total_in = folder.total_in_streams() as usize;
    let total_out = folder.total_out_streams() as usize;

    // Wire up every input slot
    let mut sources = vec![InputSource::Unbound; total_in];
    for bp in &folder.bind_pairs {
        sources[bp.in_index as usize] = InputSource::CoderOutput(bp.out_index as usize);
    }
    for (packed_idx, &in_index) in folder.packed_stream_indices.iter().enumerate() {
        sources[in_index as usize] = InputSource::PackedStream(packed_idx);
    }
    if sources.contains(&InputSource::Unbound) {
        return Err(Error::DecodeError("coder input has no source".into()));
    }

    let mut packed: Vec<Option<ByteStream>> = packed.into_iter().map(Some).collect();
    let mut outputs: Vec<Option<ByteStream>> = (0..total_out).map(|_| None).collect();
    let mut resolved = vec![false; folder.coders.len()];

    // Global stream offsets per coder
    let mut in_offsets = Vec::with_capacity(folder.coders.len());
    let mut out_offsets = Vec::with_capacity(folder.coders.len());
    let (mut in_offset, mut out_offset) = (0usize, 0usize);
    for coder in &folder.coders {
        in_offsets.push(in_offset);
        out_offsets.push(out_offset);
        in_offset += coder.num_in_streams as usize;
        out_offset += coder.num_out_streams as usize;
    }

    // Fixed-point iteration: coders and bind pairs need not be stored in
    // dependency order
    loop {
        let mut progress = false;

        for (idx, coder) in folder.coders.iter().enumerate() {
            if resolved[idx] {
                continue;
            }

            let num_in = coder.num_in_streams as usize;
            let slot_range = in_offsets[idx]..in_offsets[idx] + num_in;

            let available = slot_range.clone().all(|slot| match sources[slot] {
                InputSource::CoderOutput(out) => outputs[out].is_some(),
                InputSource::PackedStream(p) => packed[p].is_some(),
                InputSource::Unbound => false,
            });
            if !available {
                continue;
            }

            let mut inputs: Vec<ByteStream> = Vec::with_capacity(num_in);
            for slot in slot_range {
                let stream = match sources[slot] {
                    InputSource::CoderOutput(out) => outputs[out].take(),
                    InputSource::PackedStream(p) => packed[p].take(),
                    InputSource::Unbound => None,
                };
                inputs.push(stream.expect("input availability checked above"));
            }

            if coder.num_out_streams != 1 {
                return Err(Error::DecodeError(format!(
                    "coder with {} outputs is not supported",
                    coder.num_out_streams
                )));
            }
            let out_index = out_offsets[idx];
            let unpack_size = folder
                .unpack_sizes
                .get(out_index)
                .copied()
                .ok_or_else(|| Error::DecodeError("missing coder unpack size".into()))?;

            let decoder: ByteStream = if coder.method_id.as_slice() == method::BCJ2 {
                if inputs.len() != 4 {
                    return Err(Error::DecodeError(format!(
                        "BCJ2 coder requires 4 inputs, found {}",
                        inputs.len()
                    )));
                }
                let mut it = inputs.into_iter();
                let (main, call, jump, range) = (
                    it.next().unwrap(),
                    it.next().unwrap(),
                    it.next().unwrap(),
                    it.next().unwrap(),
                );
                Box::new(codec::Bcj2Decoder::new(main, call, jump, range)?)
            } else {
                if inputs.len() != 1 {
                    return Err(Error::DecodeError(format!(
                        "coder {} requires 1 input, found {}",
                        method::name(&coder.method_id),
                        inputs.len()
                    )));
                }
                let input = inputs.into_iter().next().unwrap();
                Box::new(codec::build_decoder(
                    input,
                    &coder.method_id,
                    coder.properties.as_deref().unwrap_or(&[]),
                    unpack_size,
                )?)
            };

            outputs[out_index] = Some(decoder);
            resolved[idx] = true;
            progress = true;
        }

        if resolved.iter().all(|&r| r) {
            break;
        }
        if !progress {
            return Err(Error::DecodeError(
                "coder graph contains an unresolvable cycle".into(),
            ));
        }
    }

    let final_output = folder
        .final_output_index()
        .ok_or_else(|| Error::DecodeError("folder has no unused coder output".into()))?;
    outputs[final_output as usize]
        .take()
        .ok_or_else(|| Error::DecodeError("folder output consumed by a bind pair".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{LzmaEncoder, LzmaEncoderOptions};
    use crate::sevenzip::streams::{BindPair, Coder, SubStream};
    use std::io::{Cursor, Write};

    fn lzma_compress(plain: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let opts = LzmaEncoderOptions::default();
        let mut compressed = Vec::new();
        let mut encoder = LzmaEncoder::new(&mut compressed, &opts).unwrap();
        encoder.write_all(plain).unwrap();
        encoder.finish().unwrap();
        (compressed, opts.properties())
    }

    fn single_coder(method_id: &[u8], properties: Option<Vec<u8>>) -> Coder {
        Coder {
            method_id: method_id.to_vec(),
            num_in_streams: 1,
            num_out_streams: 1,
            properties,
        }
    }

    #[test]
    fn test_resolve_single_lzma_folder() {
        let plain = b"folder resolution payload".repeat(30);
        let (compressed, props) = lzma_compress(&plain);

        let folder = Folder {
            coders: vec![single_coder(method::LZMA, Some(props))],
            packed_stream_indices: vec![0],
            unpack_sizes: vec![plain.len() as u64],
            substreams: vec![SubStream {
                size: plain.len() as u64,
                crc: None,
            }],
            ..Folder::default()
        };

        let mut out = resolve_folder(&folder, vec![Box::new(Cursor::new(compressed))]).unwrap();
        let mut decoded = Vec::new();
        out.read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn test_resolve_lzma_bcj_chain() {
        // Plain x86-free bytes: the BCJ transform is the identity, so the
        // chain output must reproduce the LZMA plaintext exactly.
        let plain: Vec<u8> = (0..2000u32).map(|i| (i % 199) as u8).collect();
        let (compressed, props) = lzma_compress(&plain);

        // Coder 0 = BCJ (inputs slot 0), coder 1 = LZMA (input slot 1).
        // Bind pair: BCJ input 0 <- LZMA output 1. Packed bytes feed
        // input slot 1.
        let folder = Folder {
            coders: vec![
                single_coder(method::BCJ_X86, None),
                single_coder(method::LZMA, Some(props)),
            ],
            bind_pairs: vec![BindPair {
                in_index: 0,
                out_index: 1,
            }],
            packed_stream_indices: vec![1],
            unpack_sizes: vec![plain.len() as u64, plain.len() as u64],
            ..Folder::default()
        };

        // BCJ's output (index 0) is the final output
        assert_eq!(folder.final_output_index(), Some(0));

        let mut out = resolve_folder(&folder, vec![Box::new(Cursor::new(compressed))]).unwrap();
        let mut decoded = Vec::new();
        out.read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn test_resolve_out_of_order_coders() {
        // Same chain as above but with the coders stored LZMA-first;
        // resolution order must not depend on storage order.
        let plain = b"order independence".repeat(64);
        let (compressed, props) = lzma_compress(&plain);

        let folder = Folder {
            coders: vec![
                single_coder(method::LZMA, Some(props)),
                single_coder(method::BCJ_X86, None),
            ],
            bind_pairs: vec![BindPair {
                in_index: 1,
                out_index: 0,
            }],
            packed_stream_indices: vec![0],
            unpack_sizes: vec![plain.len() as u64, plain.len() as u64],
            ..Folder::default()
        };

        assert_eq!(folder.final_output_index(), Some(1));

        let mut out = resolve_folder(&folder, vec![Box::new(Cursor::new(compressed))]).unwrap();
        let mut decoded = Vec::new();
        out.read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn test_resolve_unknown_method() {
        let folder = Folder {
            coders: vec![single_coder(&[0x03, 0x04, 0x01], None)], // PPMd
            packed_stream_indices: vec![0],
            unpack_sizes: vec![10],
            ..Folder::default()
        };

        let err =
            resolve_folder(&folder, vec![Box::new(Cursor::new(Vec::new()))]).err().unwrap();
        assert!(matches!(err, Error::UnsupportedCompression { .. }));
    }

    #[test]
    fn test_resolve_packed_stream_count_mismatch() {
        let folder = Folder {
            coders: vec![single_coder(method::COPY, None)],
            packed_stream_indices: vec![0],
            unpack_sizes: vec![0],
            ..Folder::default()
        };

        let err = resolve_folder(&folder, Vec::new()).err().unwrap();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[test]
    fn test_resolve_unreachable_input() {
        // Two coders, no bind pair and no packed assignment for coder 1
        let folder = Folder {
            coders: vec![
                single_coder(method::COPY, None),
                single_coder(method::COPY, None),
            ],
            packed_stream_indices: vec![0],
            unpack_sizes: vec![4, 4],
            ..Folder::default()
        };

        let err = resolve_folder(
            &folder,
            vec![Box::new(Cursor::new(b"data".to_vec()))],
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::DecodeError(_)));
    }
}
