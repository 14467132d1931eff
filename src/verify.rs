//! Concurrent multi-hash verification pipeline.
//!
//! Deep scans stream an entry's decompressed bytes through CRC-32, MD5,
//! and SHA-1 simultaneously. One read-ahead worker decodes the next block
//! while three hash workers consume the current one; every handoff is a
//! rendezvous carrying exactly one buffer/size pair, so progress is
//! step-locked and no worker runs ahead by more than one block. Two
//! buffers are recycled between the reader and the dispatcher.
//!
//! Zero-length and directory entries never touch the decode path; they
//! receive [`EntryHashes::empty`].

use std::io::{self, Read};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use md5::{Digest, Md5};
use sha1::Sha1;

/// Block size for one pipeline handoff.
const BLOCK_SIZE: usize = 1 << 20;

/// The three digests computed for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHashes {
    /// CRC-32 of the decompressed bytes.
    pub crc32: u32,
    /// MD5 of the decompressed bytes.
    pub md5: [u8; 16],
    /// SHA-1 of the decompressed bytes.
    pub sha1: [u8; 20],
}

impl EntryHashes {
    /// The well-known digests of the empty byte sequence.
    pub fn empty() -> Self {
        Self {
            crc32: 0,
            md5: [
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec,
                0xf8, 0x42, 0x7e,
            ],
            sha1: [
                0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95,
                0x60, 0x18, 0x90, 0xaf, 0xd8, 0x07, 0x09,
            ],
        }
    }
}

/// Reads until `buf` is full or the stream ends; returns the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Hashes a stream to completion through the concurrent pipeline.
///
/// Returns the digests and the total number of bytes consumed. A failure
/// in the read-ahead worker (decode error mid-stream) is returned as the
/// underlying `io::Error`.
pub fn hash_stream<R: Read + Send>(mut reader: R) -> io::Result<(EntryHashes, u64)> {
    type Block = (Arc<Vec<u8>>, usize);

    thread::scope(|s| {
        let (filled_tx, filled_rx) = bounded::<io::Result<(Vec<u8>, usize)>>(1);
        let (recycle_tx, recycle_rx) = bounded::<Vec<u8>>(2);

        recycle_tx.send(vec![0u8; BLOCK_SIZE]).expect("seed buffer");
        recycle_tx.send(vec![0u8; BLOCK_SIZE]).expect("seed buffer");

        // Read-ahead worker: at most one decoded block in flight.
        s.spawn(move || {
            while let Ok(mut buf) = recycle_rx.recv() {
                match read_full(&mut reader, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let last = n < buf.len();
                        if filled_tx.send(Ok((buf, n))).is_err() || last {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = filled_tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        let (crc_tx, crc_rx) = bounded::<Block>(0);
        let (crc_done_tx, crc_done_rx) = bounded::<()>(0);
        let crc_worker = s.spawn(move || {
            let mut hasher = crc32fast::Hasher::new();
            while let Ok((block, size)) = crc_rx.recv() {
                hasher.update(&block[..size]);
                drop(block);
                if crc_done_tx.send(()).is_err() {
                    break;
                }
            }
            hasher.finalize()
        });

        let (md5_tx, md5_rx) = bounded::<Block>(0);
        let (md5_done_tx, md5_done_rx) = bounded::<()>(0);
        let md5_worker = s.spawn(move || {
            let mut hasher = Md5::new();
            while let Ok((block, size)) = md5_rx.recv() {
                hasher.update(&block[..size]);
                drop(block);
                if md5_done_tx.send(()).is_err() {
                    break;
                }
            }
            let digest: [u8; 16] = hasher.finalize().into();
            digest
        });

        let (sha1_tx, sha1_rx) = bounded::<Block>(0);
        let (sha1_done_tx, sha1_done_rx) = bounded::<()>(0);
        let sha1_worker = s.spawn(move || {
            let mut hasher = Sha1::new();
            while let Ok((block, size)) = sha1_rx.recv() {
                hasher.update(&block[..size]);
                drop(block);
                if sha1_done_tx.send(()).is_err() {
                    break;
                }
            }
            let digest: [u8; 20] = hasher.finalize().into();
            digest
        });

        let mut total = 0u64;
        let mut failure: Option<io::Error> = None;

        for msg in filled_rx.iter() {
            match msg {
                Ok((buf, size)) => {
                    total += size as u64;
                    let block = Arc::new(buf);

                    let sent = crc_tx.send((block.clone(), size)).is_ok()
                        && md5_tx.send((block.clone(), size)).is_ok()
                        && sha1_tx.send((block.clone(), size)).is_ok();
                    if !sent {
                        break;
                    }

                    let done = crc_done_rx.recv().is_ok()
                        && md5_done_rx.recv().is_ok()
                        && sha1_done_rx.recv().is_ok();
                    if !done {
                        break;
                    }

                    if let Ok(buf) = Arc::try_unwrap(block) {
                        let _ = recycle_tx.send(buf);
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        drop(crc_tx);
        drop(md5_tx);
        drop(sha1_tx);
        drop(recycle_tx);
        // A worker stuck in its completion handoff sees the disconnect
        drop(crc_done_rx);
        drop(md5_done_rx);
        drop(sha1_done_rx);

        let crc32 = crc_worker.join().expect("crc worker panicked");
        let md5 = md5_worker.join().expect("md5 worker panicked");
        let sha1 = sha1_worker.join().expect("sha1 worker panicked");

        match failure {
            Some(e) => Err(e),
            None => Ok((EntryHashes { crc32, md5, sha1 }, total)),
        }
    })
}
