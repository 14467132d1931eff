//! # trrntzip
//!
//! A library and tool for normalizing ZIP and 7z archives into the
//! canonical byte-for-byte deterministic TorrentZip form, so that
//! archives holding identical file content produce identical container
//! bytes regardless of which tool originally built them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trrntzip::{Canonicalizer, Options, Result};
//!
//! fn main() -> Result<()> {
//!     let canonicalizer = Canonicalizer::new(Options::default())
//!         .with_log_callback(Box::new(|line| println!("{line}")));
//!
//!     let status = canonicalizer.process("game.zip".as_ref())?;
//!     println!("{status}");
//!     Ok(())
//! }
//! ```
//!
//! ## What canonical means
//!
//! A canonical ZIP stores every entry with maximum-compression deflate
//! and fixed timestamps, orders entries ascending by case-insensitive
//! ASCII name, drops directory entries that would be implied by the files
//! inside them, and carries a 22-byte end-of-central-directory comment of
//! the exact form `TORRENTZIPPED-` + 8 uppercase hex digits (the CRC-32
//! of the central directory). Identical content always yields identical
//! bytes, enabling content-addressed deduplication and checksum-based
//! verification across independent producers.
//!
//! ## Layout
//!
//! - [`zip`] / [`sevenzip`] - the two container codecs
//! - [`sevenzip::graph`] - the folder decode-graph resolver
//! - [`canon`] / [`rebuild`] - canonical checking and rebuilding
//! - [`verify`] - the concurrent CRC-32/MD5/SHA-1 deep-scan pipeline
//!
//! An open archive owns its file handle exclusively and is not safe for
//! concurrent use; process many archives in parallel with one instance
//! per thread.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod canon;
pub mod checksum;
pub mod codec;
pub mod container;
pub mod error;
pub mod fsutil;
pub mod rebuild;
pub mod sevenzip;
pub mod status;
pub mod verify;
pub mod zip;

pub use canon::{Canonicalizer, Options, ZippedEntry, check_entries, torrentzip_name_cmp};
pub use container::{Container, EntryMeta, is_supported_path};
pub use error::{Error, Result};
pub use sevenzip::SevenZipArchive;
pub use status::{FileVerdict, TrrntZipStatus, ZipStatus};
pub use verify::EntryHashes;
pub use zip::ZipArchive;
