//! Shared fixture builders for the integration suites.
//!
//! These write ZIP bytes by hand so the tests can produce archives in
//! exactly the shapes other tools emit: stored entries, arbitrary entry
//! order, data descriptors, wrong CRCs, trailing garbage.

// Each integration binary uses a different subset of these helpers
#![allow(dead_code)]

use std::path::Path;

/// One fixture entry.
pub struct FixtureEntry<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    /// Override the stored CRC (to fabricate corruption).
    pub crc_override: Option<u32>,
}

impl<'a> FixtureEntry<'a> {
    pub fn new(name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            data,
            crc_override: None,
        }
    }

    pub fn with_bad_crc(mut self) -> Self {
        self.crc_override = Some(0xBAD0_BAD0);
        self
    }
}

/// Options for the hand-rolled ZIP writer.
#[derive(Default)]
pub struct FixtureOptions {
    /// Write local headers with bit 3 set and trailing data descriptors.
    pub data_descriptors: bool,
    /// Append garbage bytes after the end-of-central-directory record.
    pub trailing_garbage: bool,
    /// Set the UTF-8 name flag on every entry.
    pub utf8_names: bool,
}

/// Writes a stored (method 0) ZIP with entries in the given order.
///
/// The output is deliberately non-canonical: store method, arbitrary
/// timestamps, and whatever order the caller passed.
pub fn write_store_zip(path: &Path, entries: &[FixtureEntry<'_>], options: &FixtureOptions) {
    let mut out: Vec<u8> = Vec::new();
    let mut central: Vec<u8> = Vec::new();
    let flags: u16 = {
        let mut f = 0u16;
        if options.data_descriptors {
            f |= 1 << 3;
        }
        if options.utf8_names {
            f |= 1 << 11;
        }
        f
    };

    for entry in entries {
        let offset = out.len() as u32;
        let crc = entry
            .crc_override
            .unwrap_or_else(|| crc32fast::hash(entry.data));
        let size = entry.data.len() as u32;
        let name = entry.name.as_bytes();

        // Local file header
        out.extend_from_slice(&0x0403_4B50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // store
        out.extend_from_slice(&0x6C32u16.to_le_bytes()); // arbitrary time
        out.extend_from_slice(&0x5962u16.to_le_bytes()); // arbitrary date
        if options.data_descriptors {
            out.extend_from_slice(&[0u8; 12]); // crc/sizes follow the data
        } else {
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra length
        out.extend_from_slice(name);
        out.extend_from_slice(entry.data);

        if options.data_descriptors {
            out.extend_from_slice(&0x0807_4B50u32.to_le_bytes());
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }

        // Central directory record
        central.extend_from_slice(&0x0201_4B50u32.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&flags.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // store
        central.extend_from_slice(&0x6C32u16.to_le_bytes());
        central.extend_from_slice(&0x5962u16.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra
        central.extend_from_slice(&0u16.to_le_bytes()); // comment
        central.extend_from_slice(&0u16.to_le_bytes()); // disk start
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name);
    }

    let cd_start = out.len() as u32;
    out.extend_from_slice(&central);

    // End of central directory
    out.extend_from_slice(&0x0605_4B50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_start.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // no comment

    if options.trailing_garbage {
        out.extend_from_slice(b"GARBAGE AFTER EOCD");
    }

    std::fs::write(path, out).unwrap();
}

/// Builds a quiet canonicalizer with the given options.
pub fn canonicalizer(options: trrntzip::Options) -> trrntzip::Canonicalizer {
    trrntzip::Canonicalizer::new(options)
}
