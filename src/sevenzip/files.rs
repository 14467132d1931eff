//! The FilesInfo header section: entry names, empty-stream/empty-file
//! flags, and attributes.
//!
//! Every property inside FilesInfo carries a size prefix, so unknown
//! properties (timestamps, anti-items, comments) are skipped without
//! being understood. Canonical output writes no timestamps at all.

use std::io::{Read, Write};

use crate::{Error, Result};

use super::property_id;
use super::reader::{
    read_all_or_bits, read_bool_vector, read_bytes, read_u8, read_variable_u64, write_bool_vector,
    write_variable_u64,
};

/// Windows directory attribute bit.
pub const ATTRIBUTE_DIRECTORY: u32 = 0x10;

/// Parsed FilesInfo section.
#[derive(Debug, Clone, Default)]
pub struct FilesInfo {
    /// Entry names, in header order.
    pub names: Vec<String>,
    /// Per-entry: true when the entry has no folder data.
    pub empty_stream_flags: Vec<bool>,
    /// Among empty-stream entries: true when the entry is an empty file
    /// (false or absent means directory).
    pub empty_file_flags: Vec<bool>,
    /// Optional per-entry Windows attributes.
    pub attributes: Vec<Option<u32>>,
}

impl FilesInfo {
    /// Parses a FilesInfo section (after its property tag).
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let num_files = read_variable_u64(r)? as usize;

        let mut info = FilesInfo {
            empty_stream_flags: vec![false; num_files],
            attributes: vec![None; num_files],
            ..FilesInfo::default()
        };

        loop {
            let tag = read_u8(r)?;
            if tag == property_id::END {
                break;
            }

            let payload_size = read_variable_u64(r)? as usize;
            let payload = read_bytes(r, payload_size)?;
            let mut pr = payload.as_slice();

            match tag {
                property_id::EMPTY_STREAM => {
                    info.empty_stream_flags = read_bool_vector(&mut pr, num_files)?;
                }

                property_id::EMPTY_FILE => {
                    let num_empty =
                        info.empty_stream_flags.iter().filter(|&&b| b).count();
                    info.empty_file_flags = read_bool_vector(&mut pr, num_empty)?;
                }

                property_id::NAME => {
                    let external = read_u8(&mut pr)?;
                    if external != 0 {
                        return Err(Error::CentralDirError(
                            "external file names are not supported".into(),
                        ));
                    }
                    info.names = Vec::with_capacity(num_files);
                    for _ in 0..num_files {
                        info.names.push(read_utf16le_name(&mut pr)?);
                    }
                }

                property_id::WIN_ATTRIBUTES => {
                    let defined = read_all_or_bits(&mut pr, num_files)?;
                    let external = read_u8(&mut pr)?;
                    if external != 0 {
                        return Err(Error::CentralDirError(
                            "external attributes are not supported".into(),
                        ));
                    }
                    for (i, &has_attr) in defined.iter().enumerate() {
                        if has_attr {
                            info.attributes[i] =
                                Some(super::reader::read_u32_le(&mut pr)?);
                        }
                    }
                }

                // Timestamps, anti-items, comments and the dummy padding
                // property are irrelevant to canonicalization
                _ => {}
            }
        }

        if info.names.len() != num_files {
            return Err(Error::CentralDirError(format!(
                "files info names {} does not match file count {num_files}",
                info.names.len()
            )));
        }

        Ok(info)
    }

    /// Serializes a FilesInfo section, including its property tag.
    ///
    /// `entries` supplies `(name, is_empty_stream, is_directory)` per
    /// entry; directory names are stored without the trailing slash and
    /// marked with the directory attribute instead.
    pub fn write<W: Write>(w: &mut W, entries: &[(String, bool, bool)]) -> Result<()> {
        w.write_all(&[property_id::FILES_INFO])?;
        write_variable_u64(w, entries.len() as u64)?;

        let any_empty = entries.iter().any(|(_, empty, _)| *empty);
        let any_dirs = entries.iter().any(|(_, _, dir)| *dir);
        let empty_files: Vec<bool> = entries
            .iter()
            .filter(|(_, empty, _)| *empty)
            .map(|(_, _, dir)| !dir)
            .collect();

        if any_empty {
            let bits: Vec<bool> = entries.iter().map(|(_, empty, _)| *empty).collect();
            let mut payload = Vec::new();
            write_bool_vector(&mut payload, &bits)?;
            write_property(w, property_id::EMPTY_STREAM, &payload)?;

            if empty_files.iter().any(|&b| b) {
                let mut payload = Vec::new();
                write_bool_vector(&mut payload, &empty_files)?;
                write_property(w, property_id::EMPTY_FILE, &payload)?;
            }
        }

        let mut payload = Vec::new();
        payload.push(0); // names stored inline
        for (name, _, is_dir) in entries {
            let stored = if *is_dir {
                name.trim_end_matches('/')
            } else {
                name.as_str()
            };
            for unit in stored.encode_utf16() {
                payload.extend_from_slice(&unit.to_le_bytes());
            }
            payload.extend_from_slice(&[0, 0]);
        }
        write_property(w, property_id::NAME, &payload)?;

        if any_dirs {
            let mut payload = Vec::new();
            payload.push(1); // all defined
            payload.push(0); // inline
            for (_, _, is_dir) in entries {
                let attr: u32 = if *is_dir { ATTRIBUTE_DIRECTORY } else { 0 };
                payload.extend_from_slice(&attr.to_le_bytes());
            }
            write_property(w, property_id::WIN_ATTRIBUTES, &payload)?;
        }

        w.write_all(&[property_id::END])?;
        Ok(())
    }
}

fn write_property<W: Write>(w: &mut W, tag: u8, payload: &[u8]) -> Result<()> {
    w.write_all(&[tag])?;
    write_variable_u64(w, payload.len() as u64)?;
    w.write_all(payload)?;
    Ok(())
}

/// Reads one UTF-16LE null-terminated name.
fn read_utf16le_name(r: &mut &[u8]) -> Result<String> {
    let mut units = Vec::new();
    loop {
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf)?;
        let unit = u16::from_le_bytes(buf);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }

    String::from_utf16(&units)
        .map_err(|_| Error::CentralDirError("file name is not valid UTF-16".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_files_info_roundtrip() {
        let entries = vec![
            ("a.bin".to_string(), false, false),
            ("docs/".to_string(), true, true),
            ("empty.txt".to_string(), true, false),
        ];

        let mut buf = Vec::new();
        FilesInfo::write(&mut buf, &entries).unwrap();
        assert_eq!(buf[0], property_id::FILES_INFO);

        let info = FilesInfo::parse(&mut Cursor::new(&buf[1..])).unwrap();
        assert_eq!(info.names, vec!["a.bin", "docs", "empty.txt"]);
        assert_eq!(info.empty_stream_flags, vec![false, true, true]);
        // Among empty streams: docs is a directory, empty.txt a file
        assert_eq!(info.empty_file_flags, vec![false, true]);
        assert_eq!(info.attributes[1], Some(ATTRIBUTE_DIRECTORY));
    }

    #[test]
    fn test_files_info_unknown_property_skipped() {
        let entries = vec![("x".to_string(), false, false)];
        let mut buf = Vec::new();
        FilesInfo::write(&mut buf, &entries).unwrap();

        // Splice an unknown property (mtime) before the end marker
        let end = buf.len() - 1;
        let mut spliced = buf[1..end].to_vec();
        spliced.push(property_id::MTIME);
        spliced.push(3);
        spliced.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        spliced.push(property_id::END);

        let info = FilesInfo::parse(&mut Cursor::new(&spliced)).unwrap();
        assert_eq!(info.names, vec!["x"]);
    }

    #[test]
    fn test_files_info_name_count_mismatch() {
        // Two files declared, one name stored
        let mut buf = Vec::new();
        write_variable_u64(&mut buf, 2).unwrap();
        let mut names = vec![0u8];
        for unit in "only".encode_utf16() {
            names.extend_from_slice(&unit.to_le_bytes());
        }
        names.extend_from_slice(&[0, 0]);
        // Declared payload covers a single name
        buf.push(property_id::NAME);
        write_variable_u64(&mut buf, names.len() as u64).unwrap();
        buf.extend_from_slice(&names);
        buf.push(property_id::END);

        assert!(FilesInfo::parse(&mut Cursor::new(&buf)).is_err());
    }
}
