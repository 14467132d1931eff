//! 7z stream structures: packed streams, coders, bind pairs, and
//! folders.
//!
//! A folder groups one or more entries behind one decode chain. The
//! folder invariant: the number of packed-stream indices equals the total
//! coder input count minus the bind-pair count, and exactly one coder
//! output is not consumed by a bind pair (the folder's final output).

use std::io::Read;

use crate::{Error, Result};

use super::property_id;
use super::reader::{
    read_all_or_bits, read_bytes, read_u8, read_u32_le, read_variable_u64, write_variable_u64,
};

/// Hard cap on coders per folder; real archives use at most a handful.
const MAX_CODERS_PER_FOLDER: u64 = 16;

/// One raw compressed byte range resident in the archive file.
#[derive(Debug, Clone, Default)]
pub struct PackedStreamInfo {
    /// Size of the packed bytes.
    pub packed_size: u64,
    /// Offset of the packed bytes, relative to the start of archive data.
    pub position: u64,
    /// Optional CRC of the packed bytes.
    pub crc: Option<u32>,
}

impl PackedStreamInfo {
    /// Parses the PackInfo section (after its property tag). Returns the
    /// base position of the first packed stream and the stream table.
    pub fn parse<R: Read>(r: &mut R) -> Result<(u64, Vec<PackedStreamInfo>)> {
        let pack_position = read_variable_u64(r)?;
        let num_streams = read_variable_u64(r)? as usize;

        let mut streams: Vec<PackedStreamInfo> = Vec::new();
        streams.resize_with(num_streams, PackedStreamInfo::default);

        loop {
            let tag = read_u8(r)?;
            match tag {
                property_id::END => break,

                property_id::SIZE => {
                    let mut position = 0u64;
                    for stream in &mut streams {
                        stream.position = position;
                        stream.packed_size = read_variable_u64(r)?;
                        position += stream.packed_size;
                    }
                }

                property_id::CRC => {
                    let defined = read_all_or_bits(r, num_streams)?;
                    for (stream, &has_crc) in streams.iter_mut().zip(defined.iter()) {
                        if has_crc {
                            stream.crc = Some(read_u32_le(r)?);
                        }
                    }
                }

                _ => {
                    return Err(Error::CentralDirError(format!(
                        "unexpected property {tag:#x} in pack info"
                    )));
                }
            }
        }

        Ok((pack_position, streams))
    }

    /// Writes the PackInfo section, including its property tag.
    pub fn write<W: std::io::Write>(
        w: &mut W,
        pack_position: u64,
        sizes: &[u64],
    ) -> Result<()> {
        w.write_all(&[property_id::PACK_INFO])?;
        write_variable_u64(w, pack_position)?;
        write_variable_u64(w, sizes.len() as u64)?;

        w.write_all(&[property_id::SIZE])?;
        for &size in sizes {
            write_variable_u64(w, size)?;
        }

        w.write_all(&[property_id::END])?;
        Ok(())
    }
}

/// One compression/filter stage in a folder's decode chain.
#[derive(Debug, Clone)]
pub struct Coder {
    /// Method identifier bytes (1-4 bytes in practice).
    pub method_id: Vec<u8>,
    /// Number of input streams.
    pub num_in_streams: u64,
    /// Number of output streams.
    pub num_out_streams: u64,
    /// Opaque properties blob.
    pub properties: Option<Vec<u8>>,
}

impl Coder {
    fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let flags = read_u8(r)?;
        let method_id_size = (flags & 0x0F) as usize;
        let is_complex = flags & 0x10 != 0;
        let has_properties = flags & 0x20 != 0;
        if flags & 0x80 != 0 {
            return Err(Error::CentralDirError(
                "external coder definitions are not supported".into(),
            ));
        }

        let method_id = read_bytes(r, method_id_size)?;

        let (num_in_streams, num_out_streams) = if is_complex {
            (read_variable_u64(r)?, read_variable_u64(r)?)
        } else {
            (1, 1)
        };

        let properties = if has_properties {
            let size = read_variable_u64(r)? as usize;
            Some(read_bytes(r, size)?)
        } else {
            None
        };

        Ok(Self {
            method_id,
            num_in_streams,
            num_out_streams,
            properties,
        })
    }

    /// Writes one coder definition.
    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        let mut flags = self.method_id.len() as u8;
        let complex = self.num_in_streams != 1 || self.num_out_streams != 1;
        if complex {
            flags |= 0x10;
        }
        let has_properties = self.properties.as_ref().is_some_and(|p| !p.is_empty());
        if has_properties {
            flags |= 0x20;
        }

        w.write_all(&[flags])?;
        w.write_all(&self.method_id)?;
        if complex {
            write_variable_u64(w, self.num_in_streams)?;
            write_variable_u64(w, self.num_out_streams)?;
        }
        if has_properties {
            let props = self.properties.as_ref().unwrap();
            write_variable_u64(w, props.len() as u64)?;
            w.write_all(props)?;
        }
        Ok(())
    }
}

/// A directed edge: coder input `in_index` is fed by coder output
/// `out_index`.
#[derive(Debug, Clone, Copy)]
pub struct BindPair {
    /// Global input-stream index.
    pub in_index: u64,
    /// Global output-stream index.
    pub out_index: u64,
}

/// One decompressed entry within a folder.
#[derive(Debug, Clone, Default)]
pub struct SubStream {
    /// Uncompressed size of this entry.
    pub size: u64,
    /// Stored CRC of this entry's bytes.
    pub crc: Option<u32>,
}

/// A compressed-stream group covering one or more entries.
#[derive(Debug, Clone, Default)]
pub struct Folder {
    /// Ordered coders.
    pub coders: Vec<Coder>,
    /// Bind pairs connecting coder outputs to coder inputs.
    pub bind_pairs: Vec<BindPair>,
    /// For each packed stream feeding this folder, the global
    /// input-stream index it supplies.
    pub packed_stream_indices: Vec<u64>,
    /// Index of this folder's first packed stream in the archive-wide
    /// pack table.
    pub packed_stream_base: usize,
    /// Unpacked size of each coder output.
    pub unpack_sizes: Vec<u64>,
    /// Optional CRC of the folder's final output.
    pub unpack_crc: Option<u32>,
    /// Per-entry sizes and CRCs within the folder.
    pub substreams: Vec<SubStream>,
}

impl Folder {
    fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let num_coders = read_variable_u64(r)?;
        if num_coders == 0 || num_coders > MAX_CODERS_PER_FOLDER {
            return Err(Error::CentralDirError(format!(
                "implausible coder count {num_coders}"
            )));
        }

        let mut coders = Vec::with_capacity(num_coders as usize);
        let mut total_in_streams = 0u64;
        let mut total_out_streams = 0u64;
        for _ in 0..num_coders {
            let coder = Coder::parse(r)?;
            total_in_streams += coder.num_in_streams;
            total_out_streams += coder.num_out_streams;
            coders.push(coder);
        }

        let num_bind_pairs = total_out_streams.saturating_sub(1);
        let mut bind_pairs = Vec::with_capacity(num_bind_pairs as usize);
        for i in 0..num_bind_pairs {
            let in_index = read_variable_u64(r)?;
            let out_index = read_variable_u64(r)?;
            if in_index >= total_in_streams || out_index >= total_out_streams {
                return Err(Error::CentralDirError(format!(
                    "bind pair {i} indices out of range"
                )));
            }
            bind_pairs.push(BindPair {
                in_index,
                out_index,
            });
        }

        if total_in_streams < num_bind_pairs {
            return Err(Error::CentralDirError(
                "more bind pairs than coder inputs".into(),
            ));
        }
        let num_packed = total_in_streams - num_bind_pairs;

        let mut packed_stream_indices = Vec::with_capacity(num_packed as usize);
        if num_packed == 1 {
            // Derived by elimination: the one input with no bind pair
            for j in 0..total_in_streams {
                if !bind_pairs.iter().any(|bp| bp.in_index == j) {
                    packed_stream_indices.push(j);
                    break;
                }
            }
            if packed_stream_indices.is_empty() {
                return Err(Error::CentralDirError(
                    "no unbound coder input for packed stream".into(),
                ));
            }
        } else {
            for _ in 0..num_packed {
                let index = read_variable_u64(r)?;
                if index >= total_in_streams {
                    return Err(Error::CentralDirError(
                        "packed stream index out of range".into(),
                    ));
                }
                packed_stream_indices.push(index);
            }
        }

        Ok(Self {
            coders,
            bind_pairs,
            packed_stream_indices,
            ..Self::default()
        })
    }

    /// Total number of coder input streams.
    pub fn total_in_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_in_streams).sum()
    }

    /// Total number of coder output streams.
    pub fn total_out_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }

    /// Global output-stream index of the folder's final output: the one
    /// output no bind pair consumes.
    pub fn final_output_index(&self) -> Option<u64> {
        (0..self.total_out_streams())
            .find(|&out| !self.bind_pairs.iter().any(|bp| bp.out_index == out))
    }

    /// Unpacked size of the folder's final output.
    pub fn final_unpack_size(&self) -> u64 {
        self.final_output_index()
            .and_then(|i| self.unpack_sizes.get(i as usize).copied())
            .unwrap_or(0)
    }

    /// Writes this folder's coder chain and bind pairs.
    ///
    /// Packed-stream indices are never written: the writer only emits
    /// single-input folders, whose index is derived by elimination.
    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        write_variable_u64(w, self.coders.len() as u64)?;
        for coder in &self.coders {
            coder.write(w)?;
        }
        for bp in &self.bind_pairs {
            write_variable_u64(w, bp.in_index)?;
            write_variable_u64(w, bp.out_index)?;
        }
        Ok(())
    }
}

/// The main streams section of the archive header.
#[derive(Debug, Clone, Default)]
pub struct StreamsInfo {
    /// Position of the first packed stream, relative to archive data
    /// start.
    pub pack_position: u64,
    /// All packed streams, in file order.
    pub packed_streams: Vec<PackedStreamInfo>,
    /// All folders.
    pub folders: Vec<Folder>,
}

impl StreamsInfo {
    /// Parses a streams-info section (after its property tag).
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let mut info = StreamsInfo::default();

        loop {
            let tag = read_u8(r)?;
            match tag {
                property_id::END => break,

                property_id::PACK_INFO => {
                    let (position, streams) = PackedStreamInfo::parse(r)?;
                    info.pack_position = position;
                    info.packed_streams = streams;
                }

                property_id::UNPACK_INFO => {
                    info.folders = parse_unpack_info(r)?;
                }

                property_id::SUBSTREAMS_INFO => {
                    parse_substreams_info(r, &mut info.folders)?;
                }

                _ => {
                    return Err(Error::CentralDirError(format!(
                        "unexpected property {tag:#x} in streams info"
                    )));
                }
            }
        }

        // Folders without a substreams section hold exactly one entry
        for folder in &mut info.folders {
            if folder.substreams.is_empty() {
                folder.substreams.push(SubStream {
                    size: folder.final_unpack_size(),
                    crc: folder.unpack_crc,
                });
            }
        }

        Ok(info)
    }
}

/// Parses the UnpackInfo section (after its property tag).
fn parse_unpack_info<R: Read>(r: &mut R) -> Result<Vec<Folder>> {
    let mut folders: Vec<Folder> = Vec::new();

    loop {
        let tag = read_u8(r)?;
        match tag {
            property_id::END => break,

            property_id::FOLDER => {
                let num_folders = read_variable_u64(r)?;
                let external = read_u8(r)?;
                if external != 0 {
                    return Err(Error::CentralDirError(
                        "external folder definitions are not supported".into(),
                    ));
                }

                let mut packed_base = 0usize;
                for _ in 0..num_folders {
                    let mut folder = Folder::parse(r)?;
                    folder.packed_stream_base = packed_base;
                    packed_base += folder.packed_stream_indices.len();
                    folders.push(folder);
                }
            }

            property_id::CODERS_UNPACK_SIZE => {
                for folder in &mut folders {
                    let num_sizes = folder.total_out_streams() as usize;
                    folder.unpack_sizes = Vec::with_capacity(num_sizes);
                    for _ in 0..num_sizes {
                        folder.unpack_sizes.push(read_variable_u64(r)?);
                    }
                }
            }

            property_id::CRC => {
                let defined = read_all_or_bits(r, folders.len())?;
                for (folder, &has_crc) in folders.iter_mut().zip(defined.iter()) {
                    if has_crc {
                        folder.unpack_crc = Some(read_u32_le(r)?);
                    }
                }
            }

            _ => {
                return Err(Error::CentralDirError(format!(
                    "unexpected property {tag:#x} in unpack info"
                )));
            }
        }
    }

    Ok(folders)
}

/// Parses the SubStreamsInfo section (after its property tag), filling
/// each folder's per-entry sizes and CRCs.
fn parse_substreams_info<R: Read>(r: &mut R, folders: &mut [Folder]) -> Result<()> {
    let mut counts: Vec<u64> = vec![1; folders.len()];
    let mut sizes_read = false;

    loop {
        let tag = read_u8(r)?;
        match tag {
            property_id::END => break,

            property_id::NUM_UNPACK_STREAM => {
                for count in counts.iter_mut() {
                    *count = read_variable_u64(r)?;
                }
            }

            property_id::SIZE => {
                // All but the last entry's size is stored; the last is
                // the folder total minus the others
                sizes_read = true;
                for (folder, &count) in folders.iter_mut().zip(counts.iter()) {
                    folder.substreams.clear();
                    if count == 0 {
                        continue;
                    }
                    let mut remaining = folder.final_unpack_size();
                    for _ in 0..count - 1 {
                        let size = read_variable_u64(r)?;
                        remaining = remaining.checked_sub(size).ok_or_else(|| {
                            Error::CentralDirError(
                                "substream sizes exceed folder size".into(),
                            )
                        })?;
                        folder.substreams.push(SubStream { size, crc: None });
                    }
                    folder.substreams.push(SubStream {
                        size: remaining,
                        crc: None,
                    });
                }
            }

            property_id::CRC => {
                // Folders with a single substream and a folder-level CRC
                // inherit it; everything else reads a digest here
                for (folder, &count) in folders.iter_mut().zip(counts.iter()) {
                    if folder.substreams.is_empty() {
                        let size = folder.final_unpack_size();
                        for _ in 0..count {
                            folder.substreams.push(SubStream { size, crc: None });
                        }
                    }
                }

                let needs_crc: usize = folders
                    .iter()
                    .zip(counts.iter())
                    .map(|(folder, &count)| {
                        if count == 1 && folder.unpack_crc.is_some() {
                            0
                        } else {
                            count as usize
                        }
                    })
                    .sum();

                let defined = read_all_or_bits(r, needs_crc)?;
                let mut defined_iter = defined.iter();

                for (folder, &count) in folders.iter_mut().zip(counts.iter()) {
                    if count == 1 && folder.unpack_crc.is_some() {
                        folder.substreams[0].crc = folder.unpack_crc;
                        continue;
                    }
                    for sub in folder.substreams.iter_mut() {
                        let has_crc = defined_iter.next().copied().unwrap_or(false);
                        if has_crc {
                            sub.crc = Some(read_u32_le(r)?);
                        }
                    }
                }
            }

            _ => {
                return Err(Error::CentralDirError(format!(
                    "unexpected property {tag:#x} in substreams info"
                )));
            }
        }
    }

    // Counts without sizes: single-substream folders fall back to the
    // folder size
    if !sizes_read {
        for (folder, &count) in folders.iter_mut().zip(counts.iter()) {
            if folder.substreams.is_empty() && count == 1 {
                let size = folder.final_unpack_size();
                let crc = folder.unpack_crc;
                folder.substreams.push(SubStream { size, crc });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::method;
    use std::io::Cursor;

    fn lzma_coder_bytes() -> Vec<u8> {
        // flags: 3-byte method id, has properties
        let mut data = vec![0x23];
        data.extend_from_slice(method::LZMA);
        data.push(5); // properties size
        data.extend_from_slice(&[0x5D, 0x00, 0x00, 0x10, 0x00]);
        data
    }

    #[test]
    fn test_parse_single_coder_folder() {
        let mut data = Vec::new();
        data.push(1); // one coder
        data.extend_from_slice(&lzma_coder_bytes());

        let folder = Folder::parse(&mut Cursor::new(&data)).unwrap();
        assert_eq!(folder.coders.len(), 1);
        assert_eq!(folder.coders[0].method_id, method::LZMA);
        assert_eq!(folder.coders[0].num_in_streams, 1);
        assert!(folder.bind_pairs.is_empty());
        // Single packed stream derived by elimination
        assert_eq!(folder.packed_stream_indices, vec![0]);
        assert_eq!(folder.final_output_index(), Some(0));
    }

    #[test]
    fn test_parse_chained_folder() {
        // LZMA -> BCJ chain: BCJ's input 0 fed by LZMA's output 0,
        // packed bytes feed LZMA's input (global input index 1)
        let mut data = Vec::new();
        data.push(2); // two coders

        // coder 0: BCJ, no properties
        data.push(0x04);
        data.extend_from_slice(method::BCJ_X86);

        // coder 1: LZMA
        data.extend_from_slice(&lzma_coder_bytes());

        // one bind pair: in_index 0 (BCJ input) <- out_index 1 (LZMA out)
        data.push(0);
        data.push(1);

        let folder = Folder::parse(&mut Cursor::new(&data)).unwrap();
        assert_eq!(folder.coders.len(), 2);
        assert_eq!(folder.bind_pairs.len(), 1);
        assert_eq!(folder.packed_stream_indices, vec![1]);
        // BCJ's output is the unconsumed one
        assert_eq!(folder.final_output_index(), Some(0));
    }

    #[test]
    fn test_folder_invariant_violation() {
        // Bind pair with out-of-range input index
        let mut data = Vec::new();
        data.push(2);
        data.push(0x04);
        data.extend_from_slice(method::BCJ_X86);
        data.extend_from_slice(&lzma_coder_bytes());
        data.push(9); // in_index out of range
        data.push(1);

        let err = Folder::parse(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, Error::CentralDirError(_)));
    }

    #[test]
    fn test_coder_write_parse_roundtrip() {
        let coder = Coder {
            method_id: method::LZMA.to_vec(),
            num_in_streams: 1,
            num_out_streams: 1,
            properties: Some(vec![0x5D, 0, 0, 0x10, 0]),
        };
        let mut buf = Vec::new();
        coder.write(&mut buf).unwrap();

        let parsed = Coder::parse(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.method_id, coder.method_id);
        assert_eq!(parsed.num_in_streams, 1);
        assert_eq!(parsed.properties, coder.properties);
    }

    #[test]
    fn test_pack_info_roundtrip() {
        let mut buf = Vec::new();
        PackedStreamInfo::write(&mut buf, 0, &[100, 250]).unwrap();
        assert_eq!(buf[0], property_id::PACK_INFO);

        let mut cursor = Cursor::new(&buf[1..]);
        let (position, streams) = PackedStreamInfo::parse(&mut cursor).unwrap();
        assert_eq!(position, 0);
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].packed_size, 100);
        assert_eq!(streams[0].position, 0);
        assert_eq!(streams[1].packed_size, 250);
        assert_eq!(streams[1].position, 100);
    }

    #[test]
    fn test_substream_delta_sizes() {
        // One folder, total size 100, three entries: 30, 20, implicit 50
        let mut folder = Folder {
            coders: vec![Coder {
                method_id: method::COPY.to_vec(),
                num_in_streams: 1,
                num_out_streams: 1,
                properties: None,
            }],
            unpack_sizes: vec![100],
            ..Folder::default()
        };
        folder.packed_stream_indices = vec![0];

        let mut data = Vec::new();
        data.push(property_id::NUM_UNPACK_STREAM);
        data.push(3);
        data.push(property_id::SIZE);
        data.push(30);
        data.push(20);
        data.push(property_id::END);

        let mut folders = vec![folder];
        parse_substreams_info(&mut Cursor::new(&data), &mut folders).unwrap();

        let sizes: Vec<u64> = folders[0].substreams.iter().map(|s| s.size).collect();
        assert_eq!(sizes, vec![30, 20, 50]);
    }
}
