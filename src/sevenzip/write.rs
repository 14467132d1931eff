//! 7z write path.
//!
//! Two modes: compressed output concatenates every entry into one LZMA
//! stream shared by a single folder; uncompressed output gives each entry
//! its own store-only folder. The signature header is written blank at
//! create time and patched with the final header location at close.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, Write};

use crate::checksum::Crc32;
use crate::codec::{LzmaEncoder, LzmaEncoderOptions, method};
use crate::fsutil;
use crate::status::ZipStatus;
use crate::zip::OpenMode;
use crate::{Error, Result};

use super::files::FilesInfo;
use super::property_id;
use super::reader::write_variable_u64;
use super::signature::{
    SIGNATURE_HEADER_SIZE, patch_signature_header, write_blank_signature_header,
};
use super::streams::{Coder, Folder, PackedStreamInfo};
use super::{SevenZipArchive, SevenZipEntry};

/// State carried while an archive is open for writing.
pub(crate) struct WriterState {
    /// Compressed (shared LZMA stream) or store-only mode.
    compress: bool,
    /// The shared encoder; the `File` inside is a handle clone sharing
    /// the archive's cursor.
    encoder: Option<LzmaEncoder<File>>,
    /// LZMA properties blob for the folder definition.
    lzma_properties: Vec<u8>,
    /// Total decompressed bytes across all entries.
    unpacked_total: u64,
}

/// A write stream for one new 7z entry.
pub enum SevenZipWriteStream<'a> {
    /// Into the shared LZMA stream.
    Lzma(&'a mut LzmaEncoder<File>),
    /// Raw stored bytes.
    Stored(&'a mut File),
}

impl Write for SevenZipWriteStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SevenZipWriteStream::Lzma(s) => s.write(buf),
            SevenZipWriteStream::Stored(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SevenZipWriteStream::Lzma(s) => s.flush(),
            SevenZipWriteStream::Stored(s) => s.flush(),
        }
    }
}

impl SevenZipArchive {
    /// Creates a new archive for writing.
    ///
    /// With `compress` set, entries are concatenated into one LZMA
    /// stream; otherwise each entry is stored uncompressed in its own
    /// folder.
    pub fn create(path: &std::path::Path, compress: bool) -> Result<Self> {
        fsutil::create_dir_for_file(path)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|_| Error::OpeningFailed {
                path: path.display().to_string(),
            })?;

        write_blank_signature_header(&mut file)?;

        let mut writer = WriterState {
            compress,
            encoder: None,
            lzma_properties: Vec::new(),
            unpacked_total: 0,
        };
        if compress {
            let options = LzmaEncoderOptions::default();
            writer.lzma_properties = options.properties();
            writer.encoder = Some(LzmaEncoder::new(file.try_clone()?, &options)?);
        }

        Ok(Self {
            path: path.to_path_buf(),
            last_write_time: None,
            file: Some(file),
            open_mode: OpenMode::Write,
            status: ZipStatus::None,
            entries: Vec::new(),
            streams_info: None,
            open_folder: None,
            writer: Some(writer),
        })
    }

    /// Opens a write stream for a new entry.
    pub fn open_write_stream(
        &mut self,
        name: &str,
        uncompressed_size: u64,
    ) -> Result<SevenZipWriteStream<'_>> {
        if self.open_mode != OpenMode::Write {
            return Err(Error::WritingToReadArchive);
        }

        self.entries.push(SevenZipEntry {
            name: name.to_string(),
            uncompressed_size,
            ..SevenZipEntry::default()
        });

        let writer = self.writer.as_mut().expect("writer state missing");
        writer.unpacked_total += uncompressed_size;

        if writer.compress {
            let encoder = writer.encoder.as_mut().expect("encoder missing");
            Ok(SevenZipWriteStream::Lzma(encoder))
        } else {
            let file = self.file.as_mut().expect("archive file handle missing");
            Ok(SevenZipWriteStream::Stored(file))
        }
    }

    /// Records a directory entry (no data stream).
    pub fn add_directory(&mut self, name: &str) {
        self.entries.push(SevenZipEntry {
            name: name.to_string(),
            is_directory: true,
            ..SevenZipEntry::default()
        });
    }

    /// Records the final CRC for the most recently added entry.
    pub fn close_write_stream(&mut self, crc: u32) -> Result<()> {
        let entry = self.entries.last_mut().ok_or(Error::RollBackError)?;
        entry.crc = crc;
        Ok(())
    }

    /// Finalizes sizes, serializes the header, and patches the signature
    /// header's next-header fields.
    pub(crate) fn close_writing(&mut self) -> Result<()> {
        let mut writer = self.writer.take().expect("writer state missing");

        if let Some(encoder) = writer.encoder.take() {
            encoder.finish()?;
        }

        let file = self.file.as_mut().expect("archive file handle missing");
        let pack_total = file.stream_position()? - SIGNATURE_HEADER_SIZE;

        let header_bytes = build_header(&self.entries, &writer, pack_total)?;
        let header_crc = Crc32::compute(&header_bytes);

        let header_position = file.stream_position()?;
        file.write_all(&header_bytes)?;
        patch_signature_header(
            file,
            header_position,
            header_bytes.len() as u64,
            header_crc,
        )?;
        file.flush()?;

        self.file = None;
        self.open_mode = OpenMode::Closed;
        self.last_write_time = Some(fsutil::last_write_time(&self.path)?);
        Ok(())
    }
}

/// Serializes the archive header for the recorded entries.
fn build_header(
    entries: &[SevenZipEntry],
    writer: &WriterState,
    pack_total: u64,
) -> Result<Vec<u8>> {
    let mut header = vec![property_id::HEADER];

    let non_empty: Vec<&SevenZipEntry> = entries
        .iter()
        .filter(|e| e.uncompressed_size > 0)
        .collect();

    if !non_empty.is_empty() {
        header.push(property_id::MAIN_STREAMS_INFO);

        // PackInfo
        if writer.compress {
            PackedStreamInfo::write(&mut header, 0, &[pack_total])?;
        } else {
            let sizes: Vec<u64> = non_empty.iter().map(|e| e.uncompressed_size).collect();
            PackedStreamInfo::write(&mut header, 0, &sizes)?;
        }

        // UnpackInfo
        header.push(property_id::UNPACK_INFO);
        header.push(property_id::FOLDER);
        let folders = build_folders(&non_empty, writer);
        write_variable_u64(&mut header, folders.len() as u64)?;
        header.push(0); // folders defined inline
        for folder in &folders {
            folder.write(&mut header)?;
        }
        header.push(property_id::CODERS_UNPACK_SIZE);
        for folder in &folders {
            for &size in &folder.unpack_sizes {
                write_variable_u64(&mut header, size)?;
            }
        }
        header.push(property_id::END);

        // SubStreamsInfo
        header.push(property_id::SUBSTREAMS_INFO);
        header.push(property_id::NUM_UNPACK_STREAM);
        if writer.compress {
            write_variable_u64(&mut header, non_empty.len() as u64)?;
        } else {
            for _ in &non_empty {
                write_variable_u64(&mut header, 1)?;
            }
        }
        header.push(property_id::SIZE);
        if writer.compress {
            // All but the last size; the last is derived from the folder
            // total
            for entry in non_empty.iter().take(non_empty.len() - 1) {
                write_variable_u64(&mut header, entry.uncompressed_size)?;
            }
        }
        header.push(property_id::CRC);
        header.push(1); // all digests defined
        for entry in &non_empty {
            header.extend_from_slice(&entry.crc.to_le_bytes());
        }
        header.push(property_id::END);

        header.push(property_id::END); // end MainStreamsInfo
    }

    if !entries.is_empty() {
        let file_rows: Vec<(String, bool, bool)> = entries
            .iter()
            .map(|e| {
                (
                    e.name.clone(),
                    e.uncompressed_size == 0,
                    e.is_directory,
                )
            })
            .collect();
        FilesInfo::write(&mut header, &file_rows)?;
    }

    header.push(property_id::END);
    Ok(header)
}

/// Builds the folder table: one shared LZMA folder, or one copy folder
/// per stored entry.
fn build_folders(non_empty: &[&SevenZipEntry], writer: &WriterState) -> Vec<Folder> {
    if writer.compress {
        vec![Folder {
            coders: vec![Coder {
                method_id: method::LZMA.to_vec(),
                num_in_streams: 1,
                num_out_streams: 1,
                properties: Some(writer.lzma_properties.clone()),
            }],
            packed_stream_indices: vec![0],
            unpack_sizes: vec![writer.unpacked_total],
            ..Folder::default()
        }]
    } else {
        non_empty
            .iter()
            .map(|entry| Folder {
                coders: vec![Coder {
                    method_id: method::COPY.to_vec(),
                    num_in_streams: 1,
                    num_out_streams: 1,
                    properties: None,
                }],
                packed_stream_indices: vec![0],
                unpack_sizes: vec![entry.uncompressed_size],
                ..Folder::default()
            })
            .collect()
    }
}
