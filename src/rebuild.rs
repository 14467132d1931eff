//! Canonical rebuild.
//!
//! Streams every entry of a source archive, in canonical order, through a
//! CRC-32 accumulator into a fresh maximum-compression ZIP beside the
//! original, then atomically replaces the original. A CRC mismatch (or
//! any decode failure) aborts the rebuild, deletes the temp file, and
//! leaves the source archive byte-unchanged.

use std::io::{Read, Write};
use std::path::PathBuf;

use crate::canon::ZippedEntry;
use crate::checksum::Crc32Reader;
use crate::container::Container;
use crate::status::TrrntZipStatus;
use crate::zip::{ZipArchive, records::METHOD_DEFLATE};
use crate::{Error, Result, fsutil};

/// Copy buffer size for one read/write hop.
const COPY_BUFFER_SIZE: usize = 1 << 20;

/// Rebuilds `source` into canonical form.
///
/// `rows` must already be in canonical order with redundant directories
/// removed (see [`crate::canon::check_entries`]). `progress` receives
/// percent-complete updates.
pub fn rezip(
    source: &mut Container,
    rows: &[ZippedEntry],
    progress: Option<&(dyn Fn(u32) + Send + Sync)>,
) -> Result<TrrntZipStatus> {
    let original = source.path().to_path_buf();
    let tmp_path = temp_path(&original);
    fsutil::remove_if_exists(&tmp_path)?;

    let mut output = ZipArchive::create(&tmp_path)?;

    match copy_entries(source, &mut output, rows, progress) {
        Ok(()) => {}
        Err(e) => {
            // The original archive must remain byte-unchanged: discard
            // the temp file before reporting
            let _ = output.close_failed();
            let _ = source.close();
            fsutil::remove_if_exists(&tmp_path)?;

            log::warn!("rebuild of {} aborted: {e}", original.display());
            return if e.is_corruption() || e.is_structural() {
                Ok(TrrntZipStatus::CORRUPT_ZIP)
            } else {
                Err(e)
            };
        }
    }

    output.close()?;
    source.close()?;
    fsutil::replace_file(&tmp_path, &original)?;

    Ok(TrrntZipStatus::VALID_TRRNTZIP | TrrntZipStatus::REBUILT)
}

fn copy_entries(
    source: &mut Container,
    output: &mut ZipArchive,
    rows: &[ZippedEntry],
    progress: Option<&(dyn Fn(u32) + Send + Sync)>,
) -> Result<()> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

    for (i, row) in rows.iter().enumerate() {
        if let Some(report) = progress {
            report((i * 100 / rows.len().max(1)) as u32);
        }

        // Directories and empty files carry no data; they still get a
        // canonical entry (with the empty-deflate marker)
        if row.size == 0 {
            let stream = output.open_write_stream(&row.name, 0, METHOD_DEFLATE)?;
            stream.finish()?;
            output.close_write_stream(row.crc)?;
            continue;
        }

        let (reader, stream_size) = source.open_read_stream(row.index)?;
        let mut reader = Crc32Reader::new(reader);
        let mut writer = output.open_write_stream(&row.name, stream_size, METHOD_DEFLATE)?;

        let mut remaining = stream_size;
        while remaining > 0 {
            let chunk = buffer.len().min(remaining as usize);
            reader.read_exact(&mut buffer[..chunk]).map_err(|e| {
                Error::DecodeError(format!("reading {}: {e}", row.name))
            })?;
            writer.write_all(&buffer[..chunk])?;
            remaining -= chunk as u64;
        }
        writer.finish()?;

        // Round-trip guarantee: the decompressed bytes must hash to the
        // CRC the source archive claims
        let recomputed = reader.crc();
        if recomputed != row.crc {
            return Err(Error::crc_mismatch(
                Some(row.name.clone()),
                row.crc,
                recomputed,
            ));
        }

        output.close_write_stream(row.crc)?;
    }

    if let Some(report) = progress {
        report(100);
    }
    Ok(())
}

/// The rebuild target is written beside the original.
fn temp_path(original: &std::path::Path) -> PathBuf {
    let mut name = original.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
