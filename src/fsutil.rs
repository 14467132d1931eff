//! Thin filesystem helpers: timestamp reads, directory creation, and the
//! atomic replace used after a successful rebuild.

use std::fs;
use std::path::Path;

use filetime::FileTime;

use crate::{Error, Result};

/// Reads the last-write time of a file.
pub fn last_write_time(path: &Path) -> Result<FileTime> {
    let meta = fs::metadata(path)?;
    Ok(FileTime::from_last_modification_time(&meta))
}

/// Creates every missing parent directory of `path`.
pub fn create_dir_for_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Replaces `original` with `replacement`.
///
/// The original is deleted first so the rename cannot fail on platforms
/// where rename does not overwrite. The replacement must live on the same
/// filesystem (the rebuild writes its temp file beside the original).
pub fn replace_file(replacement: &Path, original: &Path) -> Result<()> {
    if original.exists() {
        fs::remove_file(original)?;
    }
    fs::rename(replacement, original).map_err(Error::Io)
}

/// Deletes a file if it exists, ignoring a missing file.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
