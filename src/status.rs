//! Status types shared across the codecs and the canonicalizer.

/// Per-archive canonical status observed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZipStatus {
    /// Nothing special detected.
    #[default]
    None,
    /// The archive carries a verified canonical marker
    /// (`TORRENTZIPPED-` comment or torrent7z trailer) and passed the
    /// structural checks.
    TrrntZip,
    /// Trailing bytes were found after the end-of-central-directory
    /// record; the archive cannot be canonical.
    ExtraData,
}

/// Per-entry verification state, advanced by the deep-scan pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileVerdict {
    /// Not verified yet.
    #[default]
    Untested,
    /// Decoded cleanly and the CRC matched.
    Good,
    /// Decoded cleanly but the CRC did not match the stored value.
    CrcError,
    /// The compressed stream could not be decoded.
    DecodeError,
}

/// Outcome flags for one canonicalization run.
///
/// Flags combine: an archive can be both `UNSORTED` and `EXTRA_DIRECTORY`,
/// and a successful rebuild reports `VALID_TRRNTZIP` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrrntZipStatus(u32);

impl TrrntZipStatus {
    /// Nothing known yet.
    pub const UNKNOWN: TrrntZipStatus = TrrntZipStatus(0);
    /// The archive is in canonical form.
    pub const VALID_TRRNTZIP: TrrntZipStatus = TrrntZipStatus(1);
    /// The archive could not be parsed or failed an integrity check.
    pub const CORRUPT_ZIP: TrrntZipStatus = TrrntZipStatus(2);
    /// Entries were not in canonical order.
    pub const UNSORTED: TrrntZipStatus = TrrntZipStatus(4);
    /// A redundant directory entry was present.
    pub const EXTRA_DIRECTORY: TrrntZipStatus = TrrntZipStatus(8);
    /// A rebuild was performed.
    pub const REBUILT: TrrntZipStatus = TrrntZipStatus(16);

    /// Returns `true` if every flag in `other` is set in `self`.
    pub fn contains(self, other: TrrntZipStatus) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for TrrntZipStatus {
    type Output = TrrntZipStatus;

    fn bitor(self, rhs: TrrntZipStatus) -> TrrntZipStatus {
        TrrntZipStatus(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for TrrntZipStatus {
    fn bitor_assign(&mut self, rhs: TrrntZipStatus) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Display for TrrntZipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "Unknown");
        }
        let mut first = true;
        let mut put = |f: &mut std::fmt::Formatter<'_>, s: &str| -> std::fmt::Result {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            write!(f, "{s}")
        };
        if self.contains(Self::VALID_TRRNTZIP) {
            put(f, "ValidTrrntZip")?;
        }
        if self.contains(Self::CORRUPT_ZIP) {
            put(f, "CorruptZip")?;
        }
        if self.contains(Self::UNSORTED) {
            put(f, "Unsorted")?;
        }
        if self.contains(Self::EXTRA_DIRECTORY) {
            put(f, "ExtraDirectory")?;
        }
        if self.contains(Self::REBUILT) {
            put(f, "Rebuilt")?;
        }
        Ok(())
    }
}
