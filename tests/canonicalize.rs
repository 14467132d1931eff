//! End-to-end canonicalization tests over real files.

mod common;

use std::path::Path;

use common::{FixtureEntry, FixtureOptions, canonicalizer, write_store_zip};
use trrntzip::{Container, Options, TrrntZipStatus, ZipStatus};

fn process(path: &Path, options: Options) -> TrrntZipStatus {
    canonicalizer(options).process(path).unwrap()
}

#[test]
fn test_rebuild_then_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.zip");
    write_store_zip(
        &path,
        &[
            FixtureEntry::new("b.txt", b"bravo"),
            FixtureEntry::new("a.txt", b"alpha"),
        ],
        &FixtureOptions::default(),
    );

    // First run rebuilds
    let status = process(&path, Options::default());
    assert!(status.contains(TrrntZipStatus::VALID_TRRNTZIP));
    assert!(status.contains(TrrntZipStatus::REBUILT));

    let first_bytes = std::fs::read(&path).unwrap();

    // Second run is a no-op and the bytes stay identical
    let status = process(&path, Options::default());
    assert_eq!(status, TrrntZipStatus::VALID_TRRNTZIP);
    assert_eq!(std::fs::read(&path).unwrap(), first_bytes);

    // No temp file left behind
    assert!(!dir.path().join("fixture.zip.tmp").exists());
}

#[test]
fn test_order_invariance() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a-order.zip");
    let path_b = dir.path().join("b-order.zip");

    write_store_zip(
        &path_a,
        &[
            FixtureEntry::new("x.rom", b"payload x"),
            FixtureEntry::new("y.rom", b"payload y"),
            FixtureEntry::new("z.rom", b"payload z"),
        ],
        &FixtureOptions::default(),
    );
    write_store_zip(
        &path_b,
        &[
            FixtureEntry::new("z.rom", b"payload z"),
            FixtureEntry::new("x.rom", b"payload x"),
            FixtureEntry::new("y.rom", b"payload y"),
        ],
        &FixtureOptions::default(),
    );

    process(&path_a, Options::default());
    process(&path_b, Options::default());

    assert_eq!(
        std::fs::read(&path_a).unwrap(),
        std::fs::read(&path_b).unwrap(),
        "same content in different original orders must canonicalize identically"
    );
}

#[test]
fn test_corrupt_entry_aborts_and_preserves_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.zip");
    write_store_zip(
        &path,
        &[
            FixtureEntry::new("good.bin", b"good data"),
            FixtureEntry::new("bad.bin", b"bad data").with_bad_crc(),
        ],
        &FixtureOptions::default(),
    );
    let original_bytes = std::fs::read(&path).unwrap();

    let status = process(&path, Options::default());
    assert!(status.contains(TrrntZipStatus::CORRUPT_ZIP));

    // Aborted rebuild: source untouched, temp deleted
    assert_eq!(std::fs::read(&path).unwrap(), original_bytes);
    assert!(!dir.path().join("corrupt.zip.tmp").exists());
}

#[test]
fn test_empty_directory_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("emptydir.zip");
    write_store_zip(
        &path,
        &[
            FixtureEntry::new("b.txt", b"bravo"),
            FixtureEntry::new("a.txt", b"alpha"),
            FixtureEntry::new("dir/", b""),
        ],
        &FixtureOptions::default(),
    );

    process(&path, Options::default());

    let archive = trrntzip::ZipArchive::open(&path, None, true).unwrap();
    let names: Vec<&str> = (0..archive.entry_count())
        .map(|i| archive.entry(i).name.as_str())
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "dir/"]);
    assert_eq!(archive.status(), ZipStatus::TrrntZip);
}

#[test]
fn test_populated_directory_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fulldir.zip");
    write_store_zip(
        &path,
        &[
            FixtureEntry::new("b.txt", b"bravo"),
            FixtureEntry::new("a.txt", b"alpha"),
            FixtureEntry::new("dir/", b""),
            FixtureEntry::new("dir/c.txt", b"charlie"),
        ],
        &FixtureOptions::default(),
    );

    process(&path, Options::default());

    let archive = trrntzip::ZipArchive::open(&path, None, true).unwrap();
    let names: Vec<&str> = (0..archive.entry_count())
        .map(|i| archive.entry(i).name.as_str())
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "dir/c.txt"]);
    assert_eq!(archive.status(), ZipStatus::TrrntZip);
}

#[test]
fn test_marker_exactness() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("marker.zip");
    write_store_zip(
        &path,
        &[FixtureEntry::new("only.bin", b"bytes")],
        &FixtureOptions::default(),
    );
    process(&path, Options::default());

    let bytes = std::fs::read(&path).unwrap();
    let comment = &bytes[bytes.len() - 22..];
    assert_eq!(&comment[..14], b"TORRENTZIPPED-");

    // The 8 hex digits are the uppercase CRC-32 of the central directory
    let archive = trrntzip::ZipArchive::open(&path, None, true).unwrap();
    assert_eq!(archive.status(), ZipStatus::TrrntZip);
    drop(archive);

    // Mutate one central-directory byte that no local header duplicates
    // (the version-made-by field) and the marker check must fail
    let eocd_at = bytes.len() - 22;
    let cd_start =
        u32::from_le_bytes(bytes[eocd_at - 6..eocd_at - 2].try_into().unwrap()) as usize;
    let mut mutated = bytes.clone();
    mutated[cd_start + 4] ^= 0x01;
    std::fs::write(&path, &mutated).unwrap();

    let archive = trrntzip::ZipArchive::open(&path, None, true).unwrap();
    assert_eq!(archive.status(), ZipStatus::None);
}

#[test]
fn test_check_only_never_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkonly.zip");
    write_store_zip(
        &path,
        &[
            FixtureEntry::new("b", b"2"),
            FixtureEntry::new("a", b"1"),
        ],
        &FixtureOptions::default(),
    );
    let before = std::fs::read(&path).unwrap();

    let status = process(
        &path,
        Options {
            check_only: true,
            ..Options::default()
        },
    );
    assert!(status.contains(TrrntZipStatus::UNSORTED));
    assert!(!status.contains(TrrntZipStatus::VALID_TRRNTZIP));
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn test_force_rebuild_reproduces_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forced.zip");
    write_store_zip(
        &path,
        &[FixtureEntry::new("data.bin", b"stable bytes")],
        &FixtureOptions::default(),
    );

    process(&path, Options::default());
    let canonical = std::fs::read(&path).unwrap();

    // Forcing a rebuild of canonical input must reproduce it exactly
    let status = process(
        &path,
        Options {
            force_rebuild: true,
            ..Options::default()
        },
    );
    assert!(status.contains(TrrntZipStatus::REBUILT));
    assert_eq!(std::fs::read(&path).unwrap(), canonical);
}

#[test]
fn test_data_descriptor_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("descriptor.zip");
    write_store_zip(
        &path,
        &[
            FixtureEntry::new("two.bin", b"second"),
            FixtureEntry::new("one.bin", b"first"),
        ],
        &FixtureOptions {
            data_descriptors: true,
            ..FixtureOptions::default()
        },
    );

    let status = process(&path, Options::default());
    assert!(status.contains(TrrntZipStatus::VALID_TRRNTZIP));

    let mut archive = Container::open(&path, None, true).unwrap();
    assert_eq!(archive.status(), ZipStatus::TrrntZip);
    archive.deep_scan();
    for i in 0..archive.entry_count() {
        assert_eq!(archive.entry_meta(i).status, trrntzip::FileVerdict::Good);
    }
}

#[test]
fn test_trailing_garbage_is_not_canonical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.zip");
    write_store_zip(
        &path,
        &[FixtureEntry::new("a.bin", b"data")],
        &FixtureOptions {
            trailing_garbage: true,
            ..FixtureOptions::default()
        },
    );

    let archive = trrntzip::ZipArchive::open(&path, None, true).unwrap();
    assert_eq!(archive.status(), ZipStatus::ExtraData);

    // Rebuilding strips the trailing bytes
    let status = process(&path, Options::default());
    assert!(status.contains(TrrntZipStatus::VALID_TRRNTZIP));
    let archive = trrntzip::ZipArchive::open(&path, None, true).unwrap();
    assert_eq!(archive.status(), ZipStatus::TrrntZip);
}

#[test]
fn test_utf8_names_survive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unicode.zip");
    write_store_zip(
        &path,
        &[
            FixtureEntry::new("\u{30c6}\u{30b9}\u{30c8}.rom", "\u{30c6}".as_bytes()),
            FixtureEntry::new("ascii.rom", b"plain"),
        ],
        &FixtureOptions {
            utf8_names: true,
            ..FixtureOptions::default()
        },
    );

    let status = process(&path, Options::default());
    assert!(status.contains(TrrntZipStatus::VALID_TRRNTZIP));

    let archive = trrntzip::ZipArchive::open(&path, None, true).unwrap();
    assert_eq!(archive.status(), ZipStatus::TrrntZip);
    let names: Vec<&str> = (0..archive.entry_count())
        .map(|i| archive.entry(i).name.as_str())
        .collect();
    assert_eq!(names, vec!["ascii.rom", "\u{30c6}\u{30b9}\u{30c8}.rom"]);
}

#[test]
fn test_verify_pipeline_flags_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deepscan.zip");
    write_store_zip(
        &path,
        &[
            FixtureEntry::new("ok.bin", b"fine"),
            FixtureEntry::new("broken.bin", b"mismatch").with_bad_crc(),
        ],
        &FixtureOptions::default(),
    );

    let mut archive = Container::open(&path, None, true).unwrap();
    archive.deep_scan();
    assert_eq!(archive.entry_meta(0).status, trrntzip::FileVerdict::Good);
    assert_eq!(archive.entry_meta(1).status, trrntzip::FileVerdict::CrcError);
}
