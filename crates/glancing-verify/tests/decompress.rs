use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use glancing_schema::{Algorithm, Compression};
use glancing_verify::{ChecksumEngine, DecompressError, Decompressor};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

fn payload() -> Vec<u8> {
    (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut enc = BzEncoder::new(Vec::new(), bzip2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

#[test]
fn gzip_roundtrip_deletes_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "image.raw.gz", &gzip(&payload()));

    let out = Decompressor::new(&input, None).unwrap().run(true).unwrap();
    assert_eq!(out, dir.path().join("image.raw"));
    assert_eq!(fs::read(&out).unwrap(), payload());
    assert!(!input.exists());
}

#[test]
fn bzip2_roundtrip_keeps_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "image.raw.bz2", &bzip2(&payload()));

    let out = Decompressor::new(&input, Some(Compression::Bzip2))
        .unwrap()
        .run(false)
        .unwrap();
    assert_eq!(fs::read(&out).unwrap(), payload());
    assert!(input.exists());
}

#[test]
fn zip_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let data = payload();
    let input = write(dir.path(), "image.zip", &zip_of(&[("image.raw", data.as_slice())]));

    let out = Decompressor::new(&input, None).unwrap().run(true).unwrap();
    assert_eq!(out, dir.path().join("image"));
    assert_eq!(fs::read(&out).unwrap(), data);
}

#[test]
fn zip_with_several_entries_takes_first() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "pair.zip",
        &zip_of(&[("first", &b"one"[..]), ("second", &b"two"[..])]),
    );
    let out = Decompressor::new(&input, None).unwrap().run(false).unwrap();
    assert_eq!(fs::read(&out).unwrap(), b"one");
}

#[test]
fn empty_zip_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "empty.zip", &zip_of(&[]));
    let err = Decompressor::new(&input, None).unwrap().run(false).unwrap_err();
    assert!(matches!(err, DecompressError::EmptyArchive(_)));
    assert!(!dir.path().join("empty").exists());
}

#[test]
fn declared_gzip_on_plain_file_is_wrong_format() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "plain.img", b"this is not compressed at all");

    let err = Decompressor::new(&input, Some(Compression::Gzip))
        .unwrap()
        .run(true)
        .unwrap_err();
    assert!(matches!(err, DecompressError::WrongFormat { .. }));
    assert!(!dir.path().join("plain.img_uncompressed").exists());
    assert!(input.exists());
}

#[test]
fn truncated_gzip_removes_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let full = gzip(&payload());
    let input = write(dir.path(), "cut.raw.gz", &full[..full.len() / 2]);

    let result = Decompressor::new(&input, None).unwrap().run(true);
    assert!(result.is_err());
    assert!(!dir.path().join("cut.raw").exists());
    assert!(input.exists());
}

#[test]
fn truncated_bzip2_removes_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let full = bzip2(&payload());
    let input = write(dir.path(), "cut.raw.bz2", &full[..full.len() / 2]);

    let result = Decompressor::new(&input, None).unwrap().run(false);
    assert!(result.is_err());
    assert!(!dir.path().join("cut.raw").exists());
}

#[test]
fn decompressed_digest_matches_original() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "toto.gz", &gzip(b"toto"));
    let out = Decompressor::new(&input, None).unwrap().run(true).unwrap();

    let md5: BTreeSet<Algorithm> = [Algorithm::Md5].into_iter().collect();
    let digests = ChecksumEngine::default().compute(&out, &md5).unwrap();
    assert_eq!(digests[&Algorithm::Md5], "f71dbe52628a3f83a77ab494817525c6");
}
