//! Local image verification for Glancing.
//!
//! `ChecksumEngine` computes several digests of a file in a single read pass
//! and compares them with a declared `Checksums` set. `Decompressor` unpacks
//! gzip, bzip2 and zip images into a sibling file without ever overwriting an
//! existing one.

pub mod decompress;
pub mod multihash;

pub use decompress::Decompressor;
pub use glancing_schema::length_to_algorithm;
pub use multihash::{ChecksumEngine, Mismatch, Verification, DEFAULT_BLOCK_SIZE};

use glancing_schema::Compression;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("checksum I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("output already exists: {0}")]
    OutputExists(PathBuf),
    #[error("file extension says {found} but {declared} was declared")]
    ExtensionMismatch {
        declared: Compression,
        found: Compression,
    },
    #[error("no compression declared and no compression extension on {0}")]
    NotCompressed(PathBuf),
    #[error("{path} is not {format} data")]
    WrongFormat { path: PathBuf, format: Compression },
    #[error("{format} stream in {path} is truncated or corrupt")]
    Truncated { path: PathBuf, format: Compression },
    #[error("zip archive {0} contains no entry")]
    EmptyArchive(PathBuf),
    #[error("decompression I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompress_error_display_mismatch() {
        let e = DecompressError::ExtensionMismatch {
            declared: Compression::Bzip2,
            found: Compression::Gzip,
        };
        let msg = e.to_string();
        assert!(msg.contains("gz"));
        assert!(msg.contains("bz2"));
    }

    #[test]
    fn verify_error_display_not_found() {
        let e = VerifyError::NotFound(PathBuf::from("/nope"));
        assert!(e.to_string().contains("/nope"));
    }
}
