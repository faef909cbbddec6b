//! Core orchestration for Glancing.
//!
//! This crate ties descriptor parsing, image verification, marketplace access
//! and the image registry together: the `ImportPipeline` turns one image
//! source into a verified registry upload, the `RegistryIndex` is a snapshot
//! of what the registry already holds, and the `ReconciliationEngine` decides
//! for each marketplace entry whether to upload, retag, or leave it alone.

pub mod index;
pub mod pipeline;
pub mod reconcile;
pub mod settings;

pub use index::RegistryIndex;
pub use pipeline::{parse_sums_file, ImportOptions, ImportOutcome, ImportPipeline, ImportSource, RejectReason};
pub use reconcile::{run_sync, Decision, EntryOutcome, ReconciliationEngine, SyncReport};
pub use settings::Settings;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("descriptor error: {0}")]
    Schema(#[from] glancing_schema::SchemaError),
    #[error("verification error: {0}")]
    Verify(#[from] glancing_verify::VerifyError),
    #[error("decompression error: {0}")]
    Decompress(#[from] glancing_verify::DecompressError),
    #[error("remote error: {0}")]
    Remote(#[from] glancing_remote::RemoteError),
    #[error("registry error: {0}")]
    Registry(#[from] glancing_registry::RegistryError),
    #[error("invalid settings file {path}: {message}")]
    Settings { path: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
