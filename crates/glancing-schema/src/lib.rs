//! Descriptor schema for Glancing.
//!
//! This crate defines the data layer shared by every other crate: identifier
//! newtypes (`MarketplaceId`, `ImageId`), ordered image `Version`s, digest
//! `Algorithm`s and the source-aware `Checksums` set, the flat
//! `MetadataRecord` produced from StratusLab RDF/JSON and RDF/XML descriptors,
//! and parsing of the plain-text image list files.

pub mod descriptor;
pub mod digest;
pub mod record;
pub mod types;
pub mod version;
pub mod vmlist;

pub use descriptor::{parse_descriptor_file, parse_json, parse_xml, DescriptorFormat};
pub use digest::{length_to_algorithm, AddOutcome, Algorithm, ChecksumSource, Checksums};
pub use record::{Compression, MetadataRecord};
pub use types::{ImageId, MarketplaceId, MARKETPLACE_ID_LEN};
pub use version::Version;
pub use vmlist::{load_image_lists, parse_image_list, ImageList};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse JSON descriptor: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse XML descriptor: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("descriptor is not a JSON object")]
    NotAnObject,
    #[error("marketplace returned an error: {0}")]
    ErrorPayload(String),
    #[error("descriptor contains no image metadata")]
    Empty,
    #[error("unrecognized digest length {0}")]
    UnknownAlgorithm(usize),
    #[error("unknown digest algorithm name: {0}")]
    UnknownAlgorithmName(String),
    #[error("digest is not hexadecimal: {0}")]
    InvalidDigest(String),
    #[error("conflicting {algorithm} digests: {existing} vs {incoming}")]
    ChecksumConflict {
        algorithm: Algorithm,
        existing: String,
        incoming: String,
    },
    #[error("unknown compression: {0}")]
    UnknownCompression(String),
    #[error("invalid image size: {0}")]
    InvalidSize(String),
    #[error("cannot read image list {path}: {source}")]
    ImageList {
        path: String,
        source: std::io::Error,
    },
}
