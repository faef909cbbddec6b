use crate::digest::Checksums;
use crate::types::MarketplaceId;
use crate::version::Version;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compression wrapper around a published image blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Bzip2,
    Zip,
}

impl Compression {
    /// Parse the marketplace `compression` value (`gz`, `bz2`, `zip`, or empty).
    pub fn parse(value: &str) -> Result<Self, SchemaError> {
        match value.trim().trim_start_matches('.').to_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gz" | "gzip" => Ok(Compression::Gzip),
            "bz2" | "bzip2" => Ok(Compression::Bzip2),
            "zip" => Ok(Compression::Zip),
            other => Err(SchemaError::UnknownCompression(other.to_owned())),
        }
    }

    /// Compression implied by a file extension, without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "gz" => Some(Compression::Gzip),
            "bz2" => Some(Compression::Bzip2),
            "zip" => Some(Compression::Zip),
            _ => None,
        }
    }

    pub fn extension(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gz"),
            Compression::Bzip2 => Some("bz2"),
            Compression::Zip => Some("zip"),
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().unwrap_or("none"))
    }
}

/// Flat view of one marketplace image descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub marketplace_id: Option<MarketplaceId>,
    pub title: Option<String>,
    pub version: Option<Version>,
    /// URL of the image blob.
    pub location: Option<String>,
    /// Declared size of the uncompressed image.
    pub bytes: Option<u64>,
    pub compression: Compression,
    pub disk_format: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub os_arch: Option<String>,
    pub checksums: Checksums,
}

impl MetadataRecord {
    /// Record for a bare image (local file or URL) with nothing declared.
    pub fn raw(location: Option<String>) -> Self {
        Self {
            location,
            disk_format: Some("raw".to_owned()),
            ..Self::default()
        }
    }

    /// Registry name for this image: the title, or `os-os_version-os_arch`
    /// when the descriptor has no title.
    pub fn image_name(&self) -> Option<String> {
        if let Some(title) = self.title.as_deref().map(str::trim) {
            if !title.is_empty() {
                return Some(title.to_owned());
            }
        }
        let parts: Vec<&str> = [&self.os, &self.os_version, &self.os_arch]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("-"))
        }
    }

    pub fn canonical_checksum(&self) -> Option<&str> {
        self.checksums.canonical()
    }

    /// Whether the record carries anything a descriptor is expected to declare.
    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.title.is_none()
            && self.marketplace_id.is_none()
            && self.checksums.is_empty()
    }
}
