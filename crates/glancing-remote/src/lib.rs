//! Marketplace access for Glancing.
//!
//! This crate provides the `RemoteBackend` abstraction over HTTP downloads
//! (with a `ureq` implementation), streaming downloads into temporary files,
//! marketplace endpoint configuration, and the `MetadataFetcher` that turns
//! a descriptor reference (marketplace id, URL, or local file) into a
//! `MetadataRecord`.

pub mod config;
pub mod download;
pub mod http;
pub mod marketplace;
pub mod mock;

pub use config::{MarketplaceConfig, DEFAULT_MARKETPLACE_URL};
pub use download::{basename_of_url, download_to_temp};
pub use http::HttpBackend;
pub use marketplace::{DescriptorKind, MetadataFetcher};

use std::io::Write;
use thiserror::Error;

/// `User-Agent` sent on every HTTP request.
pub const USER_AGENT: &str = concat!("glancing/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("invalid descriptor: {0}")]
    Descriptor(#[from] glancing_schema::SchemaError),
}

/// Read-only access to resources addressed by absolute URL.
pub trait RemoteBackend: Send + Sync {
    /// Download a whole resource into memory.
    fn get(&self, url: &str) -> Result<Vec<u8>, RemoteError>;

    /// Stream a resource into `sink`, returning the number of bytes written.
    fn copy_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_crate() {
        assert!(USER_AGENT.starts_with("glancing/"));
    }

    #[test]
    fn remote_error_display_not_found() {
        let e = RemoteError::NotFound("http://x/y".to_owned());
        assert!(e.to_string().contains("http://x/y"));
    }
}
