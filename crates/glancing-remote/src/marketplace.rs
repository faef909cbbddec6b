use crate::{MarketplaceConfig, RemoteBackend, RemoteError};
use glancing_schema::{
    parse_descriptor_file, parse_xml, DescriptorFormat, MarketplaceId, MetadataRecord,
    MARKETPLACE_ID_LEN,
};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// How a descriptor reference given by the operator is to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Local RDF/JSON descriptor file.
    Json,
    /// Local RDF/XML descriptor file.
    Xml,
    /// Image blob at an HTTP(S) URL, no descriptor.
    Url,
    /// Image file on local disk, no descriptor.
    Local,
    /// Marketplace identifier, resolved against the metadata endpoint.
    MarketplaceId,
}

impl DescriptorKind {
    /// Guess the kind of `descriptor`: URLs first, then existing paths by
    /// extension, then anything shaped like a marketplace identifier.
    pub fn detect(descriptor: &str) -> Option<Self> {
        if descriptor.starts_with("http://") || descriptor.starts_with("https://") {
            return Some(DescriptorKind::Url);
        }
        let path = Path::new(descriptor);
        if path.exists() {
            return Some(match path.extension().and_then(|e| e.to_str()) {
                Some("xml") => DescriptorKind::Xml,
                Some("json") => DescriptorKind::Json,
                _ => DescriptorKind::Local,
            });
        }
        if descriptor.len() == MARKETPLACE_ID_LEN {
            return Some(DescriptorKind::MarketplaceId);
        }
        None
    }

    /// Whether the image comes with a descriptor of its own.
    pub fn has_metadata(self) -> bool {
        matches!(
            self,
            DescriptorKind::Json | DescriptorKind::Xml | DescriptorKind::MarketplaceId
        )
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DescriptorKind::Json => "json",
            DescriptorKind::Xml => "xml",
            DescriptorKind::Url => "url",
            DescriptorKind::Local => "image",
            DescriptorKind::MarketplaceId => "market",
        })
    }
}

/// Turns descriptor references into metadata records.
pub struct MetadataFetcher<'a> {
    backend: &'a dyn RemoteBackend,
    config: MarketplaceConfig,
}

impl<'a> MetadataFetcher<'a> {
    pub fn new(backend: &'a dyn RemoteBackend, config: MarketplaceConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    /// Fetch the record for `identifier`. Every failure is logged and
    /// reported as `None`; callers skip the entry.
    pub fn fetch(&self, identifier: &str, kind: DescriptorKind) -> Option<MetadataRecord> {
        let result = match kind {
            DescriptorKind::MarketplaceId => self.fetch_marketplace(&MarketplaceId::new(identifier)),
            DescriptorKind::Json => {
                parse_descriptor_file(identifier, DescriptorFormat::Json).map_err(RemoteError::from)
            }
            DescriptorKind::Xml => {
                parse_descriptor_file(identifier, DescriptorFormat::Xml).map_err(RemoteError::from)
            }
            DescriptorKind::Url => Ok(MetadataRecord::raw(Some(identifier.to_owned()))),
            DescriptorKind::Local => Ok(MetadataRecord::raw(None)),
        };
        match result {
            Ok(record) => {
                debug!("{identifier}: {kind} metadata retrieved");
                Some(record)
            }
            Err(e) => {
                warn!("{identifier}: cannot retrieve metadata: {e}");
                None
            }
        }
    }

    /// Download and parse the XML descriptor of one marketplace entry.
    pub fn fetch_marketplace(&self, id: &MarketplaceId) -> Result<MetadataRecord, RemoteError> {
        let url = self.config.metadata_url(id);
        info!("fetching metadata for {id}");
        let body = self.backend.get(&url)?;
        let mut record = parse_xml(&String::from_utf8_lossy(&body))?;
        match record.marketplace_id {
            None => record.marketplace_id = Some(id.clone()),
            Some(ref declared) if declared != id => {
                debug!("{id}: descriptor declares identifier {declared}");
            }
            Some(_) => {}
        }
        Ok(record)
    }
}
