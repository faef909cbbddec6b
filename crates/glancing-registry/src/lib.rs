//! Image registry access for Glancing.
//!
//! `RegistryClient` is the narrow contract the reconciliation core needs from
//! an image registry. `GlanceCli` implements it by driving the OpenStack
//! `glance` command-line client and parsing its tables; `MockRegistry` keeps
//! images in memory and records every call for tests.

pub mod glance;
pub mod mock;
pub mod table;

pub use glance::GlanceCli;
pub use mock::{Call, MockRegistry};
pub use table::{map_block, parse_block, Table};

use glancing_schema::{ImageId, MarketplaceId, Version};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("image registry unavailable: {0}")]
    Unavailable(String),
    #[error("no image matches {0}")]
    NotFound(String),
    #[error("cannot parse registry output: {0}")]
    Parse(String),
}

/// Which registry images an operation applies to.
///
/// Names are not unique in the registry, and a name selector also matches an
/// image whose id equals the given string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    ByName(String),
    ByNames(BTreeSet<String>),
    ById(ImageId),
}

impl Selector {
    pub fn name(name: impl Into<String>) -> Self {
        Selector::ByName(name.into())
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selector::ByNames(names.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, id: &ImageId, name: &str) -> bool {
        match self {
            Selector::All => true,
            Selector::ByName(n) => n == name || n == id.as_str(),
            Selector::ByNames(set) => set.contains(name) || set.contains(id.as_str()),
            Selector::ById(want) => want == id,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => f.write_str("all images"),
            Selector::ByName(n) => write!(f, "'{n}'"),
            Selector::ByNames(set) => {
                let names: Vec<&str> = set.iter().map(String::as_str).collect();
                write!(f, "[{}]", names.join(", "))
            }
            Selector::ById(id) => write!(f, "id {id}"),
        }
    }
}

/// A registry entry as this tool sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredImage {
    pub id: ImageId,
    pub name: String,
    /// Registry-native md5; absent for images still being queued.
    pub checksum: Option<String>,
    pub version: Option<Version>,
    pub mpid: Option<MarketplaceId>,
}

impl RegisteredImage {
    pub fn new(id: impl Into<ImageId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            checksum: None,
            version: None,
            mpid: None,
        }
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: &str) -> Self {
        self.checksum = Some(checksum.to_ascii_lowercase());
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<Version>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_mpid(mut self, mpid: &str) -> Self {
        self.mpid = Some(MarketplaceId::new(mpid));
        self
    }
}

/// Request to upload a local file as a new registry image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub file: PathBuf,
    pub checksum: Option<String>,
    pub name: Option<String>,
    pub disk_format: Option<String>,
}

impl ImportRequest {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            checksum: None,
            name: None,
            disk_format: None,
        }
    }
}

/// Properties this tool writes on registry images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageProperties {
    pub name: Option<String>,
    pub version: Option<Version>,
    pub mpid: Option<MarketplaceId>,
}

impl ImageProperties {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.version.is_none() && self.mpid.is_none()
    }
}

/// Synchronous image registry operations. Failures are returned, never
/// panicked on.
pub trait RegistryClient {
    /// Check that the registry answers at all.
    fn available(&self) -> Result<(), RegistryError>;

    /// Ids of every image matching `selector`.
    fn ids(&self, selector: &Selector) -> Result<BTreeSet<ImageId>, RegistryError>;

    fn exists(&self, selector: &Selector) -> Result<bool, RegistryError> {
        Ok(!self.ids(selector)?.is_empty())
    }

    /// Details of one image, `None` if it does not exist.
    fn show(&self, id: &ImageId) -> Result<Option<RegisteredImage>, RegistryError>;

    fn import_image(&self, request: &ImportRequest) -> Result<ImageId, RegistryError>;

    /// Delete the first image matching `selector`.
    fn delete(&self, selector: &Selector) -> Result<(), RegistryError>;

    fn rename(&self, selector: &Selector, new_name: &str) -> Result<(), RegistryError>;

    fn update_properties(
        &self,
        selector: &Selector,
        properties: &ImageProperties,
    ) -> Result<(), RegistryError>;

    /// Save the image data of the first match to `path`.
    fn download(&self, selector: &Selector, path: &Path) -> Result<(), RegistryError>;

    /// Resolve a selector to a single id: ids are taken as is, other
    /// selectors resolve to their first match.
    fn resolve_id(&self, selector: &Selector) -> Result<ImageId, RegistryError> {
        if let Selector::ById(id) = selector {
            return Ok(id.clone());
        }
        self.ids(selector)?
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::NotFound(selector.to_string()))
    }
}

/// Delete every image matching `selector`, returning how many were removed.
/// All matches are attempted; the first failure is returned at the end.
pub fn delete_all(
    client: &dyn RegistryClient,
    selector: &Selector,
) -> Result<usize, RegistryError> {
    let ids = client.ids(selector)?;
    let mut deleted = 0;
    let mut first_err = None;
    for id in ids {
        match client.delete(&Selector::ById(id.clone())) {
            Ok(()) => {
                debug!("deleted image {id}");
                deleted += 1;
            }
            Err(e) => {
                warn!("cannot delete image {id}: {e}");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(deleted),
    }
}

/// Every registered image, in ascending id order. Images that vanish
/// between listing and showing are skipped.
pub fn snapshot(client: &dyn RegistryClient) -> Result<Vec<RegisteredImage>, RegistryError> {
    let mut images = Vec::new();
    for id in client.ids(&Selector::All)? {
        match client.show(&id)? {
            Some(image) => images.push(image),
            None => debug!("image {id} disappeared while listing"),
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_names_and_ids() {
        let id = ImageId::new("185beafd-c5fc-4877-bbcc-e49a8d3f03ed");
        assert!(Selector::All.matches(&id, "x"));
        assert!(Selector::name("cirros").matches(&id, "cirros"));
        assert!(Selector::name(id.as_str()).matches(&id, "cirros"));
        assert!(!Selector::name("other").matches(&id, "cirros"));
        assert!(Selector::names(["a", "cirros"]).matches(&id, "cirros"));
        assert!(!Selector::names(["a", "b"]).matches(&id, "cirros"));
        assert!(Selector::ById(id.clone()).matches(&id, "whatever"));
        assert!(!Selector::ById(ImageId::new("x")).matches(&id, "cirros"));
    }

    #[test]
    fn selector_display() {
        assert_eq!(Selector::name("a").to_string(), "'a'");
        assert_eq!(Selector::names(["b", "a"]).to_string(), "[a, b]");
        assert_eq!(Selector::ById(ImageId::new("1")).to_string(), "id 1");
    }

    #[test]
    fn registered_image_builder() {
        let img = RegisteredImage::new("1", "cirros")
            .with_checksum("EE1ECA47DC88F4879D8A229CC70A07C6")
            .with_version("2")
            .with_mpid("PIDt94ySjKEHKKvWrYijsZtclxU");
        assert_eq!(
            img.checksum.as_deref(),
            Some("ee1eca47dc88f4879d8a229cc70a07c6")
        );
        assert_eq!(img.version, Some(Version::new("2")));
        assert!(img.mpid.is_some());
    }

    #[test]
    fn registered_image_serializes() {
        let img = RegisteredImage::new("1", "cirros").with_version("3");
        let json = serde_json::to_value(&img).unwrap();
        assert_eq!(json["name"], "cirros");
        assert_eq!(json["version"], "3");
        assert!(json["mpid"].is_null());
    }

    #[test]
    fn empty_properties() {
        assert!(ImageProperties::default().is_empty());
        let props = ImageProperties {
            name: Some("n".to_owned()),
            ..ImageProperties::default()
        };
        assert!(!props.is_empty());
    }

    #[test]
    fn registry_error_display() {
        let e = RegistryError::CommandFailed {
            command: "glance image-delete 1".to_owned(),
            status: "exit status: 1".to_owned(),
            stderr: "boom".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("glance image-delete 1"));
        assert!(msg.contains("boom"));
    }
}
