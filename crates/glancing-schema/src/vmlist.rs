//! Image list files: one marketplace id per line.

use crate::types::MarketplaceId;
use crate::SchemaError;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

/// Ordered, de-duplicated set of marketplace ids to synchronize.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageList {
    ids: Vec<MarketplaceId>,
    seen: BTreeSet<MarketplaceId>,
}

impl ImageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id, returning false if it was already listed.
    pub fn push(&mut self, id: MarketplaceId) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn contains(&self, id: &MarketplaceId) -> bool {
        self.seen.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarketplaceId> {
        self.ids.iter()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn extend_from_text(&mut self, text: &str, origin: &str) {
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.contains(char::is_whitespace) {
                warn!("{origin}:{}: ignoring malformed entry '{line}'", lineno + 1);
                continue;
            }
            if !MarketplaceId::is_well_formed(line) {
                debug!("{origin}:{}: unusual marketplace id '{line}'", lineno + 1);
            }
            if !self.push(MarketplaceId::new(line)) {
                warn!("{origin}:{}: duplicate entry '{line}' ignored", lineno + 1);
            }
        }
    }
}

impl<'a> IntoIterator for &'a ImageList {
    type Item = &'a MarketplaceId;
    type IntoIter = std::slice::Iter<'a, MarketplaceId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}

/// Parse the contents of a single image list.
pub fn parse_image_list(text: &str) -> ImageList {
    let mut list = ImageList::new();
    list.extend_from_text(text, "<input>");
    list
}

/// Load and merge several image list files, in order. Ids listed in more
/// than one file are kept at their first position.
pub fn load_image_lists<P: AsRef<Path>>(paths: &[P]) -> Result<ImageList, SchemaError> {
    let mut list = ImageList::new();
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::ImageList {
            path: path.display().to_string(),
            source,
        })?;
        list.extend_from_text(&text, &path.display().to_string());
    }
    debug!("loaded {} image ids from {} list(s)", list.len(), paths.len());
    Ok(list)
}
