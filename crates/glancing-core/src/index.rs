use glancing_registry::{snapshot, RegisteredImage, RegistryClient, RegistryError};
use glancing_schema::MarketplaceId;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Snapshot of the registry, looked up by marketplace id, checksum and name.
///
/// Images are indexed in ascending id order and a later image takes over a
/// key already held by an earlier one. Collisions are logged, never fixed.
#[derive(Debug, Clone, Default)]
pub struct RegistryIndex {
    images: Vec<RegisteredImage>,
    by_mpid: BTreeMap<MarketplaceId, usize>,
    by_checksum: BTreeMap<String, usize>,
    by_name: BTreeMap<String, usize>,
}

fn index_key<K: Ord>(
    map: &mut BTreeMap<K, usize>,
    images: &[RegisteredImage],
    kind: &str,
    key: K,
    pos: usize,
) {
    let id = &images[pos].id;
    if let Some(prev) = map.insert(key, pos) {
        warn!(
            "images {} and {id} share the same {kind}, only {id} is considered",
            images[prev].id
        );
    }
}

impl RegistryIndex {
    pub fn from_images(mut images: Vec<RegisteredImage>) -> Self {
        images.sort_by(|a, b| a.id.cmp(&b.id));
        let mut by_mpid = BTreeMap::new();
        let mut by_checksum = BTreeMap::new();
        let mut by_name = BTreeMap::new();

        for (pos, image) in images.iter().enumerate() {
            if let Some(ref mpid) = image.mpid {
                index_key(&mut by_mpid, &images, "marketplace id", mpid.clone(), pos);
            }
            if let Some(ref checksum) = image.checksum {
                index_key(&mut by_checksum, &images, "checksum", checksum.clone(), pos);
            }
            index_key(&mut by_name, &images, "name", image.name.clone(), pos);
        }
        debug!("indexed {} registry image(s)", images.len());

        Self {
            images,
            by_mpid,
            by_checksum,
            by_name,
        }
    }

    /// Fresh snapshot of everything `client` holds.
    pub fn build(client: &dyn RegistryClient) -> Result<Self, RegistryError> {
        Ok(Self::from_images(snapshot(client)?))
    }

    pub fn by_mpid(&self, mpid: &MarketplaceId) -> Option<&RegisteredImage> {
        self.by_mpid.get(mpid).map(|&pos| &self.images[pos])
    }

    pub fn by_checksum(&self, checksum: &str) -> Option<&RegisteredImage> {
        self.by_checksum
            .get(&checksum.to_ascii_lowercase())
            .map(|&pos| &self.images[pos])
    }

    pub fn by_name(&self, name: &str) -> Option<&RegisteredImage> {
        self.by_name.get(name).map(|&pos| &self.images[pos])
    }

    pub fn images(&self) -> &[RegisteredImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
