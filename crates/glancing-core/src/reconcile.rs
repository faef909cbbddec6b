//! Reconciliation of marketplace entries against the registry.
//!
//! For each marketplace id the engine looks for evidence in a fixed order:
//! an image tagged with the same marketplace id, then one with the same
//! checksum, then one with the same name. The first match decides; no match
//! means a new upload. Deciding is pure; `apply` performs the registry calls,
//! always renaming before uploading and tagging only after a successful
//! upload.

use crate::index::RegistryIndex;
use crate::pipeline::{ImportOptions, ImportOutcome, ImportPipeline, ImportSource};
use crate::CoreError;
use glancing_registry::{ImageProperties, RegisteredImage, RegistryClient, Selector};
use glancing_remote::{DescriptorKind, MetadataFetcher};
use glancing_schema::{load_image_lists, ImageId, MarketplaceId, MetadataRecord, Version};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// What to do with one marketplace entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing in the registry resembles the entry.
    New,
    /// Same marketplace id and checksum, nothing to change.
    UpToDate { old: RegisteredImage },
    /// Same marketplace id and checksum, but labels changed.
    UpdateProperties {
        old: RegisteredImage,
        properties: ImageProperties,
    },
    /// Same marketplace id, new data and a higher version.
    Upgrade { old: RegisteredImage },
    /// Same marketplace id, new data and a lower version.
    Regression { old: RegisteredImage },
    /// Same marketplace id and version, different data.
    VersionReuse { old: RegisteredImage },
    /// Same marketplace id and version, but no md5 on one side to tell
    /// whether the data changed.
    Unverifiable { old: RegisteredImage },
    /// Same data registered under other labels.
    AmbiguousDuplicate { old: RegisteredImage },
    /// Same data, same labels, not tagged with the marketplace id.
    AlreadyRegistered { old: RegisteredImage },
    /// Same name, checksum and version, yet no checksum match.
    IndexInconsistency { old: RegisteredImage },
    /// Same name with a higher registered version.
    Reject { old: RegisteredImage },
    /// Same name, to be replaced.
    Replace { old: RegisteredImage },
}

impl Decision {
    /// Whether applying the decision calls the registry at all.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Decision::New
                | Decision::UpdateProperties { .. }
                | Decision::Upgrade { .. }
                | Decision::Replace { .. }
        )
    }
}

/// Result of reconciling one marketplace entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryOutcome {
    Uploaded { id: ImageId },
    Updated { id: ImageId },
    Unchanged,
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub mpid: MarketplaceId,
    #[serde(flatten)]
    pub outcome: EntryOutcome,
}

/// Tally of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub uploaded: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub entries: Vec<EntryReport>,
}

impl SyncReport {
    pub fn record(&mut self, mpid: MarketplaceId, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Uploaded { .. } => self.uploaded += 1,
            EntryOutcome::Updated { .. } => self.updated += 1,
            EntryOutcome::Unchanged => self.unchanged += 1,
            EntryOutcome::Skipped { .. } => self.skipped += 1,
            EntryOutcome::Failed { .. } => self.failed += 1,
        }
        self.entries.push(EntryReport { mpid, outcome });
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Labels of `new` that `old` lacks. Absent new labels never erase old ones.
fn changed_properties(
    old: &RegisteredImage,
    mpid: &MarketplaceId,
    new: &MetadataRecord,
) -> ImageProperties {
    ImageProperties {
        name: new.image_name().filter(|n| *n != old.name),
        version: new
            .version
            .clone()
            .filter(|v| old.version.as_ref() != Some(v)),
        mpid: Some(mpid.clone()).filter(|m| old.mpid.as_ref() != Some(m)),
    }
}

/// Whether `old` holds the data published as `new_md5`; `None` when either
/// side has no md5 to compare.
fn content_matches(old: &RegisteredImage, new_md5: Option<&str>) -> Option<bool> {
    match (old.checksum.as_deref(), new_md5) {
        (Some(a), Some(b)) => Some(a.eq_ignore_ascii_case(b)),
        _ => None,
    }
}

fn version_label(version: Option<&Version>) -> &str {
    version.map_or("<none>", Version::as_str)
}

/// Owns the registry snapshot and reconciles entries against it.
pub struct ReconciliationEngine<'a> {
    pipeline: ImportPipeline<'a>,
    index: RegistryIndex,
    options: ImportOptions,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(pipeline: ImportPipeline<'a>, index: RegistryIndex) -> Self {
        Self {
            pipeline,
            index,
            options: ImportOptions::default(),
        }
    }

    /// Base options for every upload; the name is always set per entry.
    #[must_use]
    pub fn with_import_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn index(&self) -> &RegistryIndex {
        &self.index
    }

    fn registry(&self) -> &'a dyn RegistryClient {
        self.pipeline.registry()
    }

    /// Decide what to do with `new`, published as `mpid`.
    pub fn decide(&self, mpid: &MarketplaceId, new: &MetadataRecord) -> Decision {
        let new_md5 = new.canonical_checksum();

        if let Some(old) = self.index.by_mpid(mpid) {
            let old = old.clone();
            let same_content = content_matches(&old, new_md5);
            if same_content == Some(true) {
                let properties = changed_properties(&old, mpid, new);
                return if properties.is_empty() {
                    Decision::UpToDate { old }
                } else {
                    Decision::UpdateProperties { old, properties }
                };
            }
            return match new.version.cmp(&old.version) {
                Ordering::Greater => Decision::Upgrade { old },
                Ordering::Less => Decision::Regression { old },
                Ordering::Equal if same_content.is_none() => Decision::Unverifiable { old },
                Ordering::Equal => Decision::VersionReuse { old },
            };
        }

        if let Some(old) = new_md5.and_then(|md5| self.index.by_checksum(md5)) {
            let old = old.clone();
            let name_differs = new.image_name().is_some_and(|n| n != old.name);
            let version_differs = old.version != new.version;
            return if name_differs || version_differs {
                Decision::AmbiguousDuplicate { old }
            } else {
                Decision::AlreadyRegistered { old }
            };
        }

        if let Some(old) = new.image_name().and_then(|n| self.index.by_name(&n)) {
            let old = old.clone();
            if content_matches(&old, new_md5) == Some(true) && old.version == new.version {
                return Decision::IndexInconsistency { old };
            }
            if old.version > new.version {
                return Decision::Reject { old };
            }
            return Decision::Replace { old };
        }

        Decision::New
    }

    /// Decide and apply for one entry.
    pub fn reconcile(&mut self, mpid: &MarketplaceId, new: &MetadataRecord) -> EntryOutcome {
        let decision = self.decide(mpid, new);
        debug!("{mpid}: {decision:?}");
        self.apply(mpid, new, decision)
    }

    pub fn apply(
        &mut self,
        mpid: &MarketplaceId,
        new: &MetadataRecord,
        decision: Decision,
    ) -> EntryOutcome {
        let new_version = version_label(new.version.as_ref());
        match decision {
            Decision::New => {
                info!("{mpid}: new image");
                self.upload(mpid, new)
            }
            Decision::UpToDate { old } => {
                debug!("{mpid}: image {} is up to date", old.id);
                EntryOutcome::Unchanged
            }
            Decision::AlreadyRegistered { old } => {
                info!(
                    "{mpid}: same image already registered as {} ({})",
                    old.name, old.id
                );
                EntryOutcome::Unchanged
            }
            Decision::UpdateProperties { old, properties } => {
                info!("{mpid}: updating properties of image {}", old.id);
                let selector = Selector::ById(old.id.clone());
                let outcome = match self.registry().update_properties(&selector, &properties) {
                    Ok(()) => EntryOutcome::Updated { id: old.id },
                    Err(e) => {
                        warn!("{mpid}: cannot update properties: {e}");
                        EntryOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                };
                self.refresh();
                outcome
            }
            Decision::Upgrade { old } => {
                info!(
                    "{mpid}: upgrading {} from version {} to {new_version}",
                    old.name,
                    version_label(old.version.as_ref())
                );
                self.rename_old(&old);
                self.upload(mpid, new)
            }
            Decision::Replace { old } => {
                info!("{mpid}: replacing image {} ({})", old.name, old.id);
                self.rename_old(&old);
                self.upload(mpid, new)
            }
            Decision::Regression { old } => {
                let reason = format!(
                    "version going backwards: registered {}, published {new_version}",
                    version_label(old.version.as_ref())
                );
                warn!("{mpid}: {reason}, fix the image on the marketplace");
                EntryOutcome::Skipped { reason }
            }
            Decision::VersionReuse { old } => {
                let reason = format!(
                    "version {new_version} republished with different data than image {}",
                    old.id
                );
                warn!("{mpid}: {reason}, possible data corruption");
                EntryOutcome::Skipped { reason }
            }
            Decision::Unverifiable { old } => {
                let reason = format!(
                    "no md5 to compare version {new_version} with image {}",
                    old.id
                );
                warn!("{mpid}: {reason}, leaving it alone");
                EntryOutcome::Skipped { reason }
            }
            Decision::AmbiguousDuplicate { old } => {
                let reason = format!(
                    "same data as image {} ({} version {}) under other labels",
                    old.id,
                    old.name,
                    version_label(old.version.as_ref())
                );
                warn!("{mpid}: {reason}, cannot tell which one is right");
                EntryOutcome::Skipped { reason }
            }
            Decision::IndexInconsistency { old } => {
                let reason = format!("identical image {} missed by checksum lookup", old.id);
                warn!("{mpid}: {reason}, this should not happen");
                EntryOutcome::Skipped { reason }
            }
            Decision::Reject { old } => {
                let reason = format!(
                    "{} is registered with version {}, newer than {new_version}",
                    old.name,
                    version_label(old.version.as_ref())
                );
                warn!("{mpid}: {reason}");
                EntryOutcome::Skipped { reason }
            }
        }
    }

    /// Best-effort rename of a superseded image to `<name>_old`.
    fn rename_old(&mut self, old: &RegisteredImage) {
        let new_name = format!("{}_old", old.name);
        match self
            .registry()
            .rename(&Selector::ById(old.id.clone()), &new_name)
        {
            Ok(()) => {
                info!("previous image {} renamed to {new_name}", old.id);
                self.refresh();
            }
            Err(e) => warn!("cannot rename image {} to {new_name}: {e}", old.id),
        }
    }

    fn upload(&mut self, mpid: &MarketplaceId, new: &MetadataRecord) -> EntryOutcome {
        let Some(name) = new.image_name() else {
            warn!("{mpid}: descriptor has neither title nor os fields");
            return EntryOutcome::Failed {
                reason: "cannot derive an image name".to_owned(),
            };
        };
        let options = ImportOptions {
            name: Some(name.clone()),
            ..self.options.clone()
        };
        let mut record = new.clone();
        record.marketplace_id = Some(mpid.clone());

        let outcome = match self.pipeline.run(ImportSource::Metadata(record), &options) {
            ImportOutcome::Imported { id, .. } => {
                let properties = ImageProperties {
                    name: Some(name),
                    version: new.version.clone(),
                    mpid: Some(mpid.clone()),
                };
                match self
                    .registry()
                    .update_properties(&Selector::ById(id.clone()), &properties)
                {
                    Ok(()) => EntryOutcome::Uploaded { id },
                    Err(e) => {
                        warn!("{mpid}: image {id} uploaded but not tagged: {e}");
                        EntryOutcome::Failed {
                            reason: format!("image {id} uploaded but not tagged: {e}"),
                        }
                    }
                }
            }
            ImportOutcome::Rejected(reason) | ImportOutcome::DryRunFail(reason) => {
                EntryOutcome::Failed {
                    reason: reason.to_string(),
                }
            }
            ImportOutcome::DryRunOk { .. } => EntryOutcome::Unchanged,
        };
        self.refresh();
        outcome
    }

    /// Replace the snapshot after a mutation; keep the old one if the
    /// registry cannot be listed.
    fn refresh(&mut self) {
        match RegistryIndex::build(self.registry()) {
            Ok(index) => self.index = index,
            Err(e) => warn!("cannot refresh registry snapshot, keeping the previous one: {e}"),
        }
    }
}

/// Reconcile every marketplace id listed in `vmlists`.
///
/// Unreadable lists and an unreachable registry abort the run; every other
/// failure is confined to its entry.
pub fn run_sync(
    pipeline: ImportPipeline<'_>,
    fetcher: &MetadataFetcher<'_>,
    vmlists: &[PathBuf],
    options: ImportOptions,
) -> Result<SyncReport, CoreError> {
    let ids = load_image_lists(vmlists)?;
    info!("{} image(s) listed", ids.len());

    let registry = pipeline.registry();
    registry.available()?;
    let index = RegistryIndex::build(registry)?;
    let mut engine = ReconciliationEngine::new(pipeline, index).with_import_options(options);

    let mut report = SyncReport::default();
    for mpid in &ids {
        let outcome = match fetcher.fetch(mpid.as_str(), DescriptorKind::MarketplaceId) {
            Some(record) => engine.reconcile(mpid, &record),
            None => EntryOutcome::Skipped {
                reason: "cannot retrieve metadata".to_owned(),
            },
        };
        report.record(mpid.clone(), outcome);
    }
    info!(
        "sync done: {} uploaded, {} updated, {} unchanged, {} skipped, {} failed",
        report.uploaded, report.updated, report.unchanged, report.skipped, report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glancing_registry::MockRegistry;
    use glancing_remote::mock::MemoryBackend;
    use glancing_schema::ChecksumSource;

    const MPID: &str = "PIDt94ySjKEHKKvWrYijsZtclxU";
    const MD5_OLD: &str = "ee1eca47dc88f4879d8a229cc70a07c6";
    const MD5_NEW: &str = "c9bc62eabccf1e4566cf216083fa3510";
    const SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn record(title: &str, version: &str, md5: &str) -> MetadataRecord {
        let mut rec = MetadataRecord {
            title: Some(title.to_owned()),
            version: Some(Version::new(version)),
            location: Some("http://appliances.example.org/img".to_owned()),
            ..MetadataRecord::default()
        };
        rec.checksums
            .add_digest(md5, ChecksumSource::Metadata)
            .unwrap();
        rec
    }

    fn decide(images: Vec<RegisteredImage>, new: &MetadataRecord) -> Decision {
        let registry = MockRegistry::new();
        let remote = MemoryBackend::new();
        let engine = ReconciliationEngine::new(
            ImportPipeline::new(&registry, &remote),
            RegistryIndex::from_images(images),
        );
        engine.decide(&MarketplaceId::new(MPID), new)
    }

    fn tagged(name: &str, version: &str, md5: &str) -> RegisteredImage {
        RegisteredImage::new("id-1", name)
            .with_checksum(md5)
            .with_version(version)
            .with_mpid(MPID)
    }

    #[test]
    fn nothing_registered_is_new() {
        assert_eq!(decide(vec![], &record("cirros", "1", MD5_NEW)), Decision::New);
    }

    #[test]
    fn same_mpid_same_data_is_up_to_date() {
        let d = decide(
            vec![tagged("cirros", "1", MD5_OLD)],
            &record("cirros", "1", MD5_OLD),
        );
        assert!(matches!(d, Decision::UpToDate { .. }));
        assert!(!d.is_mutating());
    }

    #[test]
    fn same_mpid_new_title_updates_name_only() {
        let d = decide(
            vec![tagged("cirros", "1", MD5_OLD)],
            &record("cirros-0.4", "1", MD5_OLD),
        );
        match d {
            Decision::UpdateProperties { properties, .. } => {
                assert_eq!(properties.name.as_deref(), Some("cirros-0.4"));
                assert!(properties.version.is_none());
                assert!(properties.mpid.is_none());
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn equal_versions_compare_by_order() {
        let d = decide(
            vec![tagged("cirros", "1.01", MD5_OLD)],
            &record("cirros", "1.1", MD5_OLD),
        );
        assert!(matches!(d, Decision::UpToDate { .. }));
    }

    #[test]
    fn same_mpid_version_sequence() {
        let old = vec![tagged("cirros", "2", MD5_OLD)];
        assert!(matches!(
            decide(old.clone(), &record("cirros", "3", MD5_NEW)),
            Decision::Upgrade { .. }
        ));
        assert!(matches!(
            decide(old.clone(), &record("cirros", "1", MD5_NEW)),
            Decision::Regression { .. }
        ));
        assert!(matches!(
            decide(old, &record("cirros", "2", MD5_NEW)),
            Decision::VersionReuse { .. }
        ));
    }

    #[test]
    fn same_data_with_lower_version_only_relabels() {
        let d = decide(
            vec![tagged("cirros", "2", MD5_OLD)],
            &record("cirros-renamed", "1", MD5_OLD),
        );
        match d {
            Decision::UpdateProperties { properties, .. } => {
                assert_eq!(properties.name.as_deref(), Some("cirros-renamed"));
                assert_eq!(properties.version, Some(Version::new("1")));
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn missing_md5_is_not_data_corruption() {
        let old = vec![tagged("cirros", "2", MD5_OLD)];
        let mut rec = record("cirros", "2", MD5_OLD);
        rec.checksums.clear();
        rec.checksums
            .add_digest(SHA256, ChecksumSource::Metadata)
            .unwrap();
        let d = decide(old.clone(), &rec);
        assert!(matches!(d, Decision::Unverifiable { .. }));
        assert!(!d.is_mutating());

        rec.version = Some(Version::new("3"));
        assert!(matches!(decide(old.clone(), &rec), Decision::Upgrade { .. }));
        rec.version = Some(Version::new("1"));
        assert!(matches!(decide(old, &rec), Decision::Regression { .. }));
    }

    #[test]
    fn untagged_old_version_is_lowest() {
        let old = RegisteredImage::new("id-1", "cirros")
            .with_checksum(MD5_OLD)
            .with_mpid(MPID);
        assert!(matches!(
            decide(vec![old], &record("cirros", "1", MD5_NEW)),
            Decision::Upgrade { .. }
        ));
    }

    #[test]
    fn checksum_match_with_other_labels_is_ambiguous() {
        let old = RegisteredImage::new("id-9", "something-else")
            .with_checksum(MD5_NEW)
            .with_version("1");
        assert!(matches!(
            decide(vec![old], &record("cirros", "1", MD5_NEW)),
            Decision::AmbiguousDuplicate { .. }
        ));
    }

    #[test]
    fn checksum_match_with_same_labels_is_registered() {
        let old = RegisteredImage::new("id-9", "cirros")
            .with_checksum(MD5_NEW)
            .with_version("1");
        assert!(matches!(
            decide(vec![old], &record("cirros", "1", MD5_NEW)),
            Decision::AlreadyRegistered { .. }
        ));
    }

    #[test]
    fn name_match_decisions() {
        let old = RegisteredImage::new("id-9", "cirros")
            .with_checksum(MD5_OLD)
            .with_version("5");
        assert!(matches!(
            decide(vec![old.clone()], &record("cirros", "4", MD5_NEW)),
            Decision::Reject { .. }
        ));
        assert!(matches!(
            decide(vec![old.clone()], &record("cirros", "5", MD5_NEW)),
            Decision::Replace { .. }
        ));
        assert!(matches!(
            decide(vec![old], &record("cirros", "6", MD5_NEW)),
            Decision::Replace { .. }
        ));
    }

    #[test]
    fn name_match_without_checksum_is_replaced() {
        let old = RegisteredImage::new("id-9", "cirros");
        assert!(matches!(
            decide(vec![old], &record("cirros", "1", MD5_NEW)),
            Decision::Replace { .. }
        ));
    }

    #[test]
    fn report_tallies() {
        let mut report = SyncReport::default();
        let id = MarketplaceId::new(MPID);
        report.record(id.clone(), EntryOutcome::Uploaded { id: ImageId::new("1") });
        report.record(id.clone(), EntryOutcome::Unchanged);
        report.record(
            id.clone(),
            EntryOutcome::Skipped {
                reason: "x".to_owned(),
            },
        );
        assert!(report.is_success());
        report.record(
            id,
            EntryOutcome::Failed {
                reason: "y".to_owned(),
            },
        );
        assert_eq!(report.total(), 4);
        assert_eq!(
            (report.uploaded, report.unchanged, report.skipped, report.failed),
            (1, 1, 1, 1)
        );
        assert!(!report.is_success());
    }

    #[test]
    fn report_serializes_flat_entries() {
        let mut report = SyncReport::default();
        report.record(
            MarketplaceId::new(MPID),
            EntryOutcome::Uploaded { id: ImageId::new("1") },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["uploaded"], 1);
        assert_eq!(json["entries"][0]["mpid"], MPID);
        assert_eq!(json["entries"][0]["status"], "uploaded");
        assert_eq!(json["entries"][0]["id"], "1");
    }
}
