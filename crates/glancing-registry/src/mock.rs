//! In-memory registry that records every call, for tests.

use crate::{
    ImageProperties, ImportRequest, RegisteredImage, RegistryClient, RegistryError, Selector,
};
use glancing_schema::ImageId;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Registry operations, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Available,
    Ids,
    Show,
    Import,
    Delete,
    Rename,
    UpdateProperties,
    Download,
}

/// One recorded registry call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Available,
    Ids(Selector),
    Show(ImageId),
    Import(ImportRequest),
    Delete(Selector),
    Rename(Selector, String),
    UpdateProperties(Selector, ImageProperties),
    Download(Selector, PathBuf),
}

impl Call {
    /// Whether the call changes registry state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::Import(_) | Call::Delete(_) | Call::Rename(..) | Call::UpdateProperties(..)
        )
    }
}

#[derive(Default)]
struct MockState {
    images: BTreeMap<ImageId, RegisteredImage>,
    calls: Vec<Call>,
    failing: BTreeSet<Op>,
    next_id: u32,
}

#[derive(Default)]
pub struct MockRegistry {
    state: Mutex<MockState>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_images(images: impl IntoIterator<Item = RegisteredImage>) -> Self {
        let mock = Self::new();
        for image in images {
            mock.insert(image);
        }
        mock
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>, RegistryError> {
        self.state
            .lock()
            .map_err(|e| RegistryError::Unavailable(format!("mutex poisoned: {e}")))
    }

    /// Record `call`, then fail if `op` was set to fail.
    fn record(&self, op: Op, call: Call) -> Result<MutexGuard<'_, MockState>, RegistryError> {
        let mut state = self.state()?;
        state.calls.push(call);
        if state.failing.contains(&op) {
            return Err(RegistryError::CommandFailed {
                command: format!("mock {op:?}"),
                status: "exit status: 1".to_owned(),
                stderr: "injected failure".to_owned(),
            });
        }
        Ok(state)
    }

    pub fn insert(&self, image: RegisteredImage) {
        if let Ok(mut state) = self.state() {
            state.images.insert(image.id.clone(), image);
        }
    }

    /// Make every later call of `op` fail.
    pub fn fail_on(&self, op: Op) {
        if let Ok(mut state) = self.state() {
            state.failing.insert(op);
        }
    }

    pub fn recover(&self, op: Op) {
        if let Ok(mut state) = self.state() {
            state.failing.remove(&op);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state() {
            state.calls.clear();
        }
    }

    pub fn images(&self) -> Vec<RegisteredImage> {
        self.state()
            .map(|s| s.images.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn image(&self, id: &ImageId) -> Option<RegisteredImage> {
        self.state().ok()?.images.get(id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Vec<RegisteredImage> {
        self.images()
            .into_iter()
            .filter(|img| img.name == name)
            .collect()
    }
}

fn first_match(state: &MockState, selector: &Selector) -> Result<ImageId, RegistryError> {
    state
        .images
        .values()
        .find(|img| selector.matches(&img.id, &img.name))
        .map(|img| img.id.clone())
        .ok_or_else(|| RegistryError::NotFound(selector.to_string()))
}

impl RegistryClient for MockRegistry {
    fn available(&self) -> Result<(), RegistryError> {
        self.record(Op::Available, Call::Available).map(drop)
    }

    fn ids(&self, selector: &Selector) -> Result<BTreeSet<ImageId>, RegistryError> {
        let state = self.record(Op::Ids, Call::Ids(selector.clone()))?;
        Ok(state
            .images
            .values()
            .filter(|img| selector.matches(&img.id, &img.name))
            .map(|img| img.id.clone())
            .collect())
    }

    fn show(&self, id: &ImageId) -> Result<Option<RegisteredImage>, RegistryError> {
        let state = self.record(Op::Show, Call::Show(id.clone()))?;
        Ok(state.images.get(id).cloned())
    }

    fn import_image(&self, request: &ImportRequest) -> Result<ImageId, RegistryError> {
        let mut state = self.record(Op::Import, Call::Import(request.clone()))?;
        if !request.file.is_file() {
            return Err(RegistryError::NotFound(request.file.display().to_string()));
        }
        state.next_id += 1;
        let id = ImageId::new(format!("mock-{:04}", state.next_id));
        let mut image = RegisteredImage::new(id.clone(), request.name.clone().unwrap_or_default());
        image.checksum = request.checksum.as_deref().map(str::to_ascii_lowercase);
        state.images.insert(id.clone(), image);
        Ok(id)
    }

    fn delete(&self, selector: &Selector) -> Result<(), RegistryError> {
        let mut state = self.record(Op::Delete, Call::Delete(selector.clone()))?;
        let id = first_match(&state, selector)?;
        state.images.remove(&id);
        Ok(())
    }

    fn rename(&self, selector: &Selector, new_name: &str) -> Result<(), RegistryError> {
        let mut state = self.record(
            Op::Rename,
            Call::Rename(selector.clone(), new_name.to_owned()),
        )?;
        let id = first_match(&state, selector)?;
        if let Some(image) = state.images.get_mut(&id) {
            image.name = new_name.to_owned();
        }
        Ok(())
    }

    fn update_properties(
        &self,
        selector: &Selector,
        properties: &ImageProperties,
    ) -> Result<(), RegistryError> {
        let mut state = self.record(
            Op::UpdateProperties,
            Call::UpdateProperties(selector.clone(), properties.clone()),
        )?;
        let id = first_match(&state, selector)?;
        if let Some(image) = state.images.get_mut(&id) {
            if let Some(ref name) = properties.name {
                image.name.clone_from(name);
            }
            if let Some(ref version) = properties.version {
                image.version = Some(version.clone());
            }
            if let Some(ref mpid) = properties.mpid {
                image.mpid = Some(mpid.clone());
            }
        }
        Ok(())
    }

    fn download(&self, selector: &Selector, path: &Path) -> Result<(), RegistryError> {
        let state = self.record(
            Op::Download,
            Call::Download(selector.clone(), path.to_path_buf()),
        )?;
        let id = first_match(&state, selector)?;
        std::fs::write(path, format!("mock image data for {id}\n"))?;
        Ok(())
    }
}
