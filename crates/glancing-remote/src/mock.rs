//! In-memory `RemoteBackend` for tests.

use crate::{RemoteBackend, RemoteError};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryBackend {
    resources: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` at `url`, replacing any previous resource.
    pub fn insert(&self, url: &str, data: impl Into<Vec<u8>>) {
        if let Ok(mut map) = self.resources.lock() {
            map.insert(url.to_owned(), data.into());
        }
    }

    pub fn remove(&self, url: &str) {
        if let Ok(mut map) = self.resources.lock() {
            map.remove(url);
        }
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn lookup(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(url.to_owned());
        }
        let map = self
            .resources
            .lock()
            .map_err(|e| RemoteError::Http(format!("mock lock poisoned: {e}")))?;
        map.get(url)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(url.to_owned()))
    }
}

impl RemoteBackend for MemoryBackend {
    fn get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        self.lookup(url)
    }

    fn copy_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, RemoteError> {
        let data = self.lookup(url)?;
        sink.write_all(&data)?;
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_inserted_resources() {
        let backend = MemoryBackend::new();
        backend.insert("http://x/a", "hello");
        assert_eq!(backend.get("http://x/a").unwrap(), b"hello");

        let mut sink = Vec::new();
        assert_eq!(backend.copy_to("http://x/a", &mut sink).unwrap(), 5);
        assert_eq!(sink, b"hello");
        assert_eq!(backend.requests(), vec!["http://x/a", "http://x/a"]);
    }

    #[test]
    fn missing_resource_is_not_found() {
        let backend = MemoryBackend::new();
        backend.insert("http://x/a", "hello");
        backend.remove("http://x/a");
        assert!(matches!(
            backend.get("http://x/a"),
            Err(RemoteError::NotFound(_))
        ));
    }
}
