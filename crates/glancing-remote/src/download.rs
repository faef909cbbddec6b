use crate::{RemoteBackend, RemoteError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Last path segment of a URL, ignoring query and fragment.
pub fn basename_of_url(url: &str) -> Option<&str> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let (_, path) = path.split_once('/')?;
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Stream `url` into a new file under `dir`.
///
/// The file name ends with the URL basename so that its extension survives,
/// which is what compression sniffing relies on. Nothing is left behind when
/// the download fails.
pub fn download_to_temp(
    backend: &dyn RemoteBackend,
    url: &str,
    dir: &Path,
) -> Result<PathBuf, RemoteError> {
    let suffix = basename_of_url(url).map_or_else(String::new, |b| format!("-{b}"));
    let mut tmp = tempfile::Builder::new()
        .prefix("glancing-")
        .suffix(&suffix)
        .tempfile_in(dir)?;
    let bytes = backend.copy_to(url, tmp.as_file_mut())?;
    let (_, path) = tmp.keep().map_err(|e| RemoteError::Io(e.error))?;
    debug!("{}: downloaded {bytes} bytes from {url}", path.display());
    Ok(path)
}
