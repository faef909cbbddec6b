//! Verified import of one image into the registry.
//!
//! The pipeline acquires the image, decompresses it, settles its registry
//! name and the digests it must match, checks its size and digests, backs up
//! any image already registered under the same name, and uploads it. Every
//! failure ends the run with a `RejectReason`; nothing here aborts a caller's
//! wider run. Temporary files are removed on every path unless asked to keep
//! them.

use glancing_registry::{ImportRequest, RegistryClient, Selector};
use glancing_remote::{basename_of_url, download_to_temp, RemoteBackend};
use glancing_schema::{Algorithm, ChecksumSource, Checksums, Compression, ImageId, MetadataRecord};
use glancing_verify::{ChecksumEngine, Decompressor, Mismatch};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::settings::DEFAULT_BACKUP_DIR;

/// Where an image comes from.
#[derive(Debug, Clone)]
pub enum ImportSource {
    /// Image file on local disk. Never deleted by the pipeline.
    Local(PathBuf),
    /// Image blob at an HTTP(S) URL.
    Url(String),
    /// Marketplace descriptor; the blob is fetched from its `location`.
    Metadata(MetadataRecord),
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Import even when size or digests do not match.
    pub force: bool,
    /// Stop after verification.
    pub dry_run: bool,
    /// Skip digest verification.
    pub no_checksum: bool,
    pub keep_temps: bool,
    /// Registry name, overriding the derived one.
    pub name: Option<String>,
    /// Digests given on the command line; they override every other source.
    pub digests: Vec<String>,
    /// Checksum files (local paths or URLs), lines of `<hex> [*]<filename>`.
    pub sums_files: Vec<String>,
}

impl ImportOptions {
    /// Add the digests of a colon-separated list. Empty items are ignored.
    #[must_use]
    pub fn with_digest_list(mut self, list: &str) -> Self {
        self.digests.extend(
            list.split(':')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_owned),
        );
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Acquire(String),
    Decompress(String),
    NoName,
    SumsFile(String),
    Checksums(String),
    SizeMismatch { declared: u64, actual: u64 },
    ChecksumMismatch(Vec<Mismatch>),
    Verify(String),
    Backup(String),
    Registry(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Acquire(msg) => write!(f, "cannot acquire image: {msg}"),
            RejectReason::Decompress(msg) => write!(f, "cannot decompress image: {msg}"),
            RejectReason::NoName => f.write_str("cannot derive an image name, use --name"),
            RejectReason::SumsFile(msg) => write!(f, "cannot read checksum file: {msg}"),
            RejectReason::Checksums(msg) => write!(f, "unusable checksum: {msg}"),
            RejectReason::SizeMismatch { declared, actual } => {
                write!(f, "size mismatch: expected {declared} bytes, got {actual}")
            }
            RejectReason::ChecksumMismatch(mismatches) if mismatches.is_empty() => {
                f.write_str("checksum verification failed")
            }
            RejectReason::ChecksumMismatch(mismatches) => {
                let algos: Vec<&str> = mismatches.iter().map(|m| m.algorithm.name()).collect();
                write!(f, "checksum mismatch: {}", algos.join(", "))
            }
            RejectReason::Verify(msg) => write!(f, "cannot verify image: {msg}"),
            RejectReason::Backup(msg) => write!(f, "backup failed: {msg}"),
            RejectReason::Registry(msg) => write!(f, "registry error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported { id: ImageId, name: String },
    Rejected(RejectReason),
    DryRunOk { name: String },
    DryRunFail(RejectReason),
}

impl ImportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ImportOutcome::Imported { .. } | ImportOutcome::DryRunOk { .. }
        )
    }
}

/// Files removed when the import run ends, unless kept.
struct TempFiles {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl TempFiles {
    fn new(keep: bool) -> Self {
        Self {
            paths: Vec::new(),
            keep,
        }
    }

    fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            if self.keep {
                if path.exists() {
                    info!("keeping temporary file {}", path.display());
                }
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => debug!("removed temporary file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("cannot remove temporary file {}: {e}", path.display()),
            }
        }
    }
}

struct Acquired {
    file: PathBuf,
    record: MetadataRecord,
    /// File name as published (local basename or URL basename).
    published: Option<String>,
    downloaded: bool,
    /// Compression is guessed from the file extension rather than declared.
    sniff: bool,
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// `disk.img.gz` gives `disk.img`.
fn strip_one_extension(base: &str) -> String {
    Path::new(base)
        .file_stem()
        .map_or_else(|| base.to_owned(), |s| s.to_string_lossy().into_owned())
}

/// Digests listed for any of `names` in a checksum file. Lines are
/// `<hex> <filename>` as written by `md5sum` and `sha*sum`, with an optional
/// `*` marking binary mode.
pub fn parse_sums_file<S: AsRef<str>>(text: &str, names: &[S]) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let (digest, rest) = line.trim_end().split_once(char::is_whitespace)?;
            if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_alphanumeric()) {
                return None;
            }
            let file = rest.trim_start();
            let file = file.strip_prefix('*').unwrap_or(file);
            names
                .iter()
                .any(|n| n.as_ref() == file)
                .then(|| digest.to_owned())
        })
        .collect()
}

/// Drives one image from its source to the registry.
pub struct ImportPipeline<'a> {
    registry: &'a dyn RegistryClient,
    remote: &'a dyn RemoteBackend,
    engine: ChecksumEngine,
    backup_dir: PathBuf,
    work_dir: PathBuf,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(registry: &'a dyn RegistryClient, remote: &'a dyn RemoteBackend) -> Self {
        Self {
            registry,
            remote,
            engine: ChecksumEngine::default(),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            work_dir: std::env::temp_dir(),
        }
    }

    #[must_use]
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    /// Directory receiving downloads.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: ChecksumEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn registry(&self) -> &'a dyn RegistryClient {
        self.registry
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn run(&self, source: ImportSource, options: &ImportOptions) -> ImportOutcome {
        let mut temps = TempFiles::new(options.keep_temps);
        match self.run_steps(source, options, &mut temps) {
            Ok(outcome) => outcome,
            Err(reason) if options.dry_run => {
                warn!("dry run: {reason}");
                ImportOutcome::DryRunFail(reason)
            }
            Err(reason) => {
                warn!("import rejected: {reason}");
                ImportOutcome::Rejected(reason)
            }
        }
    }

    fn run_steps(
        &self,
        source: ImportSource,
        options: &ImportOptions,
        temps: &mut TempFiles,
    ) -> Result<ImportOutcome, RejectReason> {
        let acquired = self.acquire(source, temps)?;
        let file = self.decompress(&acquired, options, temps)?;

        let name = options
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                acquired
                    .published
                    .as_deref()
                    .filter(|_| acquired.sniff)
                    .map(strip_one_extension)
            })
            .or_else(|| acquired.record.image_name())
            .ok_or(RejectReason::NoName)?;
        info!("{}: image name: {name}", file.display());

        let mut record = acquired.record;
        let mut names: Vec<String> = acquired.published.into_iter().collect();
        if let Some(local) = file_name_of(&file).filter(|n| !names.contains(n)) {
            names.push(local);
        }
        let mut checksums = std::mem::take(&mut record.checksums);
        self.collect_checksums(&mut checksums, &names, options)?;

        let actual = fs::metadata(&file)
            .map_err(|e| RejectReason::Acquire(format!("{}: {e}", file.display())))?
            .len();
        let size_ok = match record.bytes {
            Some(declared) if declared != actual => {
                warn!(
                    "{}: size: expected {declared}, actual {actual}",
                    file.display()
                );
                if !options.force {
                    return Err(RejectReason::SizeMismatch { declared, actual });
                }
                false
            }
            Some(_) => {
                debug!("{}: size ok: {actual} bytes", file.display());
                true
            }
            None => true,
        };

        let mut verified = checksums.len();
        let mut mismatches = Vec::new();
        if !options.no_checksum {
            if size_ok {
                verified = 0;
                if checksums.is_empty() {
                    info!("{}: no checksum to verify", file.display());
                } else {
                    let report = self
                        .engine
                        .verify(&file, &checksums)
                        .map_err(|e| RejectReason::Verify(e.to_string()))?;
                    verified = report.verified;
                    for m in &report.mismatches {
                        warn!(
                            "{}: {}: expected {}, computed {}",
                            file.display(),
                            m.algorithm,
                            m.expected,
                            m.computed
                        );
                        if options.force {
                            checksums.replace_computed(m.algorithm, &m.computed);
                        }
                    }
                    mismatches = report.mismatches;
                }
            } else {
                warn!(
                    "{}: size differs, forcing the use of a recomputed md5",
                    file.display()
                );
                let computed = self
                    .engine
                    .compute(&file, &BTreeSet::from([Algorithm::Md5]))
                    .map_err(|e| RejectReason::Verify(e.to_string()))?;
                checksums.clear();
                if let Some(md5) = computed.get(&Algorithm::Md5) {
                    checksums.replace_computed(Algorithm::Md5, md5);
                }
                verified = 0;
            }
        }

        let accepted = (size_ok && verified == checksums.len()) || options.force;
        if !accepted {
            return Err(RejectReason::ChecksumMismatch(mismatches));
        }
        if options.dry_run {
            info!("{}: dry run, {name} would be imported", file.display());
            return Ok(ImportOutcome::DryRunOk { name });
        }

        self.backup_existing(&name)?;

        let request = ImportRequest {
            file: file.clone(),
            checksum: checksums.canonical().map(str::to_owned),
            name: Some(name.clone()),
            disk_format: record.disk_format.clone(),
        };
        let id = self
            .registry
            .import_image(&request)
            .map_err(|e| RejectReason::Registry(e.to_string()))?;
        info!("{}: imported as {name} ({id})", file.display());
        Ok(ImportOutcome::Imported { id, name })
    }

    fn acquire(
        &self,
        source: ImportSource,
        temps: &mut TempFiles,
    ) -> Result<Acquired, RejectReason> {
        match source {
            ImportSource::Local(path) => {
                if !path.is_file() {
                    return Err(RejectReason::Acquire(format!(
                        "{} is not a file",
                        path.display()
                    )));
                }
                Ok(Acquired {
                    published: file_name_of(&path),
                    file: path,
                    record: MetadataRecord::raw(None),
                    downloaded: false,
                    sniff: true,
                })
            }
            ImportSource::Url(url) => {
                let file = self.download(&url, temps)?;
                Ok(Acquired {
                    file,
                    published: basename_of_url(&url).map(str::to_owned),
                    record: MetadataRecord::raw(Some(url)),
                    downloaded: true,
                    sniff: true,
                })
            }
            ImportSource::Metadata(record) => {
                let location = record.location.clone().ok_or_else(|| {
                    RejectReason::Acquire("descriptor has no image location".to_owned())
                })?;
                if is_url(&location) {
                    let file = self.download(&location, temps)?;
                    Ok(Acquired {
                        file,
                        published: basename_of_url(&location).map(str::to_owned),
                        record,
                        downloaded: true,
                        sniff: false,
                    })
                } else {
                    let path = PathBuf::from(&location);
                    if !path.is_file() {
                        return Err(RejectReason::Acquire(format!(
                            "image location {location} is not a file"
                        )));
                    }
                    Ok(Acquired {
                        published: file_name_of(&path),
                        file: path,
                        record,
                        downloaded: false,
                        sniff: false,
                    })
                }
            }
        }
    }

    fn download(&self, url: &str, temps: &mut TempFiles) -> Result<PathBuf, RejectReason> {
        info!("downloading {url}");
        let file = download_to_temp(self.remote, url, &self.work_dir)
            .map_err(|e| RejectReason::Acquire(format!("cannot download {url}: {e}")))?;
        temps.push(file.clone());
        Ok(file)
    }

    /// Decompress when the descriptor declares a compression, or when a
    /// bare image carries a compression extension.
    fn decompress(
        &self,
        acquired: &Acquired,
        options: &ImportOptions,
        temps: &mut TempFiles,
    ) -> Result<PathBuf, RejectReason> {
        let declared = acquired.record.compression;
        let sniffed = acquired.sniff
            && acquired
                .file
                .extension()
                .and_then(|e| e.to_str())
                .and_then(Compression::from_extension)
                .is_some();
        if !declared.is_compressed() && !sniffed {
            return Ok(acquired.file.clone());
        }

        let decompressor = Decompressor::new(acquired.file.clone(), Some(declared))
            .map_err(|e| RejectReason::Decompress(e.to_string()))?;
        temps.push(decompressor.output().to_path_buf());
        let delete = acquired.downloaded && !options.keep_temps;
        let output = decompressor
            .run(delete)
            .map_err(|e| RejectReason::Decompress(e.to_string()))?;
        debug!("{}: uncompressed file", output.display());
        Ok(output)
    }

    fn collect_checksums(
        &self,
        checksums: &mut Checksums,
        names: &[String],
        options: &ImportOptions,
    ) -> Result<(), RejectReason> {
        for location in &options.sums_files {
            let text = self.read_sums_file(location)?;
            let digests = parse_sums_file(&text, names);
            if digests.is_empty() {
                debug!("{location}: no checksum for {}", names.join(" or "));
            }
            for digest in digests {
                checksums
                    .add_digest(&digest, ChecksumSource::SumsFile)
                    .map_err(|e| RejectReason::Checksums(format!("{location}: {e}")))?;
            }
        }
        for digest in &options.digests {
            checksums
                .add_digest(digest, ChecksumSource::Cli)
                .map_err(|e| RejectReason::Checksums(e.to_string()))?;
        }
        Ok(())
    }

    fn read_sums_file(&self, location: &str) -> Result<String, RejectReason> {
        if is_url(location) {
            let body = self
                .remote
                .get(location)
                .map_err(|e| RejectReason::SumsFile(format!("{location}: {e}")))?;
            Ok(String::from_utf8_lossy(&body).into_owned())
        } else {
            fs::read_to_string(location)
                .map_err(|e| RejectReason::SumsFile(format!("{location}: {e}")))
        }
    }

    fn prepare_backup_dir(&self) -> bool {
        let dir = &self.backup_dir;
        if dir.is_dir() {
            return true;
        }
        if dir.exists() {
            warn!(
                "{} exists but is not a directory, cannot back up old images",
                dir.display()
            );
            return false;
        }
        match fs::create_dir_all(dir) {
            Ok(()) => true,
            Err(e) => {
                warn!("cannot create backup directory {}: {e}", dir.display());
                false
            }
        }
    }

    /// Save and remove every image already registered as `name`. A failed
    /// download rejects the import; an unusable backup directory leaves the
    /// old images in place.
    fn backup_existing(&self, name: &str) -> Result<(), RejectReason> {
        let ids = self
            .registry
            .ids(&Selector::name(name))
            .map_err(|e| RejectReason::Registry(e.to_string()))?;
        if ids.is_empty() {
            return Ok(());
        }
        if !self.prepare_backup_dir() {
            warn!("{name} is already registered and will not be backed up nor replaced");
            return Ok(());
        }

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let safe_name = name.replace('/', "_");
        let several = ids.len() > 1;
        for id in ids {
            let file_name = if several {
                format!("{safe_name}.{stamp}.{id}")
            } else {
                format!("{safe_name}.{stamp}")
            };
            let target = self.backup_dir.join(file_name);
            let selector = Selector::ById(id.clone());
            info!("backing up image {id} to {}", target.display());
            self.registry
                .download(&selector, &target)
                .map_err(|e| RejectReason::Backup(format!("image {id}: {e}")))?;
            if let Err(e) = self.registry.delete(&selector) {
                warn!("image {id} was backed up but not deleted: {e}");
            }
        }
        Ok(())
    }
}
