use crate::VerifyError;
use glancing_schema::{Algorithm, Checksums};
use sha2::digest::DynDigest;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;

fn hasher_for(algorithm: Algorithm) -> Box<dyn DynDigest> {
    match algorithm {
        Algorithm::Md5 => Box::new(md5::Md5::default()),
        Algorithm::Sha1 => Box::new(sha1::Sha1::default()),
        Algorithm::Sha224 => Box::new(sha2::Sha224::default()),
        Algorithm::Sha256 => Box::new(sha2::Sha256::default()),
        Algorithm::Sha384 => Box::new(sha2::Sha384::default()),
        Algorithm::Sha512 => Box::new(sha2::Sha512::default()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub algorithm: Algorithm,
    pub expected: String,
    pub computed: String,
}

/// Result of checking a file against its declared digests.
#[derive(Debug, Clone, Default)]
pub struct Verification {
    pub declared: usize,
    pub verified: usize,
    pub mismatches: Vec<Mismatch>,
    pub computed: BTreeMap<Algorithm, String>,
}

impl Verification {
    /// Every declared digest matched. Vacuously true with nothing declared.
    pub fn is_complete(&self) -> bool {
        self.verified == self.declared
    }
}

/// Computes several digests of one input in a single read pass.
#[derive(Debug, Clone, Copy)]
pub struct ChecksumEngine {
    block_size: usize,
}

impl Default for ChecksumEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl ChecksumEngine {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn compute(
        &self,
        path: &Path,
        algorithms: &BTreeSet<Algorithm>,
    ) -> Result<BTreeMap<Algorithm, String>, VerifyError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VerifyError::NotFound(path.to_path_buf()),
            _ => VerifyError::Io(e),
        })?;
        let digests = self.compute_reader(file, algorithms)?;
        debug!(
            "computed {} digest(s) of {}",
            digests.len(),
            path.display()
        );
        Ok(digests)
    }

    pub fn compute_reader<R: Read>(
        &self,
        mut reader: R,
        algorithms: &BTreeSet<Algorithm>,
    ) -> Result<BTreeMap<Algorithm, String>, VerifyError> {
        let mut hashers: Vec<(Algorithm, Box<dyn DynDigest>)> =
            algorithms.iter().map(|a| (*a, hasher_for(*a))).collect();
        if hashers.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut buf = vec![0u8; self.block_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            for (_, hasher) in &mut hashers {
                hasher.update(&buf[..n]);
            }
        }

        Ok(hashers
            .into_iter()
            .map(|(a, h)| (a, hex::encode(h.finalize())))
            .collect())
    }

    pub fn hash_bytes(
        &self,
        data: &[u8],
        algorithms: &BTreeSet<Algorithm>,
    ) -> BTreeMap<Algorithm, String> {
        algorithms
            .iter()
            .map(|a| {
                let mut hasher = hasher_for(*a);
                hasher.update(data);
                (*a, hex::encode(hasher.finalize()))
            })
            .collect()
    }

    /// Compute every declared algorithm and compare case-insensitively.
    pub fn verify(&self, path: &Path, expected: &Checksums) -> Result<Verification, VerifyError> {
        let algorithms: BTreeSet<Algorithm> = expected.algorithms().collect();
        let computed = self.compute(path, &algorithms)?;

        let mut report = Verification {
            declared: expected.len(),
            ..Verification::default()
        };
        for (algorithm, want) in expected.iter() {
            let got = computed.get(&algorithm).map_or("", String::as_str);
            if got.eq_ignore_ascii_case(want) {
                debug!("{algorithm} verified: {got}");
                report.verified += 1;
            } else {
                report.mismatches.push(Mismatch {
                    algorithm,
                    expected: want.to_owned(),
                    computed: got.to_owned(),
                });
            }
        }
        report.computed = computed;
        Ok(report)
    }
}
