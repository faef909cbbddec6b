use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Message digest algorithms understood by the checksum engine.
///
/// Every algorithm has a distinct hex digest length, which is what lets a
/// bare digest on the command line identify its own algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha224,
        Algorithm::Sha256,
        Algorithm::Sha384,
        Algorithm::Sha512,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha224 => "sha224",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length of the lowercase hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            Algorithm::Md5 => 32,
            Algorithm::Sha1 => 40,
            Algorithm::Sha224 => 56,
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    /// Parse an algorithm name. Marketplace spellings such as `SHA-1` are
    /// accepted: dashes are dropped and case is ignored.
    pub fn from_name(name: &str) -> Result<Self, SchemaError> {
        let normalized = name.trim().replace('-', "").to_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.name() == normalized)
            .ok_or_else(|| SchemaError::UnknownAlgorithmName(name.to_owned()))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reverse lookup from hex digest length to algorithm.
pub fn length_to_algorithm(hex_len: usize) -> Result<Algorithm, SchemaError> {
    Algorithm::ALL
        .into_iter()
        .find(|a| a.hex_len() == hex_len)
        .ok_or(SchemaError::UnknownAlgorithm(hex_len))
}

/// Where a digest came from, in increasing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumSource {
    Metadata,
    SumsFile,
    Cli,
}

impl ChecksumSource {
    /// Whether a digest from this source replaces a conflicting one.
    pub fn may_override(self) -> bool {
        !matches!(self, ChecksumSource::Metadata)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    hex: String,
    source: ChecksumSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
    Overridden,
}

/// Digests an image is expected to match, one per algorithm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    entries: BTreeMap<Algorithm, Entry>,
}

impl Checksums {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a digest whose algorithm is inferred from its length.
    pub fn add_digest(
        &mut self,
        digest: &str,
        source: ChecksumSource,
    ) -> Result<AddOutcome, SchemaError> {
        let algorithm = length_to_algorithm(digest.len())?;
        self.insert(algorithm, digest, source)
    }

    /// Add a digest for a known algorithm.
    pub fn insert(
        &mut self,
        algorithm: Algorithm,
        digest: &str,
        source: ChecksumSource,
    ) -> Result<AddOutcome, SchemaError> {
        if digest.len() != algorithm.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SchemaError::InvalidDigest(digest.to_owned()));
        }
        let hex = digest.to_ascii_lowercase();

        match self.entries.get_mut(&algorithm) {
            Some(existing) if existing.hex == hex => {
                debug!("duplicate {algorithm} digest, computing only once: {hex}");
                existing.source = existing.source.max(source);
                Ok(AddOutcome::Duplicate)
            }
            Some(existing) if source.may_override() => {
                debug!("{algorithm} digest {} overridden by {hex}", existing.hex);
                *existing = Entry { hex, source };
                Ok(AddOutcome::Overridden)
            }
            Some(existing) => Err(SchemaError::ChecksumConflict {
                algorithm,
                existing: existing.hex.clone(),
                incoming: hex,
            }),
            None => {
                self.entries.insert(algorithm, Entry { hex, source });
                Ok(AddOutcome::Added)
            }
        }
    }

    /// Replace a digest with a locally computed value, regardless of source.
    pub fn replace_computed(&mut self, algorithm: Algorithm, hex: &str) {
        let source = self
            .entries
            .get(&algorithm)
            .map_or(ChecksumSource::Cli, |e| e.source);
        self.entries.insert(
            algorithm,
            Entry {
                hex: hex.to_ascii_lowercase(),
                source,
            },
        );
    }

    pub fn get(&self, algorithm: Algorithm) -> Option<&str> {
        self.entries.get(&algorithm).map(|e| e.hex.as_str())
    }

    pub fn source(&self, algorithm: Algorithm) -> Option<ChecksumSource> {
        self.entries.get(&algorithm).map(|e| e.source)
    }

    /// The registry-native digest, used to match registered images.
    pub fn canonical(&self) -> Option<&str> {
        self.get(Algorithm::Md5)
    }

    pub fn algorithms(&self) -> impl Iterator<Item = Algorithm> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Algorithm, &str)> {
        self.entries.iter().map(|(a, e)| (*a, e.hex.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5: &str = "3d1b4804dcf2a613f0ed4a91b9ed2b98";
    const SHA1: &str = "1b5229d5dad92bc7952553be01608af2180eafbe";

    #[test]
    fn lengths_are_unique() {
        for a in Algorithm::ALL {
            assert_eq!(length_to_algorithm(a.hex_len()).unwrap(), a);
        }
    }

    #[test]
    fn unknown_length_fails() {
        assert!(matches!(
            length_to_algorithm(33),
            Err(SchemaError::UnknownAlgorithm(33))
        ));
    }

    #[test]
    fn marketplace_names_parse() {
        assert_eq!(Algorithm::from_name("SHA-1").unwrap(), Algorithm::Sha1);
        assert_eq!(Algorithm::from_name("SHA-512").unwrap(), Algorithm::Sha512);
        assert_eq!(Algorithm::from_name("MD5").unwrap(), Algorithm::Md5);
        assert!(Algorithm::from_name("crc32").is_err());
    }

    #[test]
    fn add_infers_algorithm() {
        let mut sums = Checksums::new();
        sums.add_digest(MD5, ChecksumSource::Cli).unwrap();
        sums.add_digest(SHA1, ChecksumSource::Cli).unwrap();
        assert_eq!(sums.get(Algorithm::Md5), Some(MD5));
        assert_eq!(sums.get(Algorithm::Sha1), Some(SHA1));
        assert_eq!(sums.len(), 2);
    }

    #[test]
    fn digests_are_lowercased() {
        let mut sums = Checksums::new();
        sums.add_digest(&MD5.to_uppercase(), ChecksumSource::Cli)
            .unwrap();
        assert_eq!(sums.canonical(), Some(MD5));
    }

    #[test]
    fn duplicate_is_noop() {
        let mut sums = Checksums::new();
        sums.add_digest(MD5, ChecksumSource::Metadata).unwrap();
        let outcome = sums.add_digest(MD5, ChecksumSource::Metadata).unwrap();
        assert_eq!(outcome, AddOutcome::Duplicate);
        assert_eq!(sums.len(), 1);
    }

    #[test]
    fn metadata_cannot_override_itself() {
        let mut sums = Checksums::new();
        sums.add_digest(MD5, ChecksumSource::Metadata).unwrap();
        let other = "0".repeat(32);
        assert!(matches!(
            sums.add_digest(&other, ChecksumSource::Metadata),
            Err(SchemaError::ChecksumConflict { .. })
        ));
        assert_eq!(sums.get(Algorithm::Md5), Some(MD5));
    }

    #[test]
    fn cli_and_sums_file_override() {
        let mut sums = Checksums::new();
        sums.add_digest(MD5, ChecksumSource::Metadata).unwrap();
        let other = "0".repeat(32);
        let outcome = sums.add_digest(&other, ChecksumSource::SumsFile).unwrap();
        assert_eq!(outcome, AddOutcome::Overridden);
        assert_eq!(sums.source(Algorithm::Md5), Some(ChecksumSource::SumsFile));

        let outcome = sums.add_digest(MD5, ChecksumSource::Cli).unwrap();
        assert_eq!(outcome, AddOutcome::Overridden);
        assert_eq!(sums.get(Algorithm::Md5), Some(MD5));
    }

    #[test]
    fn non_hex_rejected() {
        let mut sums = Checksums::new();
        let bad = "z".repeat(32);
        assert!(matches!(
            sums.add_digest(&bad, ChecksumSource::Cli),
            Err(SchemaError::InvalidDigest(_))
        ));
    }

    #[test]
    fn wrong_length_for_named_algorithm_rejected() {
        let mut sums = Checksums::new();
        assert!(sums
            .insert(Algorithm::Sha1, MD5, ChecksumSource::Metadata)
            .is_err());
    }

    #[test]
    fn replace_computed_keeps_source() {
        let mut sums = Checksums::new();
        sums.add_digest(MD5, ChecksumSource::Metadata).unwrap();
        sums.replace_computed(Algorithm::Md5, &"A".repeat(32));
        assert_eq!(sums.get(Algorithm::Md5), Some("a".repeat(32).as_str()));
        assert_eq!(sums.source(Algorithm::Md5), Some(ChecksumSource::Metadata));
    }
}
