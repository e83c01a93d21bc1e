//! Catalog model, version and file types.
//!
//! These are the decoded, fixed-shape records the rest of the engine works
//! with. Raw catalog responses are converted into them in
//! [`crate::catalog`]; nothing downstream sees untyped JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Digest algorithms the catalog publishes and the verifier can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Blake3,
    /// First 10 hex characters of the SHA256 digest.
    AutoV2,
}

impl HashAlgorithm {
    /// Catalog tags in order of preference.
    pub const PREFERENCE: [HashAlgorithm; 3] =
        [HashAlgorithm::Sha256, HashAlgorithm::Blake3, HashAlgorithm::AutoV2];

    /// Look up an algorithm by its catalog tag (case-insensitive).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "sha256" => Some(HashAlgorithm::Sha256),
            "blake3" => Some(HashAlgorithm::Blake3),
            "autov2" => Some(HashAlgorithm::AutoV2),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Blake3 => "BLAKE3",
            HashAlgorithm::AutoV2 => "AutoV2",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A digest published by the catalog for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredHash {
    pub algorithm: HashAlgorithm,
    /// Hex digest, normalized to lowercase.
    pub digest: String,
}

impl DeclaredHash {
    pub fn new(algorithm: HashAlgorithm, digest: impl AsRef<str>) -> Self {
        Self {
            algorithm,
            digest: digest.as_ref().trim().to_ascii_lowercase(),
        }
    }

    /// Case-insensitive comparison against a locally computed digest.
    pub fn matches(&self, local: &str) -> bool {
        self.digest.eq_ignore_ascii_case(local.trim())
    }

    /// Pick the preferred supported digest from `(tag, digest)` pairs.
    pub fn select<'a>(hashes: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<Self> {
        let known: Vec<(HashAlgorithm, &str)> = hashes
            .into_iter()
            .filter(|(_, digest)| !digest.trim().is_empty())
            .filter_map(|(tag, digest)| HashAlgorithm::from_tag(tag).map(|a| (a, digest)))
            .collect();

        HashAlgorithm::PREFERENCE.iter().find_map(|preferred| {
            known
                .iter()
                .find(|(algorithm, _)| algorithm == preferred)
                .map(|(algorithm, digest)| DeclaredHash::new(*algorithm, digest))
        })
    }
}

impl std::fmt::Display for DeclaredHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

/// One catalog model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: u64,
    pub name: String,
    /// Type label as published by the catalog (e.g. "LORA", "Checkpoint").
    pub declared_type: Option<String>,
}

/// One downloadable file of a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    pub id: u64,
    pub file_name: String,
    /// Absent for generation-only files.
    pub download_url: Option<String>,
    pub declared_hash: Option<DeclaredHash>,
    pub size_bytes: Option<u64>,
    /// Marked by the catalog as the version's main file.
    pub primary: bool,
    /// Catalog file kind, e.g. "Model", "Pruned Model", "Config".
    pub kind: Option<String>,
}

impl ModelFile {
    pub fn is_downloadable(&self) -> bool {
        self.download_url
            .as_deref()
            .map(|u| !u.trim().is_empty())
            .unwrap_or(false)
    }
}

/// One version of a model, with its files in catalog order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: u64,
    pub label: String,
    pub model_id: u64,
    pub files: Vec<ModelFile>,
    pub created_at: Option<DateTime<Utc>>,
    pub base_model: Option<String>,
    pub download_count: Option<u64>,
}

impl ModelVersion {
    pub fn total_size_bytes(&self) -> Option<u64> {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// Order versions newest-first.
///
/// Versions without a creation date keep their relative catalog order and
/// sort after dated ones.
pub fn sort_newest_first(versions: &mut [ModelVersion]) {
    versions.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(id: u64, created: Option<&str>) -> ModelVersion {
        ModelVersion {
            id,
            label: format!("v{}", id),
            model_id: 1,
            files: vec![],
            created_at: created.map(|c| c.parse().unwrap()),
            base_model: None,
            download_count: None,
        }
    }

    #[test]
    fn test_hash_algorithm_tags() {
        assert_eq!(HashAlgorithm::from_tag("SHA256"), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::from_tag("blake3"), Some(HashAlgorithm::Blake3));
        assert_eq!(HashAlgorithm::from_tag("AutoV2"), Some(HashAlgorithm::AutoV2));
        assert_eq!(HashAlgorithm::from_tag("CRC32"), None);
    }

    #[test]
    fn test_declared_hash_prefers_sha256() {
        let hashes = [
            ("AutoV2", "ABCDEF0123"),
            ("CRC32", "DEADBEEF"),
            ("SHA256", "ABC123"),
            ("BLAKE3", "FFF"),
        ];
        let declared = DeclaredHash::select(hashes.iter().map(|(t, d)| (*t, *d))).unwrap();
        assert_eq!(declared.algorithm, HashAlgorithm::Sha256);
        assert_eq!(declared.digest, "abc123");
    }

    #[test]
    fn test_declared_hash_falls_back_and_skips_unknown() {
        let hashes = [("CRC32", "DEADBEEF"), ("AutoV2", "ABCDEF0123")];
        let declared = DeclaredHash::select(hashes.iter().map(|(t, d)| (*t, *d))).unwrap();
        assert_eq!(declared.algorithm, HashAlgorithm::AutoV2);

        let hashes = [("CRC32", "DEADBEEF")];
        assert!(DeclaredHash::select(hashes.iter().map(|(t, d)| (*t, *d))).is_none());
    }

    #[test]
    fn test_declared_hash_matches_case_insensitively() {
        let declared = DeclaredHash::new(HashAlgorithm::Sha256, "ABC123");
        assert!(declared.matches("abc123"));
        assert!(declared.matches("ABC123"));
        assert!(!declared.matches("abc124"));
    }

    #[test]
    fn test_sort_newest_first() {
        let mut versions = vec![
            version(1, Some("2023-01-01T00:00:00Z")),
            version(2, None),
            version(3, Some("2024-06-01T00:00:00Z")),
            version(4, Some("2023-09-01T00:00:00Z")),
        ];
        sort_newest_first(&mut versions);
        let ids: Vec<u64> = versions.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![3, 4, 1, 2]);
    }

    #[test]
    fn test_file_downloadable() {
        let mut file = ModelFile {
            id: 1,
            file_name: "a.safetensors".into(),
            download_url: Some("https://civitai.com/api/download/models/1".into()),
            declared_hash: None,
            size_bytes: Some(10),
            primary: true,
            kind: None,
        };
        assert!(file.is_downloadable());
        file.download_url = None;
        assert!(!file.is_downloadable());
    }
}
