//! Local-vs-remote content verification.
//!
//! Answers "does the file already on disk equal the catalog's file?" and,
//! per version, "is this version installed?". Both are pure reads: no
//! network, no writes.

use super::hashing::compute_digest_async;
use crate::models::DeclaredHash;
use crate::{CivitdlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// State of a local file relative to its catalog counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LocalState {
    Absent,
    Matching,
    Mismatched { local_hash: String },
    /// Present, but the catalog declared no supported digest.
    Unverified { size: u64 },
}

impl LocalState {
    pub fn is_present(&self) -> bool {
        !matches!(self, LocalState::Absent)
    }

    /// Treat an unverifiable file as good when its size equals the declared size.
    pub fn accept_by_size(&self, declared_size: Option<u64>) -> bool {
        match self {
            LocalState::Matching => true,
            LocalState::Unverified { size } => Some(*size) == declared_size,
            _ => false,
        }
    }
}

/// A file that may already exist at a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCandidate {
    pub path: PathBuf,
    pub existing_size: Option<u64>,
}

impl LocalCandidate {
    /// Snapshot the filesystem state of `path`.
    pub async fn probe(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let existing_size = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            Ok(_) => {
                return Err(CivitdlError::Io {
                    message: "destination exists and is not a regular file".into(),
                    path: Some(path),
                    source: None,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(CivitdlError::io_with_path(e, &path)),
        };
        Ok(Self {
            path,
            existing_size,
        })
    }

    /// Classify against the declared digest, hashing only when a file exists.
    pub async fn verify(&self, declared: Option<&DeclaredHash>) -> Result<LocalState> {
        let Some(size) = self.existing_size else {
            return Ok(LocalState::Absent);
        };
        let Some(declared) = declared else {
            return Ok(LocalState::Unverified { size });
        };

        let local_hash = compute_digest_async(self.path.clone(), declared.algorithm).await?;
        debug!(
            "Local {} {} for {} (declared {})",
            declared.algorithm,
            local_hash,
            self.path.display(),
            declared.digest
        );
        if declared.matches(&local_hash) {
            Ok(LocalState::Matching)
        } else {
            Ok(LocalState::Mismatched { local_hash })
        }
    }
}

/// Classify `path` against a declared digest.
pub async fn verify_file(path: &Path, declared: Option<&DeclaredHash>) -> Result<LocalState> {
    LocalCandidate::probe(path).await?.verify(declared).await
}

/// Installed state of a whole version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Installed,
    Partial,
    Absent,
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionStatus::Installed => write!(f, "Installed"),
            VersionStatus::Partial => write!(f, "Partial"),
            VersionStatus::Absent => write!(f, "Absent"),
        }
    }
}

/// One file of a version as seen locally.
#[derive(Debug, Clone)]
pub struct FileCheck {
    pub state: LocalState,
    pub declared_size: Option<u64>,
}

impl FileCheck {
    /// Present and not contradicted by the digest or the declared size.
    fn plausibly_installed(&self) -> bool {
        match self.state {
            LocalState::Matching => true,
            LocalState::Unverified { size } => self.declared_size.map_or(true, |d| d == size),
            _ => false,
        }
    }
}

/// Combine per-file states into a version status.
///
/// Installed when every file is good; Partial when at least one file is
/// present without contradicting the catalog and at least one is not;
/// Absent otherwise. Unverified files count as good when their size equals
/// the declared size, and as wrong when it differs.
pub fn classify_version(files: &[FileCheck]) -> VersionStatus {
    if files.is_empty() {
        return VersionStatus::Absent;
    }
    let good = files
        .iter()
        .filter(|f| f.state.accept_by_size(f.declared_size))
        .count();
    let present = files.iter().filter(|f| f.plausibly_installed()).count();

    if good == files.len() {
        VersionStatus::Installed
    } else if present > 0 {
        VersionStatus::Partial
    } else {
        VersionStatus::Absent
    }
}
