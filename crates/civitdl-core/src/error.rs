//! Error types for civitdl.
//!
//! Errors are grouped by the stage of a job that produces them (resolution,
//! selection, transfer, filesystem). Only the two transient kinds are ever
//! retried; everything else is terminal for the job that raised it.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the civitdl engine.
#[derive(Debug, Error)]
pub enum CivitdlError {
    // Resolution errors
    #[error("Model not found: {reference}")]
    NotFound { reference: String },

    #[error("Catalog requires authentication: {message}")]
    AuthRequired { message: String },

    #[error("Catalog request failed: {message}")]
    TransientCatalog {
        message: String,
        /// HTTP status, when the failure came from a response
        status: Option<u16>,
    },

    #[error("Invalid catalog response: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Selection errors
    #[error("No version matching '{requested}' (available: {})", .available.join(", "))]
    VersionNotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("Version '{requested}' is ambiguous, matches: {}", .matches.join(", "))]
    AmbiguousVersion {
        requested: String,
        matches: Vec<String>,
    },

    #[error("No file matching '{selector}' in version {version}")]
    FileNotFound { selector: String, version: String },

    #[error("Version {version} has no downloadable file{}", .file.as_ref().map(|f| format!(" ({f})")).unwrap_or_default())]
    NotDownloadable {
        version: String,
        file: Option<String>,
    },

    #[error("{message} (candidates: {})", .candidates.join(", "))]
    AmbiguousSelection {
        message: String,
        candidates: Vec<String>,
    },

    // Transfer errors
    #[error("Transfer of {url} failed: {message}")]
    TransientTransfer { url: String, message: String },

    #[error("Incomplete transfer: got {actual} of {expected} bytes")]
    TransferIncomplete { expected: u64, actual: u64 },

    #[error("Corrupt transfer for {}: expected {expected}, got {actual}", .path.display())]
    CorruptTransfer {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Transfer cancelled")]
    TransferCancelled,

    #[error("{} exists with different content (expected {expected}, found {actual}); use --force to overwrite", .path.display())]
    ExistingFileMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for civitdl operations.
pub type Result<T> = std::result::Result<T, CivitdlError>;

/// The stage of a job an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Resolution,
    Selection,
    Transfer,
    Filesystem,
    Configuration,
}

impl std::fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorStage::Resolution => "resolution",
            ErrorStage::Selection => "selection",
            ErrorStage::Transfer => "transfer",
            ErrorStage::Filesystem => "filesystem",
            ErrorStage::Configuration => "configuration",
        };
        f.write_str(label)
    }
}

impl From<std::io::Error> for CivitdlError {
    fn from(err: std::io::Error) -> Self {
        CivitdlError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CivitdlError {
    fn from(err: serde_json::Error) -> Self {
        CivitdlError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CivitdlError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CivitdlError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Map a reqwest failure during a catalog call.
    pub fn catalog_network(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else {
            err.to_string()
        };
        CivitdlError::TransientCatalog {
            message,
            status: err.status().map(|s| s.as_u16()),
        }
    }

    /// Map a reqwest failure while streaming a file.
    pub fn transfer_network(url: &str, err: reqwest::Error) -> Self {
        CivitdlError::TransientTransfer {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// Stable short label for summaries and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CivitdlError::NotFound { .. } => "NotFound",
            CivitdlError::AuthRequired { .. } => "AuthRequired",
            CivitdlError::TransientCatalog { .. } => "TransientCatalogError",
            CivitdlError::Decode { .. } => "DecodeError",
            CivitdlError::VersionNotFound { .. } => "VersionNotFound",
            CivitdlError::AmbiguousVersion { .. } => "AmbiguousVersion",
            CivitdlError::FileNotFound { .. } => "FileNotFound",
            CivitdlError::NotDownloadable { .. } => "NotDownloadable",
            CivitdlError::AmbiguousSelection { .. } => "AmbiguousSelection",
            CivitdlError::TransientTransfer { .. } => "TransientTransferError",
            CivitdlError::TransferIncomplete { .. } => "TransferIncomplete",
            CivitdlError::CorruptTransfer { .. } => "CorruptTransfer",
            CivitdlError::TransferCancelled => "TransferCancelled",
            CivitdlError::ExistingFileMismatch { .. } => "ExistingFileMismatch",
            CivitdlError::Io { .. } => "FilesystemError",
            CivitdlError::Json { .. } => "JsonError",
            CivitdlError::Config { .. } => "ConfigError",
            CivitdlError::Other(_) => "Other",
        }
    }

    /// Which stage of a job produced this error.
    pub fn stage(&self) -> ErrorStage {
        match self {
            CivitdlError::NotFound { .. }
            | CivitdlError::AuthRequired { .. }
            | CivitdlError::TransientCatalog { .. }
            | CivitdlError::Decode { .. } => ErrorStage::Resolution,

            CivitdlError::VersionNotFound { .. }
            | CivitdlError::AmbiguousVersion { .. }
            | CivitdlError::FileNotFound { .. }
            | CivitdlError::NotDownloadable { .. }
            | CivitdlError::AmbiguousSelection { .. } => ErrorStage::Selection,

            CivitdlError::TransientTransfer { .. }
            | CivitdlError::TransferIncomplete { .. }
            | CivitdlError::CorruptTransfer { .. }
            | CivitdlError::TransferCancelled
            | CivitdlError::ExistingFileMismatch { .. } => ErrorStage::Transfer,

            CivitdlError::Io { .. } | CivitdlError::Json { .. } | CivitdlError::Other(_) => {
                ErrorStage::Filesystem
            }

            CivitdlError::Config { .. } => ErrorStage::Configuration,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CivitdlError::TransientCatalog { .. } | CivitdlError::TransientTransfer { .. }
        )
    }
}
