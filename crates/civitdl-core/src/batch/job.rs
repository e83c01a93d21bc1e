//! Batch file format and jobs.
//!
//! ```json
//! {
//!   "config": {
//!     "root_path": "/opt/ComfyUI",
//!     "api_token": "...",
//!     "placement_overrides": { "LORA": "models/loras/civitai" },
//!     "strict_selection": false
//!   },
//!   "models": [
//!     12345,
//!     "https://civitai.com/models/4201?modelVersionId=130072",
//!     { "id": 67890, "version": "v1.0", "file": "model.safetensors", "type": "LORA", "force": true }
//!   ]
//! }
//! ```

use crate::catalog::FileSelector;
use crate::models::ModelReference;
use crate::settings::ConfigLayer;
use crate::{CivitdlError, Result};
use serde::Deserialize;
use std::path::Path;

/// One unit of batch work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub reference: ModelReference,
    /// Reference as written, for reporting.
    pub label: String,
    pub version: Option<String>,
    pub file: Option<FileSelector>,
    pub model_type: Option<String>,
    pub force: bool,
    /// Fail instead of defaulting when a version has several files.
    pub strict_selection: bool,
}

impl BatchJob {
    pub fn new(reference: ModelReference) -> Self {
        Self {
            label: reference.to_string(),
            reference,
            version: None,
            file: None,
            model_type: None,
            force: false,
            strict_selection: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_file(mut self, file: FileSelector) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = Some(model_type.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_strict_selection(mut self, strict: bool) -> Self {
        self.strict_selection = strict;
        self
    }
}

/// A scalar that may be written as a number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(u64),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DetailedEntry {
    #[serde(alias = "url", alias = "reference")]
    id: Scalar,
    #[serde(default)]
    version: Option<Scalar>,
    #[serde(default)]
    file: Option<Scalar>,
    #[serde(default, rename = "type", alias = "model_type")]
    model_type: Option<String>,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    strict_selection: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BatchEntry {
    Bare(Scalar),
    Detailed(DetailedEntry),
}

/// The batch file's `config` block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchConfig {
    #[serde(flatten)]
    pub layer: ConfigLayer,
    #[serde(default)]
    pub strict_selection: bool,
}

/// A parsed batch file.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFile {
    #[serde(default)]
    pub config: BatchConfig,
    #[serde(default)]
    models: Vec<BatchEntry>,
}

impl BatchFile {
    pub fn parse(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| CivitdlError::Config {
            message: format!("invalid batch file: {}", e),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| CivitdlError::io_with_path(e, path))?;
        Self::parse(&contents)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Expand entries into jobs, in file order.
    pub fn jobs(&self) -> Result<Vec<BatchJob>> {
        self.models
            .iter()
            .enumerate()
            .map(|(i, entry)| self.entry_to_job(i, entry.clone()))
            .collect()
    }

    fn entry_to_job(&self, index: usize, entry: BatchEntry) -> Result<BatchJob> {
        let detailed = match entry {
            BatchEntry::Bare(reference) => DetailedEntry {
                id: reference,
                version: None,
                file: None,
                model_type: None,
                force: false,
                strict_selection: None,
            },
            BatchEntry::Detailed(detailed) => detailed,
        };

        let raw = detailed.id.into_string();
        let reference = ModelReference::parse(&raw).ok_or_else(|| CivitdlError::Config {
            message: format!("batch entry {} has an empty reference", index + 1),
        })?;

        let mut job = BatchJob::new(reference)
            .with_force(detailed.force)
            .with_strict_selection(
                detailed
                    .strict_selection
                    .unwrap_or(self.config.strict_selection),
            );
        job.label = raw.trim().to_string();
        job.version = detailed
            .version
            .map(Scalar::into_string)
            .filter(|v| !v.trim().is_empty());
        job.file = detailed
            .file
            .map(Scalar::into_string)
            .filter(|f| !f.trim().is_empty())
            .map(|f| FileSelector::parse(&f));
        job.model_type = detailed.model_type.filter(|t| !t.trim().is_empty());
        Ok(job)
    }
}
