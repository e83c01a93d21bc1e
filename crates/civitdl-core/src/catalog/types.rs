//! Catalog API response types and their conversion into domain records.
//!
//! Unknown fields are ignored. Required fields (`id`, `name`) are not
//! optional, so a response missing them fails to decode instead of
//! producing half-filled records.

use crate::models::{
    sort_newest_first, DeclaredHash, ModelFile, ModelSummary, ModelVersion,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// `GET /models/{id}` and items of `GET /models?query=`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiModel {
    pub id: u64,
    pub name: String,
    #[serde(default, rename = "type")]
    pub model_type: Option<String>,
    #[serde(default)]
    pub model_versions: Vec<ApiModelVersion>,
}

/// `GET /models?query=`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiSearchPage {
    #[serde(default)]
    pub items: Vec<ApiModel>,
}

/// Parent model summary embedded in `GET /model-versions/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiVersionParent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub model_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiModelVersion {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub model_id: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub files: Vec<ApiModelFile>,
    #[serde(default)]
    pub stats: Option<ApiVersionStats>,
    /// Only present on `GET /model-versions/{id}`.
    #[serde(default)]
    pub model: Option<ApiVersionParent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiVersionStats {
    #[serde(default)]
    pub download_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiModelFile {
    pub id: u64,
    pub name: String,
    #[serde(default, rename = "sizeKB")]
    pub size_kb: Option<f64>,
    #[serde(default, rename = "type")]
    pub file_type: Option<String>,
    #[serde(default)]
    pub primary: Option<bool>,
    #[serde(default)]
    pub hashes: HashMap<String, String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl ApiModelFile {
    pub fn into_domain(self) -> ModelFile {
        let declared_hash =
            DeclaredHash::select(self.hashes.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        ModelFile {
            id: self.id,
            file_name: self.name,
            download_url: self.download_url.filter(|u| !u.trim().is_empty()),
            declared_hash,
            size_bytes: self
                .size_kb
                .filter(|kb| *kb > 0.0)
                .map(|kb| (kb * 1024.0).round() as u64),
            primary: self.primary.unwrap_or(false),
            kind: self.file_type,
        }
    }
}

impl ApiModelVersion {
    pub fn into_domain(self, parent_id: u64) -> ModelVersion {
        ModelVersion {
            id: self.id,
            label: self.name,
            model_id: self.model_id.unwrap_or(parent_id),
            files: self.files.into_iter().map(ApiModelFile::into_domain).collect(),
            created_at: self.created_at,
            base_model: self.base_model,
            download_count: self.stats.and_then(|s| s.download_count),
        }
    }
}

impl ApiModel {
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            id: self.id,
            name: self.name.clone(),
            declared_type: self.model_type.clone(),
        }
    }

    /// Split into the summary and its versions, newest first.
    pub fn into_domain(self) -> (ModelSummary, Vec<ModelVersion>) {
        let summary = self.summary();
        let mut versions: Vec<ModelVersion> = self
            .model_versions
            .into_iter()
            .map(|v| v.into_domain(summary.id))
            .collect();
        sort_newest_first(&mut versions);
        (summary, versions)
    }
}
