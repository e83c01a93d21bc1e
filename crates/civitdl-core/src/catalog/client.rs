//! Catalog API client.
//!
//! The [`Catalog`] trait is the seam the resolver depends on; the HTTP
//! implementation talks to the CivitAI v1 REST API.

use super::types::{ApiModel, ApiModelVersion, ApiSearchPage};
use crate::config::CatalogConfig;
use crate::models::{ModelSummary, ModelVersion};
use crate::network::{retry_async, HttpClient, RetryConfig};
use crate::{CivitdlError, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// A model together with its versions, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDetails {
    pub summary: ModelSummary,
    pub versions: Vec<ModelVersion>,
}

/// Read-only access to catalog metadata.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Look up a model and all of its versions.
    async fn model(&self, model_id: u64) -> Result<ModelDetails>;

    /// Look up a single version by id.
    async fn model_version(&self, version_id: u64) -> Result<ModelVersion>;

    /// Free-text search, ranked by the catalog.
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<ModelSummary>>;
}

/// HTTP client for the CivitAI catalog.
#[derive(Debug, Clone)]
pub struct CivitaiClient {
    http: HttpClient,
    base_url: String,
    retry: RetryConfig,
}

impl CivitaiClient {
    /// Create a client against the public catalog.
    pub fn new(http: HttpClient) -> Self {
        Self::with_base_url(http, CatalogConfig::API_BASE)
    }

    /// Create a client against a custom API base (e.g. a mirror or test server).
    pub fn with_base_url(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::for_catalog(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Check whether the configured token is accepted by the catalog.
    pub async fn validate_token(&self) -> Result<bool> {
        let url = format!("{}/models?limit=1", self.base_url);
        match self.http.get_json::<serde_json::Value>(&url, "token check").await {
            Ok(_) => Ok(true),
            Err(CivitdlError::AuthRequired { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_with_retry<T: serde::de::DeserializeOwned + Send>(
        &self,
        url: &str,
        reference: &str,
    ) -> Result<T> {
        let (result, stats) = retry_async(
            &self.retry,
            || self.http.get_json::<T>(url, reference),
            |e: &CivitdlError| e.is_retryable(),
        )
        .await;

        if stats.attempts > 1 {
            debug!(
                "Catalog call {} took {} attempts (total delay: {:?})",
                url, stats.attempts, stats.total_delay
            );
        }
        result
    }
}

#[async_trait]
impl Catalog for CivitaiClient {
    async fn model(&self, model_id: u64) -> Result<ModelDetails> {
        let url = format!("{}/models/{}", self.base_url, model_id);
        let model: ApiModel = self.get_with_retry(&url, &model_id.to_string()).await?;
        let (summary, versions) = model.into_domain();
        info!(
            "Found model {} '{}' ({} versions)",
            summary.id,
            summary.name,
            versions.len()
        );
        Ok(ModelDetails { summary, versions })
    }

    async fn model_version(&self, version_id: u64) -> Result<ModelVersion> {
        let url = format!("{}/model-versions/{}", self.base_url, version_id);
        let version: ApiModelVersion = self
            .get_with_retry(&url, &format!("version {}", version_id))
            .await?;

        let Some(model_id) = version.model_id else {
            return Err(CivitdlError::Decode {
                message: format!("model-version {} has no modelId", version_id),
                source: None,
            });
        };
        if let Some(parent) = &version.model {
            debug!(
                "Version {} belongs to {:?} ({:?})",
                version_id, parent.name, parent.model_type
            );
        }
        Ok(version.into_domain(model_id))
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<ModelSummary>> {
        let url = format!(
            "{}/models?query={}&limit={}",
            self.base_url,
            urlencoding::encode(query),
            limit.clamp(1, 100)
        );
        let page: ApiSearchPage = self.get_with_retry(&url, query).await?;
        debug!("Search '{}' returned {} models", query, page.items.len());
        Ok(page.items.iter().map(ApiModel::summary).collect())
    }
}
