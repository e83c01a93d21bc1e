//! HTTP client shared by the catalog and the transfer manager.
//!
//! Holds two reqwest clients:
//! - an API client with a total request timeout, for metadata calls
//! - a download client with connect and per-read timeouts but no total
//!   timeout, since a multi-gigabyte transfer outlives any fixed deadline
//!
//! The bearer token is attached here and nowhere else.

use crate::config::{CatalogConfig, NetworkConfig};
use crate::{CivitdlError, Result};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// HTTP client with bearer-token support.
#[derive(Clone)]
pub struct HttpClient {
    api: Client,
    download: Client,
    auth_token: Option<String>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("has_auth_token", &self.auth_token.is_some())
            .finish()
    }
}

impl HttpClient {
    /// Create a client, optionally authenticated with a bearer token.
    pub fn new(auth_token: Option<String>) -> Result<Self> {
        Self::with_timeout(auth_token, NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a client with a custom API request timeout.
    pub fn with_timeout(auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let api = Client::builder()
            .timeout(timeout)
            .user_agent(CatalogConfig::USER_AGENT)
            .build()
            .map_err(|e| CivitdlError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let download = Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .read_timeout(NetworkConfig::READ_TIMEOUT)
            .user_agent(CatalogConfig::USER_AGENT)
            .build()
            .map_err(|e| CivitdlError::Config {
                message: format!("Failed to create download HTTP client: {}", e),
            })?;

        let auth_token = auth_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            api,
            download,
            auth_token,
        })
    }

    pub fn has_token(&self) -> bool {
        self.auth_token.is_some()
    }

    /// Build an authenticated GET for a metadata call.
    pub fn api_get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.api.get(url))
    }

    /// Build an authenticated GET for a file transfer.
    pub fn download_get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.download.get(url))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// GET a catalog URL and decode its JSON body.
    ///
    /// `reference` names what was being looked up, for `NotFound` reporting.
    pub async fn get_json<T: DeserializeOwned + Send>(&self, url: &str, reference: &str) -> Result<T> {
        debug!("GET {}", url);
        let response = self
            .api_get(url)
            .send()
            .await
            .map_err(CivitdlError::catalog_network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.classify_status(status, reference));
        }

        let body = response
            .text()
            .await
            .map_err(CivitdlError::catalog_network)?;

        serde_json::from_str(&body).map_err(|e| CivitdlError::Decode {
            message: format!("{} ({})", e, url),
            source: Some(e),
        })
    }

    /// Map a non-success catalog status to an error kind.
    pub fn classify_status(&self, status: StatusCode, reference: &str) -> CivitdlError {
        match status.as_u16() {
            401 | 403 => CivitdlError::AuthRequired {
                message: if self.has_token() {
                    format!("token rejected (HTTP {})", status.as_u16())
                } else {
                    format!("no API token configured (HTTP {})", status.as_u16())
                },
            },
            400 | 404 | 410 => CivitdlError::NotFound {
                reference: reference.to_string(),
            },
            _ => CivitdlError::TransientCatalog {
                message: format!("catalog returned HTTP {}", status),
                status: Some(status.as_u16()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let client = HttpClient::new(None).unwrap();

        let err = client.classify_status(StatusCode::UNAUTHORIZED, "123");
        assert!(matches!(err, CivitdlError::AuthRequired { .. }));

        let err = client.classify_status(StatusCode::NOT_FOUND, "123");
        assert!(matches!(err, CivitdlError::NotFound { reference } if reference == "123"));

        let err = client.classify_status(StatusCode::SERVICE_UNAVAILABLE, "123");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_blank_token_is_ignored() {
        let client = HttpClient::new(Some("   ".to_string())).unwrap();
        assert!(!client.has_token());

        let client = HttpClient::new(Some(" abc ".to_string())).unwrap();
        assert!(client.has_token());
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = HttpClient::new(Some("secret-token".to_string())).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("secret-token"));
    }
}
