//! Model references as typed by users or listed in batch files.

use crate::config::CatalogConfig;
use serde::{Deserialize, Serialize};
use url::Url;

/// A raw reference to a catalog model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelReference {
    Id(u64),
    Url(String),
    SearchTerm(String),
}

impl ModelReference {
    /// Classify raw input.
    ///
    /// A leading `@` (as pasted from chat tools) is ignored. Purely numeric
    /// input is an id; anything that looks like a URL is a URL; the rest is
    /// a search term.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed).trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Ok(id) = trimmed.parse::<u64>() {
            return Some(ModelReference::Id(id));
        }

        if trimmed.contains("://") || trimmed.starts_with(CatalogConfig::WEB_HOST) {
            return Some(ModelReference::Url(trimmed.to_string()));
        }

        Some(ModelReference::SearchTerm(trimmed.to_string()))
    }
}

impl std::fmt::Display for ModelReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelReference::Id(id) => write!(f, "{}", id),
            ModelReference::Url(url) => f.write_str(url),
            ModelReference::SearchTerm(term) => write!(f, "\"{}\"", term),
        }
    }
}

/// What a catalog URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlTarget {
    /// A model page, optionally pinned to one version.
    Model { model_id: u64, version_id: Option<u64> },
    /// A direct download link for one version.
    Version { version_id: u64, file_id: Option<u64> },
}

/// Extract the model or version a catalog URL refers to.
///
/// Recognized forms:
/// - `https://civitai.com/models/<id>[/<slug>][?modelVersionId=<vid>]`
/// - `https://civitai.com/api/download/models/<vid>[?fileId=<fid>]`
/// - `https://civitai.com/api/v1/models/<id>`
/// - `https://civitai.com/api/v1/model-versions/<vid>`
pub fn parse_catalog_url(raw: &str) -> Option<UrlTarget> {
    let normalized = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };
    let url = Url::parse(&normalized).ok()?;

    let host = url.host_str()?;
    if host != CatalogConfig::WEB_HOST && !host.ends_with(&format!(".{}", CatalogConfig::WEB_HOST))
    {
        return None;
    }

    let query_id = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.parse::<u64>().ok())
    };

    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["api", "download", "models", vid, ..] => Some(UrlTarget::Version {
            version_id: vid.parse().ok()?,
            file_id: query_id("fileId"),
        }),
        ["api", "v1", "model-versions", vid, ..] => Some(UrlTarget::Version {
            version_id: vid.parse().ok()?,
            file_id: None,
        }),
        ["api", "v1", "models", id, ..] | ["models", id, ..] => Some(UrlTarget::Model {
            model_id: id.parse().ok()?,
            version_id: query_id("modelVersionId"),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(ModelReference::parse("12345"), Some(ModelReference::Id(12345)));
        assert_eq!(ModelReference::parse(" @67890 "), Some(ModelReference::Id(67890)));
    }

    #[test]
    fn test_parse_url_and_search() {
        assert_eq!(
            ModelReference::parse("https://civitai.com/models/4201/realistic-vision"),
            Some(ModelReference::Url(
                "https://civitai.com/models/4201/realistic-vision".into()
            ))
        );
        assert_eq!(
            ModelReference::parse("civitai.com/models/4201"),
            Some(ModelReference::Url("civitai.com/models/4201".into()))
        );
        assert_eq!(
            ModelReference::parse("realistic vision"),
            Some(ModelReference::SearchTerm("realistic vision".into()))
        );
        assert_eq!(ModelReference::parse("   "), None);
        assert_eq!(ModelReference::parse("@"), None);
    }

    #[test]
    fn test_model_page_urls() {
        assert_eq!(
            parse_catalog_url("https://civitai.com/models/4201/realistic-vision"),
            Some(UrlTarget::Model {
                model_id: 4201,
                version_id: None
            })
        );
        assert_eq!(
            parse_catalog_url("https://civitai.com/models/4201?modelVersionId=130072"),
            Some(UrlTarget::Model {
                model_id: 4201,
                version_id: Some(130072)
            })
        );
        assert_eq!(
            parse_catalog_url("civitai.com/models/4201"),
            Some(UrlTarget::Model {
                model_id: 4201,
                version_id: None
            })
        );
    }

    #[test]
    fn test_download_urls() {
        assert_eq!(
            parse_catalog_url("https://civitai.com/api/download/models/46846"),
            Some(UrlTarget::Version {
                version_id: 46846,
                file_id: None
            })
        );
        assert_eq!(
            parse_catalog_url("https://civitai.com/api/download/models/46846?fileId=99&type=Model"),
            Some(UrlTarget::Version {
                version_id: 46846,
                file_id: Some(99)
            })
        );
    }

    #[test]
    fn test_foreign_or_malformed_urls() {
        assert_eq!(parse_catalog_url("https://example.com/models/1"), None);
        assert_eq!(parse_catalog_url("https://civitai.com/models/abc"), None);
        assert_eq!(parse_catalog_url("https://civitai.com/images/1"), None);
        assert_eq!(parse_catalog_url("not a url at all"), None);
    }
}
