//! Reference resolution and version/file selection.
//!
//! The resolver never prompts. Ambiguity is returned as data
//! ([`Resolution::Candidates`], [`FileSelection::Ambiguous`]) so an
//! interactive shell can ask the user and call back with an explicit
//! selector, while batch callers turn it into an error.

use super::client::{Catalog, ModelDetails};
use crate::config::CatalogConfig;
use crate::models::{
    parse_catalog_url, ModelFile, ModelReference, ModelSummary, ModelVersion, UrlTarget,
};
use crate::{CivitdlError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of resolving a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The reference identified exactly one model.
    Resolved(ResolvedModel),
    /// A search matched several models, in catalog rank order.
    Candidates(Vec<ModelSummary>),
}

/// A model with its versions plus any version/file the reference pinned.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub summary: ModelSummary,
    /// Newest first.
    pub versions: Vec<ModelVersion>,
    /// Set by download URLs and `?modelVersionId=` page URLs.
    pub pinned_version: Option<u64>,
    /// Set by download URLs carrying `?fileId=`.
    pub pinned_file: Option<u64>,
}

impl ResolvedModel {
    fn from_details(details: ModelDetails) -> Self {
        Self {
            summary: details.summary,
            versions: details.versions,
            pinned_version: None,
            pinned_file: None,
        }
    }

    /// Select a version, honoring a pinned version when no selector is given.
    pub fn select_version(&self, selector: Option<&str>) -> Result<&ModelVersion> {
        let explicit = selector.map(str::trim).filter(|s| !s.is_empty());
        match (explicit, self.pinned_version) {
            (None, Some(pinned)) => self
                .versions
                .iter()
                .find(|v| v.id == pinned)
                .ok_or_else(|| CivitdlError::VersionNotFound {
                    requested: pinned.to_string(),
                    available: version_labels(&self.versions),
                }),
            _ => select_version(&self.versions, explicit),
        }
    }
}

/// How a caller wants ties between several files broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Take the catalog's primary file, else the first, and flag the choice.
    #[default]
    PreferPrimary,
    /// Refuse to guess.
    Strict,
}

/// Explicit file selector: numeric input matches the file id, anything
/// else the file name (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSelector {
    Id(u64),
    Name(String),
}

impl FileSelector {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed.parse::<u64>() {
            Ok(id) => FileSelector::Id(id),
            Err(_) => FileSelector::Name(trimmed.to_string()),
        }
    }

    fn matches(&self, file: &ModelFile) -> bool {
        match self {
            FileSelector::Id(id) => file.id == *id,
            FileSelector::Name(name) => file.file_name.eq_ignore_ascii_case(name),
        }
    }
}

impl std::fmt::Display for FileSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSelector::Id(id) => write!(f, "{}", id),
            FileSelector::Name(name) => f.write_str(name),
        }
    }
}

/// Outcome of file selection within one version.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSelection<'a> {
    Chosen {
        file: &'a ModelFile,
        /// True when no selector was given and several files existed.
        defaulted: bool,
    },
    /// Several files and no selector; the caller must choose.
    Ambiguous(&'a [ModelFile]),
}

impl<'a> FileSelection<'a> {
    /// Settle an ambiguous selection according to `policy`.
    pub fn settle(self, policy: SelectionPolicy) -> Result<(&'a ModelFile, bool)> {
        match self {
            FileSelection::Chosen { file, defaulted } => Ok((file, defaulted)),
            FileSelection::Ambiguous(files) => match policy {
                SelectionPolicy::Strict => Err(CivitdlError::AmbiguousSelection {
                    message: "version has several files and no file was specified".into(),
                    candidates: files.iter().map(|f| f.file_name.clone()).collect(),
                }),
                SelectionPolicy::PreferPrimary => {
                    let file = files
                        .iter()
                        .find(|f| f.primary && f.is_downloadable())
                        .or_else(|| files.iter().find(|f| f.is_downloadable()))
                        .ok_or_else(|| CivitdlError::AmbiguousSelection {
                            message: "none of the version's files is downloadable".into(),
                            candidates: files.iter().map(|f| f.file_name.clone()).collect(),
                        })?;
                    warn!(
                        "Version has {} files, defaulting to '{}' (use --file to choose)",
                        files.len(),
                        file.file_name
                    );
                    Ok((file, true))
                }
            },
        }
    }
}

/// Resolves references against a [`Catalog`].
#[derive(Clone)]
pub struct ReferenceResolver {
    catalog: Arc<dyn Catalog>,
    search_limit: u32,
}

impl ReferenceResolver {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            search_limit: CatalogConfig::SEARCH_LIMIT,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Resolve a reference to one model or a ranked candidate list.
    pub async fn resolve(&self, reference: &ModelReference) -> Result<Resolution> {
        match reference {
            ModelReference::Id(id) => {
                let details = self.catalog.model(*id).await?;
                Ok(Resolution::Resolved(ResolvedModel::from_details(details)))
            }
            ModelReference::Url(url) => {
                let target = parse_catalog_url(url).ok_or_else(|| CivitdlError::NotFound {
                    reference: url.clone(),
                })?;
                self.resolve_url_target(target).await.map(Resolution::Resolved)
            }
            ModelReference::SearchTerm(term) => {
                let mut candidates = self.catalog.search(term, self.search_limit).await?;
                match candidates.len() {
                    0 => Err(CivitdlError::NotFound {
                        reference: reference.to_string(),
                    }),
                    1 => {
                        let only = candidates.remove(0);
                        info!("Search {} matched '{}' ({})", reference, only.name, only.id);
                        let details = self.catalog.model(only.id).await?;
                        Ok(Resolution::Resolved(ResolvedModel::from_details(details)))
                    }
                    _ => Ok(Resolution::Candidates(candidates)),
                }
            }
        }
    }

    /// Resolve without a human in the loop.
    ///
    /// A candidate list is accepted only when exactly one candidate's name
    /// equals the search term (case-insensitive).
    pub async fn resolve_unique(&self, reference: &ModelReference) -> Result<ResolvedModel> {
        match self.resolve(reference).await? {
            Resolution::Resolved(model) => Ok(model),
            Resolution::Candidates(candidates) => {
                let term = match reference {
                    ModelReference::SearchTerm(term) => term.as_str(),
                    _ => "",
                };
                let exact: Vec<&ModelSummary> = candidates
                    .iter()
                    .filter(|c| c.name.trim().eq_ignore_ascii_case(term.trim()))
                    .collect();
                if let [only] = exact.as_slice() {
                    let details = self.catalog.model(only.id).await?;
                    return Ok(ResolvedModel::from_details(details));
                }
                Err(CivitdlError::AmbiguousSelection {
                    message: format!("search {} matched {} models", reference, candidates.len()),
                    candidates: candidates
                        .iter()
                        .map(|c| format!("{} ({})", c.name, c.id))
                        .collect(),
                })
            }
        }
    }

    async fn resolve_url_target(&self, target: UrlTarget) -> Result<ResolvedModel> {
        match target {
            UrlTarget::Model {
                model_id,
                version_id,
            } => {
                let mut model = ResolvedModel::from_details(self.catalog.model(model_id).await?);
                model.pinned_version = version_id;
                Ok(model)
            }
            UrlTarget::Version {
                version_id,
                file_id,
            } => {
                let version = self.catalog.model_version(version_id).await?;
                let mut model =
                    ResolvedModel::from_details(self.catalog.model(version.model_id).await?);
                // the model listing may omit versions the direct lookup can see
                if !model.versions.iter().any(|v| v.id == version.id) {
                    model.versions.push(version);
                }
                model.pinned_version = Some(version_id);
                model.pinned_file = file_id;
                Ok(model)
            }
        }
    }
}

fn version_labels(versions: &[ModelVersion]) -> Vec<String> {
    versions.iter().map(|v| v.label.clone()).collect()
}

/// Pick a version by label.
///
/// `None`, empty and `"latest"` pick the newest version. Otherwise an exact
/// (case-insensitive) label match wins; failing that, a unique substring
/// match or a version id is accepted.
pub fn select_version<'a>(
    versions: &'a [ModelVersion],
    selector: Option<&str>,
) -> Result<&'a ModelVersion> {
    let requested = selector.map(str::trim).unwrap_or("");
    if requested.is_empty() || requested.eq_ignore_ascii_case("latest") {
        return versions.first().ok_or_else(|| CivitdlError::VersionNotFound {
            requested: "latest".into(),
            available: vec![],
        });
    }

    let needle = requested.to_lowercase();
    if let Some(exact) = versions.iter().find(|v| v.label.to_lowercase() == needle) {
        return Ok(exact);
    }

    let partial: Vec<&ModelVersion> = versions
        .iter()
        .filter(|v| v.label.to_lowercase().contains(&needle))
        .collect();
    match partial.as_slice() {
        [only] => Ok(only),
        [] => {
            if let Ok(id) = requested.parse::<u64>() {
                if let Some(by_id) = versions.iter().find(|v| v.id == id) {
                    return Ok(by_id);
                }
            }
            Err(CivitdlError::VersionNotFound {
                requested: requested.to_string(),
                available: version_labels(versions),
            })
        }
        many => Err(CivitdlError::AmbiguousVersion {
            requested: requested.to_string(),
            matches: many.iter().map(|v| v.label.clone()).collect(),
        }),
    }
}

/// Pick a file within a version.
///
/// The chosen file must be downloadable; a generation-only file or a
/// version without files is reported as `NotDownloadable`.
pub fn select_file<'a>(
    version: &'a ModelVersion,
    selector: Option<&FileSelector>,
) -> Result<FileSelection<'a>> {
    if version.files.is_empty() {
        return Err(CivitdlError::NotDownloadable {
            version: version.label.clone(),
            file: None,
        });
    }

    let selection = match selector {
        Some(selector) => {
            let file = version
                .files
                .iter()
                .find(|f| selector.matches(f))
                .ok_or_else(|| CivitdlError::FileNotFound {
                    selector: selector.to_string(),
                    version: version.label.clone(),
                })?;
            FileSelection::Chosen {
                file,
                defaulted: false,
            }
        }
        None if version.files.len() == 1 => FileSelection::Chosen {
            file: &version.files[0],
            defaulted: false,
        },
        None => {
            let downloadable = version.files.iter().filter(|f| f.is_downloadable()).count();
            if downloadable == 0 {
                return Err(CivitdlError::NotDownloadable {
                    version: version.label.clone(),
                    file: None,
                });
            }
            FileSelection::Ambiguous(&version.files)
        }
    };

    if let FileSelection::Chosen { file, .. } = &selection {
        if !file.is_downloadable() {
            return Err(CivitdlError::NotDownloadable {
                version: version.label.clone(),
                file: Some(file.file_name.clone()),
            });
        }
    }
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: u64, name: &str, primary: bool) -> ModelFile {
        ModelFile {
            id,
            file_name: name.into(),
            download_url: Some(format!("https://civitai.com/api/download/models/{}", id)),
            declared_hash: None,
            size_bytes: Some(4),
            primary,
            kind: None,
        }
    }

    fn version(id: u64, label: &str, files: Vec<ModelFile>) -> ModelVersion {
        ModelVersion {
            id,
            label: label.into(),
            model_id: 1,
            files,
            created_at: None,
            base_model: None,
            download_count: None,
        }
    }

    fn labels(labels: &[&str]) -> Vec<ModelVersion> {
        labels
            .iter()
            .enumerate()
            .map(|(i, l)| version(i as u64 + 100, l, vec![file(i as u64, "a.safetensors", true)]))
            .collect()
    }

    #[test]
    fn test_latest_picks_first() {
        let versions = labels(&["v2.2", "v2.1"]);
        assert_eq!(select_version(&versions, None).unwrap().label, "v2.2");
        assert_eq!(select_version(&versions, Some("")).unwrap().label, "v2.2");
        assert_eq!(select_version(&versions, Some("LATEST")).unwrap().label, "v2.2");
    }

    #[test]
    fn test_exact_match_beats_substring() {
        let versions = labels(&["v1.0 Pruned", "v1.0"]);
        assert_eq!(select_version(&versions, Some("V1.0")).unwrap().label, "v1.0");
    }

    #[test]
    fn test_unique_substring_match() {
        let versions = labels(&["SDXL v3", "SD1.5 v2"]);
        assert_eq!(select_version(&versions, Some("sdxl")).unwrap().label, "SDXL v3");
    }

    #[test]
    fn test_ambiguous_version() {
        let versions = labels(&["v1.1", "v1.2"]);
        let err = select_version(&versions, Some("v1")).unwrap_err();
        match err {
            CivitdlError::AmbiguousVersion { matches, .. } => {
                assert_eq!(matches, vec!["v1.1", "v1.2"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_version_not_found() {
        let versions = labels(&["v2.0", "v1.1"]);
        let err = select_version(&versions, Some("v1.0")).unwrap_err();
        assert_eq!(err.kind(), "VersionNotFound");
    }

    #[test]
    fn test_version_by_id() {
        let versions = labels(&["alpha", "beta"]);
        assert_eq!(select_version(&versions, Some("101")).unwrap().label, "beta");
    }

    #[test]
    fn test_pinned_version_used_without_selector() {
        let model = ResolvedModel {
            summary: ModelSummary {
                id: 1,
                name: "m".into(),
                declared_type: None,
            },
            versions: labels(&["v3", "v2", "v1"]),
            pinned_version: Some(101),
            pinned_file: None,
        };
        assert_eq!(model.select_version(None).unwrap().label, "v2");
        assert_eq!(model.select_version(Some("v1")).unwrap().label, "v1");
    }

    #[test]
    fn test_single_file_chosen_automatically() {
        let v = version(1, "v1", vec![file(7, "only.safetensors", false)]);
        let selection = select_file(&v, None).unwrap();
        assert_eq!(
            selection,
            FileSelection::Chosen {
                file: &v.files[0],
                defaulted: false
            }
        );
    }

    #[test]
    fn test_file_by_id_and_name() {
        let v = version(
            1,
            "v1",
            vec![file(7, "full.safetensors", true), file(8, "pruned.safetensors", false)],
        );
        let (f, defaulted) = select_file(&v, Some(&FileSelector::parse("8")))
            .unwrap()
            .settle(SelectionPolicy::Strict)
            .unwrap();
        assert_eq!(f.file_name, "pruned.safetensors");
        assert!(!defaulted);

        let (f, _) = select_file(&v, Some(&FileSelector::parse("FULL.safetensors")))
            .unwrap()
            .settle(SelectionPolicy::Strict)
            .unwrap();
        assert_eq!(f.id, 7);

        let err = select_file(&v, Some(&FileSelector::parse("missing.ckpt"))).unwrap_err();
        assert_eq!(err.kind(), "FileNotFound");
    }

    #[test]
    fn test_multiple_files_policy() {
        let v = version(
            1,
            "v1",
            vec![file(7, "config.yaml", false), file(8, "model.safetensors", true)],
        );

        let selection = select_file(&v, None).unwrap();
        assert!(matches!(selection, FileSelection::Ambiguous(_)));

        let (f, defaulted) = selection.clone().settle(SelectionPolicy::PreferPrimary).unwrap();
        assert_eq!(f.id, 8);
        assert!(defaulted);

        let err = selection.settle(SelectionPolicy::Strict).unwrap_err();
        assert_eq!(err.kind(), "AmbiguousSelection");
    }

    #[test]
    fn test_default_skips_primary_without_download() {
        let mut gated = file(8, "model.safetensors", true);
        gated.download_url = None;
        let v = version(
            1,
            "v1",
            vec![gated, file(7, "config.yaml", false), file(6, "pruned.safetensors", false)],
        );

        let (f, defaulted) = select_file(&v, None)
            .unwrap()
            .settle(SelectionPolicy::PreferPrimary)
            .unwrap();
        assert_eq!(f.id, 7);
        assert!(defaulted);

        let mut with_primary = v.clone();
        with_primary.files[2].primary = true;
        let (f, _) = select_file(&with_primary, None)
            .unwrap()
            .settle(SelectionPolicy::PreferPrimary)
            .unwrap();
        assert_eq!(f.id, 6);
    }

    #[test]
    fn test_generation_only_is_not_downloadable() {
        let mut gen = file(9, "gen.safetensors", true);
        gen.download_url = None;
        let v = version(1, "v1", vec![gen]);
        let err = select_file(&v, None).unwrap_err();
        assert_eq!(err.kind(), "NotDownloadable");

        let empty = version(2, "v2", vec![]);
        let err = select_file(&empty, None).unwrap_err();
        assert_eq!(err.kind(), "NotDownloadable");
    }
}
