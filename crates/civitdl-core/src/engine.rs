//! Single-job download pipeline.
//!
//! resolve → select version/file → place → verify local → transfer.
//! The interactive shell and the batch orchestrator both drive jobs through
//! [`Downloader`]; neither touches the catalog or filesystem directly.

use crate::batch::BatchJob;
use crate::cancel::CancellationToken;
use crate::catalog::{
    select_file, Catalog, CivitaiClient, FileSelector, ReferenceResolver, ResolvedModel,
    SelectionPolicy,
};
use crate::error::ErrorStage;
use crate::integrity::{classify_version, FileCheck, LocalCandidate, LocalState, VersionStatus};
use crate::models::{ModelFile, ModelVersion};
use crate::network::HttpClient;
use crate::placement::{choose_type_label, ensure_directory, safe_file_name, PlacementMapper};
use crate::settings::EffectiveConfig;
use crate::transfer::{DestinationLocks, DownloadProgress, TransferManager, TransferRequest};
use crate::{CivitdlError, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Why a job did not transfer anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Local digest equals the declared digest.
    Matching,
    /// No declared digest; local size equals the declared size.
    SizeMatch,
}

/// Result of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Skipped {
        path: PathBuf,
        reason: SkipReason,
    },
    Downloaded {
        path: PathBuf,
        bytes_transferred: u64,
    },
    Overwritten {
        path: PathBuf,
        bytes_transferred: u64,
    },
    Failed {
        kind: String,
        stage: String,
        reason: String,
    },
}

impl JobOutcome {
    pub fn failed(err: &CivitdlError) -> Self {
        JobOutcome::Failed {
            kind: err.kind().to_string(),
            stage: err.stage().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Skipped { .. } => "Skipped",
            JobOutcome::Downloaded { .. } => "Downloaded",
            JobOutcome::Overwritten { .. } => "Overwritten",
            JobOutcome::Failed { .. } => "Failed",
        }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Skipped { path, reason } => {
                write!(f, "Skipped ({:?}): {}", reason, path.display())
            }
            JobOutcome::Downloaded { path, .. } => write!(f, "Downloaded: {}", path.display()),
            JobOutcome::Overwritten { path, .. } => write!(f, "Overwritten: {}", path.display()),
            JobOutcome::Failed { kind, reason, .. } => write!(f, "Failed ({}): {}", kind, reason),
        }
    }
}

/// A concrete file chosen for a job.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub model: ResolvedModel,
    pub version: ModelVersion,
    pub file: ModelFile,
    /// Chosen by default among several files.
    pub defaulted: bool,
}

/// Where a selected file will be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDestination {
    pub path: PathBuf,
    pub type_label: String,
    /// The type was unknown and the fallback bucket was used.
    pub fallback: bool,
}

/// Per-fetch options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Replace a local file that does not match.
    pub force: bool,
    pub type_override: Option<String>,
}

/// Drives jobs through the pipeline with one shared configuration.
#[derive(Clone)]
pub struct Downloader {
    resolver: ReferenceResolver,
    transfers: TransferManager,
    config: Arc<EffectiveConfig>,
    mapper: PlacementMapper,
    locks: DestinationLocks,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(catalog: Arc<dyn Catalog>, transfers: TransferManager, config: EffectiveConfig) -> Self {
        let mapper = PlacementMapper::from_config(&config.root_path, &config.placement_overrides);
        Self {
            resolver: ReferenceResolver::new(catalog),
            transfers,
            config: Arc::new(config),
            mapper,
            locks: DestinationLocks::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Build against the public catalog using the configured token.
    pub fn from_config(config: EffectiveConfig) -> Result<Self> {
        let http = HttpClient::new(config.api_token.clone())?;
        let catalog = CivitaiClient::new(http.clone());
        Ok(Self::with_http(http, catalog, config))
    }

    /// Build from an HTTP client and a catalog client sharing it.
    pub fn with_http(http: HttpClient, catalog: CivitaiClient, config: EffectiveConfig) -> Self {
        Self::new(Arc::new(catalog), TransferManager::new(http), config)
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_transfer_manager(mut self, transfers: TransferManager) -> Self {
        self.transfers = transfers;
        self
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolve and select non-interactively, as a batch entry would.
    pub async fn select(&self, job: &BatchJob) -> Result<SelectedFile> {
        let model = self.resolver.resolve_unique(&job.reference).await?;
        let version = model.select_version(job.version.as_deref())?.clone();

        // a download URL's fileId only applies to the version it pinned
        let selector = job.file.clone().or_else(|| {
            model
                .pinned_file
                .filter(|_| model.pinned_version == Some(version.id))
                .map(FileSelector::Id)
        });
        let policy = if job.strict_selection {
            SelectionPolicy::Strict
        } else {
            SelectionPolicy::PreferPrimary
        };
        let (file, defaulted) = select_file(&version, selector.as_ref())?.settle(policy)?;
        let file = file.clone();

        info!(
            "Selected {} / {} / {}",
            model.summary.name, version.label, file.file_name
        );
        Ok(SelectedFile {
            model,
            version,
            file,
            defaulted,
        })
    }

    /// Destination for a file of `model`.
    pub fn plan(
        &self,
        model: &ResolvedModel,
        file: &ModelFile,
        type_override: Option<&str>,
    ) -> Result<PlannedDestination> {
        let file_name = safe_file_name(&file.file_name)?;
        let declared = model.summary.declared_type.as_deref();
        let choice = choose_type_label(&self.mapper, type_override, declared, file_name);

        if let Some(dir) = &self.config.output_dir {
            return Ok(PlannedDestination {
                path: dir.join(file_name),
                type_label: choice.label,
                fallback: false,
            });
        }

        let placement = self.mapper.placement(&choice.label);
        // unknown labels were already reported by the mapper
        if choice.fallback && !placement.fallback {
            warn!(
                "Model type '{}' not mapped, placing {} as '{}' in {} (use --model-type to correct)",
                declared.unwrap_or("unknown"),
                file_name,
                choice.label,
                placement.subdirectory.display()
            );
        }
        Ok(PlannedDestination {
            path: placement.file_path(file_name)?,
            type_label: choice.label,
            fallback: choice.fallback || placement.fallback,
        })
    }

    /// Local state of `file` at its planned destination. Read-only.
    pub async fn local_state(
        &self,
        model: &ResolvedModel,
        file: &ModelFile,
        type_override: Option<&str>,
    ) -> Result<LocalState> {
        let planned = self.plan(model, file, type_override)?;
        LocalCandidate::probe(planned.path)
            .await?
            .verify(file.declared_hash.as_ref())
            .await
    }

    /// Installed / Partial / Absent for a whole version. Read-only.
    pub async fn version_status(
        &self,
        model: &ResolvedModel,
        version: &ModelVersion,
        type_override: Option<&str>,
    ) -> Result<VersionStatus> {
        let mut checks = Vec::with_capacity(version.files.len());
        for file in version.files.iter().filter(|f| f.is_downloadable()) {
            checks.push(FileCheck {
                state: self.local_state(model, file, type_override).await?,
                declared_size: file.size_bytes,
            });
        }
        Ok(classify_version(&checks))
    }

    /// Verify and, if needed, transfer one selected file.
    pub async fn fetch(
        &self,
        model: &ResolvedModel,
        version: &ModelVersion,
        file: &ModelFile,
        options: &FetchOptions,
        progress: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<JobOutcome> {
        let url = file
            .download_url
            .clone()
            .ok_or_else(|| CivitdlError::NotDownloadable {
                version: version.label.clone(),
                file: Some(file.file_name.clone()),
            })?;
        let planned = self.plan(model, file, options.type_override.as_deref())?;
        let destination = planned.path;

        let _guard = self.locks.acquire(&destination).await;
        if let Some(dir) = destination.parent() {
            ensure_directory(dir).await?;
        }

        let state = LocalCandidate::probe(destination.clone())
            .await?
            .verify(file.declared_hash.as_ref())
            .await?;

        let replacing = match &state {
            LocalState::Absent => false,
            LocalState::Matching => {
                info!("{} already present and verified", destination.display());
                return Ok(JobOutcome::Skipped {
                    path: destination,
                    reason: SkipReason::Matching,
                });
            }
            LocalState::Unverified { .. } if state.accept_by_size(file.size_bytes) => {
                info!(
                    "{} already present (no digest published, size matches)",
                    destination.display()
                );
                return Ok(JobOutcome::Skipped {
                    path: destination,
                    reason: SkipReason::SizeMatch,
                });
            }
            LocalState::Mismatched { local_hash } => {
                if !options.force {
                    return Err(CivitdlError::ExistingFileMismatch {
                        path: destination,
                        expected: file
                            .declared_hash
                            .as_ref()
                            .map(|h| h.to_string())
                            .unwrap_or_default(),
                        actual: local_hash.clone(),
                    });
                }
                true
            }
            LocalState::Unverified { size } => {
                if !options.force {
                    return Err(CivitdlError::ExistingFileMismatch {
                        path: destination,
                        expected: format!(
                            "{} bytes",
                            file.size_bytes.map(|s| s.to_string()).unwrap_or_else(|| "?".into())
                        ),
                        actual: format!("{} bytes", size),
                    });
                }
                true
            }
        };

        info!(
            "Downloading {} to {} ({})",
            file.file_name,
            destination.display(),
            planned.type_label
        );
        let report = self
            .transfers
            .transfer(
                TransferRequest {
                    url,
                    destination: destination.clone(),
                    expected_size: file.size_bytes,
                    declared_hash: file.declared_hash.clone(),
                    fresh_start: options.force,
                },
                progress,
                &self.cancel,
            )
            .await?;

        Ok(if replacing {
            JobOutcome::Overwritten {
                path: destination,
                bytes_transferred: report.bytes_transferred,
            }
        } else {
            JobOutcome::Downloaded {
                path: destination,
                bytes_transferred: report.bytes_transferred,
            }
        })
    }

    /// Run one job end to end.
    pub async fn run_job(
        &self,
        job: &BatchJob,
        progress: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<JobOutcome> {
        let selected = self.select(job).await?;
        let options = FetchOptions {
            force: job.force,
            type_override: job.model_type.clone(),
        };
        self.fetch(
            &selected.model,
            &selected.version,
            &selected.file,
            &options,
            progress,
        )
        .await
    }
}

/// One-line failure report naming the reference, stage and reason.
pub fn describe_failure(reference: &str, err: &CivitdlError) -> String {
    let stage: ErrorStage = err.stage();
    format!("{} failed during {}: {}", reference, stage, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelDetails;
    use crate::models::{DeclaredHash, HashAlgorithm, ModelReference, ModelSummary};
    use async_trait::async_trait;
    use sha2::{Digest, Sha256};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct FixedCatalog {
        details: ModelDetails,
    }

    #[async_trait]
    impl Catalog for FixedCatalog {
        async fn model(&self, model_id: u64) -> Result<ModelDetails> {
            if model_id == self.details.summary.id {
                Ok(self.details.clone())
            } else {
                Err(CivitdlError::NotFound {
                    reference: model_id.to_string(),
                })
            }
        }

        async fn model_version(&self, version_id: u64) -> Result<ModelVersion> {
            self.details
                .versions
                .iter()
                .find(|v| v.id == version_id)
                .cloned()
                .ok_or_else(|| CivitdlError::NotFound {
                    reference: version_id.to_string(),
                })
        }

        async fn search(&self, _query: &str, _limit: u32) -> Result<Vec<ModelSummary>> {
            Ok(vec![self.details.summary.clone()])
        }
    }

    fn file(name: &str, content: &[u8]) -> ModelFile {
        ModelFile {
            id: 1,
            file_name: name.into(),
            // unroutable: tests below never reach the network
            download_url: Some("http://127.0.0.1:9/file".into()),
            declared_hash: Some(DeclaredHash::new(
                HashAlgorithm::Sha256,
                hex::encode(Sha256::digest(content)),
            )),
            size_bytes: Some(content.len() as u64),
            primary: true,
            kind: None,
        }
    }

    fn downloader(root: &std::path::Path, files: Vec<ModelFile>) -> Downloader {
        downloader_with_type(root, "LORA", files)
    }

    fn downloader_with_type(
        root: &std::path::Path,
        declared_type: &str,
        files: Vec<ModelFile>,
    ) -> Downloader {
        let details = ModelDetails {
            summary: ModelSummary {
                id: 12345,
                name: "Detail Tweaker".into(),
                declared_type: Some(declared_type.into()),
            },
            versions: vec![ModelVersion {
                id: 10,
                label: "v1.0".into(),
                model_id: 12345,
                files,
                created_at: None,
                base_model: None,
                download_count: None,
            }],
        };
        let config = EffectiveConfig {
            api_token: None,
            root_path: root.to_path_buf(),
            output_dir: None,
            placement_overrides: BTreeMap::new(),
        };
        Downloader::new(
            Arc::new(FixedCatalog { details }),
            TransferManager::new(HttpClient::new(None).unwrap()),
            config,
        )
    }

    fn job(reference: u64) -> BatchJob {
        BatchJob::new(ModelReference::Id(reference))
    }

    #[tokio::test]
    async fn test_plan_uses_declared_type() {
        let temp = TempDir::new().unwrap();
        let dl = downloader(temp.path(), vec![file("detail.safetensors", b"x")]);
        let selected = dl.select(&job(12345)).await.unwrap();
        let planned = dl.plan(&selected.model, &selected.file, None).unwrap();
        assert_eq!(
            planned.path,
            temp.path().join("models/loras/detail.safetensors")
        );
        assert!(!planned.fallback);

        let planned = dl
            .plan(&selected.model, &selected.file, Some("VAE"))
            .unwrap();
        assert_eq!(planned.path, temp.path().join("models/vae/detail.safetensors"));
    }

    #[tokio::test]
    async fn test_plan_flags_unmapped_declared_type() {
        let temp = TempDir::new().unwrap();
        let dl = downloader_with_type(
            temp.path(),
            "Wildcardz",
            vec![file("readme.txt", b"x"), file("style_lora.safetensors", b"y")],
        );
        let selected = dl.select(&job(12345)).await.unwrap();
        let version = &selected.version;

        let bucket = dl.plan(&selected.model, &version.files[0], None).unwrap();
        assert_eq!(bucket.path, temp.path().join("models/other/readme.txt"));
        assert_eq!(bucket.type_label, "Other");
        assert!(bucket.fallback);

        let guessed = dl.plan(&selected.model, &version.files[1], None).unwrap();
        assert_eq!(
            guessed.path,
            temp.path().join("models/loras/style_lora.safetensors")
        );
        assert!(guessed.fallback);

        let corrected = dl
            .plan(&selected.model, &version.files[0], Some("Wildcards"))
            .unwrap();
        assert!(!corrected.fallback);
    }

    #[tokio::test]
    async fn test_not_downloadable_names_the_version() {
        let temp = TempDir::new().unwrap();
        let mut gated = file("detail.safetensors", b"x");
        gated.download_url = None;
        let dl = downloader(temp.path(), vec![gated]);
        let selected = dl.select(&job(12345)).await;
        // selection already refuses a lone file without a URL
        let err = selected.unwrap_err();
        assert_eq!(err.kind(), "NotDownloadable");

        let model = dl.resolver().resolve_unique(&ModelReference::Id(12345)).await.unwrap();
        let version = model.versions[0].clone();
        let err = dl
            .fetch(&model, &version, &version.files[0], &FetchOptions::default(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("v1.0"));
        assert!(!err.to_string().contains("Detail Tweaker"));
    }

    #[tokio::test]
    async fn test_matching_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        let dl = downloader(temp.path(), vec![file("detail.safetensors", b"weights")]);
        let dir = temp.path().join("models/loras");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("detail.safetensors"), b"weights").unwrap();

        let outcome = dl.run_job(&job(12345), None).await.unwrap();
        assert!(matches!(
            outcome,
            JobOutcome::Skipped {
                reason: SkipReason::Matching,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_mismatch_without_force_fails() {
        let temp = TempDir::new().unwrap();
        let dl = downloader(temp.path(), vec![file("detail.safetensors", b"weights")]);
        let dir = temp.path().join("models/loras");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("detail.safetensors"), b"tampered").unwrap();

        let err = dl.run_job(&job(12345), None).await.unwrap_err();
        assert_eq!(err.kind(), "ExistingFileMismatch");
        assert_eq!(
            std::fs::read(dir.join("detail.safetensors")).unwrap(),
            b"tampered"
        );
    }

    #[tokio::test]
    async fn test_version_status() {
        let temp = TempDir::new().unwrap();
        let dl = downloader(temp.path(), vec![file("detail.safetensors", b"weights")]);
        let selected = dl.select(&job(12345)).await.unwrap();

        let status = dl
            .version_status(&selected.model, &selected.version, None)
            .await
            .unwrap();
        assert_eq!(status, VersionStatus::Absent);

        let dir = temp.path().join("models/loras");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("detail.safetensors"), b"weights").unwrap();
        let status = dl
            .version_status(&selected.model, &selected.version, None)
            .await
            .unwrap();
        assert_eq!(status, VersionStatus::Installed);
    }

    #[tokio::test]
    async fn test_unknown_model_fails_with_not_found() {
        let temp = TempDir::new().unwrap();
        let dl = downloader(temp.path(), vec![file("detail.safetensors", b"x")]);
        let err = dl.run_job(&job(1), None).await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
        assert!(describe_failure("1", &err).contains("resolution"));
    }
}
