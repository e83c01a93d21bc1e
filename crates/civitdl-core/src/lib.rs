//! civitdl core - headless engine for fetching CivitAI models into a ComfyUI tree.
//!
//! Resolves a model reference (id, URL or search term) against the catalog,
//! selects a version and file, maps the model type to a folder, skips files
//! already present with the right digest, and otherwise performs a
//! resumable, verified transfer. A batch orchestrator runs many such jobs
//! with per-job failure isolation.
//!
//! # Example
//!
//! ```rust,ignore
//! use civitdl_core::{BatchJob, ConfigLayer, Downloader, EffectiveConfig, ModelReference};
//!
//! #[tokio::main]
//! async fn main() -> civitdl_core::Result<()> {
//!     let config = EffectiveConfig::merge(
//!         &ConfigLayer::default(),
//!         &ConfigLayer::from_env(),
//!         &ConfigLayer::default(),
//!         &ConfigLayer::default(),
//!     );
//!     let downloader = Downloader::from_config(config)?;
//!
//!     let job = BatchJob::new(ModelReference::Id(12345)).with_version("latest");
//!     let outcome = downloader.run_job(&job, None).await?;
//!     println!("{}", outcome);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod models;
pub mod network;
pub mod placement;
pub mod settings;
pub mod transfer;

pub use batch::{BatchFile, BatchJob, BatchOrchestrator, BatchSummary, JobReport};
pub use cancel::{CancellationToken, CancelledError};
pub use catalog::{
    Catalog, CivitaiClient, FileSelection, FileSelector, ReferenceResolver, Resolution,
    ResolvedModel, SelectionPolicy,
};
pub use engine::{Downloader, FetchOptions, JobOutcome, SkipReason};
pub use error::{CivitdlError, ErrorStage, Result};
pub use integrity::{LocalState, VersionStatus};
pub use models::{
    DeclaredHash, HashAlgorithm, ModelFile, ModelReference, ModelSummary, ModelVersion,
};
pub use network::HttpClient;
pub use placement::PlacementMapper;
pub use settings::{ConfigLayer, EffectiveConfig, PersistedConfig};
pub use transfer::{DownloadProgress, TransferManager, TransferState};
