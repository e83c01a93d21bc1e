//! Non-interactive commands: single job, batch file and status query.

use crate::progress::ProgressRenderer;
use anyhow::{anyhow, Result};
use civitdl_core::batch::{BatchOrchestrator, JobContext, ProgressFactory};
use civitdl_core::engine::describe_failure;
use civitdl_core::{
    BatchFile, BatchJob, CivitdlError, Downloader, ErrorStage, HashAlgorithm, ModelReference,
    ModelVersion,
};
use console::style;
use indicatif::HumanBytes;
use std::sync::Arc;

/// Process exit codes.
pub mod exit {
    pub const SUCCESS: u8 = 0;
    pub const JOB_FAILED: u8 = 1;
    pub const USAGE: u8 = 2;
}

/// Per-invocation job defaults taken from flags.
#[derive(Debug, Clone, Default)]
pub struct JobDefaults {
    pub version: Option<String>,
    pub file: Option<String>,
    pub model_type: Option<String>,
    pub force: bool,
    pub strict: bool,
}

impl JobDefaults {
    /// Build a job for `reference` with these defaults.
    pub fn job(&self, reference: ModelReference) -> BatchJob {
        let mut job = BatchJob::new(reference)
            .with_force(self.force)
            .with_strict_selection(self.strict);
        if let Some(version) = &self.version {
            job = job.with_version(version.clone());
        }
        if let Some(file) = &self.file {
            job = job.with_file(civitdl_core::FileSelector::parse(file));
        }
        if let Some(model_type) = &self.model_type {
            job = job.with_model_type(model_type.clone());
        }
        job
    }

    /// Layer flags over a batch entry; the entry's own fields win.
    pub fn apply_to(&self, mut job: BatchJob) -> BatchJob {
        job.force |= self.force;
        job.strict_selection |= self.strict;
        if job.model_type.is_none() {
            job.model_type = self.model_type.clone();
        }
        job
    }
}

pub fn parse_reference(input: &str) -> Result<ModelReference> {
    ModelReference::parse(input).ok_or_else(|| anyhow!("Empty model reference"))
}

/// Exit code for a single job that failed with `err`.
pub fn failure_code(err: &CivitdlError) -> u8 {
    match err.stage() {
        ErrorStage::Configuration => exit::USAGE,
        _ => exit::JOB_FAILED,
    }
}

pub fn report_failure(reference: &str, err: &CivitdlError) {
    eprintln!("{} {}", style("error:").red().bold(), describe_failure(reference, err));
    if matches!(err, CivitdlError::ExistingFileMismatch { .. }) {
        eprintln!("Re-run with --force to replace the local file.");
    }
}

/// Download one reference without prompting.
pub async fn run_single(
    downloader: &Downloader,
    job: BatchJob,
    renderer: &ProgressRenderer,
) -> Result<u8> {
    let progress = renderer.track(&job.label);
    match downloader.run_job(&job, Some(progress)).await {
        Ok(outcome) => {
            renderer.println(outcome.to_string());
            Ok(exit::SUCCESS)
        }
        Err(e) => {
            report_failure(&job.label, &e);
            Ok(failure_code(&e))
        }
    }
}

/// Run every entry of a batch file and print the summary.
pub async fn run_batch(
    downloader: Downloader,
    batch: &BatchFile,
    defaults: &JobDefaults,
    concurrency: usize,
    renderer: &ProgressRenderer,
) -> Result<u8> {
    let jobs: Vec<BatchJob> = batch
        .jobs()?
        .into_iter()
        .map(|job| defaults.apply_to(job))
        .collect();
    if jobs.is_empty() {
        eprintln!("Batch file lists no models");
        return Ok(exit::SUCCESS);
    }

    let bars = renderer.clone();
    let factory: ProgressFactory = Arc::new(move |ctx: &JobContext| {
        Some(bars.track(&format!("[{}/{}] {}", ctx.index + 1, ctx.total, ctx.label)))
    });

    let summary = BatchOrchestrator::new(downloader)
        .with_concurrency(concurrency)
        .with_progress(factory)
        .run(jobs)
        .await;

    renderer.println(summary.to_string());
    Ok(if summary.exit_code() == 0 {
        exit::SUCCESS
    } else {
        exit::JOB_FAILED
    })
}

/// List every version of a model with its local status. Read-only.
pub async fn status(
    downloader: &Downloader,
    reference: &str,
    model_type: Option<&str>,
) -> Result<u8> {
    let parsed = parse_reference(reference)?;
    let model = match downloader.resolver().resolve_unique(&parsed).await {
        Ok(model) => model,
        Err(e) => {
            report_failure(reference, &e);
            return Ok(failure_code(&e));
        }
    };

    println!(
        "{} (#{}, {})",
        style(&model.summary.name).bold(),
        model.summary.id,
        model.summary.declared_type.as_deref().unwrap_or("unknown type")
    );
    for version in &model.versions {
        match downloader.version_status(&model, version, model_type).await {
            Ok(status) => println!("  {:<10} {}", status.to_string(), describe_version(version)),
            Err(e) => println!("  {:<10} {} ({})", "?", describe_version(version), e),
        }
    }
    Ok(exit::SUCCESS)
}

/// "v2.2 [#123] 1 file, 144.00 MiB, SD 1.5, 10 downloads"
pub fn describe_version(version: &ModelVersion) -> String {
    let mut parts = vec![format!(
        "{} file{}",
        version.files.len(),
        if version.files.len() == 1 { "" } else { "s" }
    )];
    if let Some(size) = version.total_size_bytes() {
        parts.push(HumanBytes(size).to_string());
    }
    if let Some(base) = &version.base_model {
        parts.push(base.clone());
    }
    if let Some(count) = version.download_count {
        parts.push(format!("{count} downloads"));
    }
    format!("{} [#{}] {}", version.label, version.id, parts.join(", "))
}

/// "name.safetensors (144.00 MiB, SHA256, primary)"
pub fn describe_file(file: &civitdl_core::ModelFile) -> String {
    let mut parts = Vec::new();
    if let Some(size) = file.size_bytes {
        parts.push(HumanBytes(size).to_string());
    }
    match file.declared_hash.as_ref().map(|h| h.algorithm) {
        Some(HashAlgorithm::Sha256) => parts.push("SHA256".into()),
        Some(HashAlgorithm::Blake3) => parts.push("BLAKE3".into()),
        Some(HashAlgorithm::AutoV2) => parts.push("AutoV2".into()),
        None => parts.push("no digest".into()),
    }
    if file.primary {
        parts.push("primary".into());
    }
    if !file.is_downloadable() {
        parts.push("not downloadable".into());
    }
    format!("{} ({})", file.file_name, parts.join(", "))
}
