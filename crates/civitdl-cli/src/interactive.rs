//! Interactive shell: prompts where batch mode would fail on ambiguity.

use crate::commands::{describe_file, describe_version, exit, parse_reference, report_failure, JobDefaults};
use crate::input;
use crate::progress::ProgressRenderer;
use anyhow::{bail, Result};
use civitdl_core::catalog::select_file;
use civitdl_core::{
    CivitdlError, Downloader, FetchOptions, FileSelection, FileSelector, JobOutcome,
    ModelReference, ModelVersion, Resolution, ResolvedModel,
};
use console::style;

/// Prompt for references until the user stops. Returns the exit code.
pub async fn run(
    downloader: &Downloader,
    defaults: &JobDefaults,
    first: Option<String>,
    renderer: &ProgressRenderer,
) -> Result<u8> {
    let mut pending = first;
    let mut any_failed = false;

    loop {
        let reference = match pending.take() {
            Some(reference) => reference,
            None => input::prompt_string("Model id, URL or search term (Enter to quit)")?,
        };
        if reference.is_empty() {
            break;
        }

        match download_one(downloader, defaults, &reference, renderer).await {
            Ok(Some(outcome)) => renderer.println(outcome.to_string()),
            Ok(None) => eprintln!("Cancelled."),
            Err(e) => {
                any_failed = true;
                match e.downcast_ref::<CivitdlError>() {
                    Some(core) => report_failure(&reference, core),
                    None => eprintln!("{} {:#}", style("error:").red().bold(), e),
                }
            }
        }

        if downloader.cancellation().is_cancelled()
            || !input::prompt_confirmation("Download another model?", false)?
        {
            break;
        }
    }

    Ok(if any_failed {
        exit::JOB_FAILED
    } else {
        exit::SUCCESS
    })
}

/// One pass through resolve, version, file and fetch. `None` when the user backs out.
async fn download_one(
    downloader: &Downloader,
    defaults: &JobDefaults,
    reference: &str,
    renderer: &ProgressRenderer,
) -> Result<Option<JobOutcome>> {
    let parsed = parse_reference(reference)?;
    let Some(model) = resolve(downloader, &parsed).await? else {
        return Ok(None);
    };

    let Some(version) = choose_version(downloader, defaults, &model).await? else {
        return Ok(None);
    };
    let Some(file) = choose_file(defaults, &model, &version)? else {
        return Ok(None);
    };

    let mut options = FetchOptions {
        force: defaults.force,
        type_override: defaults.model_type.clone(),
    };
    let label = file.file_name.clone();
    match downloader
        .fetch(&model, &version, &file, &options, Some(renderer.track(&label)))
        .await
    {
        Ok(outcome) => Ok(Some(outcome)),
        Err(CivitdlError::ExistingFileMismatch {
            path,
            expected,
            actual,
        }) => {
            eprintln!(
                "{} exists but does not match (expected {}, found {}).",
                path.display(),
                expected,
                actual
            );
            if !input::prompt_confirmation("Overwrite it?", false)? {
                return Ok(None);
            }
            options.force = true;
            let outcome = downloader
                .fetch(&model, &version, &file, &options, Some(renderer.track(&label)))
                .await?;
            Ok(Some(outcome))
        }
        Err(e) => Err(e.into()),
    }
}

async fn resolve(downloader: &Downloader, reference: &ModelReference) -> Result<Option<ResolvedModel>> {
    let resolver = downloader.resolver();
    match resolver.resolve(reference).await? {
        Resolution::Resolved(model) => Ok(Some(model)),
        Resolution::Candidates(candidates) => {
            let options: Vec<String> = candidates
                .iter()
                .map(|c| {
                    format!(
                        "{} [#{}] {}",
                        c.name,
                        c.id,
                        c.declared_type.as_deref().unwrap_or("")
                    )
                })
                .collect();
            let Some(choice) = input::pick("Matching models", &options)? else {
                return Ok(None);
            };
            let model = resolver
                .resolve_unique(&ModelReference::Id(candidates[choice].id))
                .await?;
            Ok(Some(model))
        }
    }
}

async fn choose_version(
    downloader: &Downloader,
    defaults: &JobDefaults,
    model: &ResolvedModel,
) -> Result<Option<ModelVersion>> {
    // flags and pinned URLs skip the picker
    if defaults.version.is_some() || model.pinned_version.is_some() {
        return Ok(Some(model.select_version(defaults.version.as_deref())?.clone()));
    }
    if model.versions.len() == 1 {
        return Ok(Some(model.versions[0].clone()));
    }

    let mut options = Vec::with_capacity(model.versions.len());
    for version in &model.versions {
        let status = downloader
            .version_status(model, version, defaults.model_type.as_deref())
            .await?;
        options.push(format!("{}  {}", describe_version(version), style(status).dim()));
    }
    let title = format!("Versions of {} (newest first)", model.summary.name);
    Ok(input::pick(&title, &options)?.map(|i| model.versions[i].clone()))
}

fn choose_file(
    defaults: &JobDefaults,
    model: &ResolvedModel,
    version: &ModelVersion,
) -> Result<Option<civitdl_core::ModelFile>> {
    let selector = match &defaults.file {
        Some(file) => Some(FileSelector::parse(file)),
        None => model
            .pinned_file
            .filter(|_| model.pinned_version == Some(version.id))
            .map(FileSelector::Id),
    };

    match select_file(version, selector.as_ref())? {
        FileSelection::Chosen { file, .. } => Ok(Some(file.clone())),
        FileSelection::Ambiguous(files) => {
            let downloadable: Vec<_> = files.iter().filter(|f| f.is_downloadable()).collect();
            if downloadable.is_empty() {
                bail!("Version {} has no downloadable files", version.label);
            }
            let options: Vec<String> = downloadable.iter().map(|f| describe_file(f)).collect();
            let title = format!("Files of {}", version.label);
            Ok(input::pick(&title, &options)?.map(|i| downloadable[i].clone()))
        }
    }
}
