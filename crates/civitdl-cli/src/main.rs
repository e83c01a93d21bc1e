//! civitdl - download CivitAI models into a ComfyUI installation.
//!
//! Thin shell over `civitdl-core`: parses flags, layers configuration,
//! renders progress and prompts when run interactively.

mod bootstrap;
mod commands;
mod input;
mod interactive;
mod progress;

use anyhow::Result;
use bootstrap::Bootstrap;
use civitdl_core::{BatchFile, ConfigLayer};
use clap::{Parser, Subcommand};
use commands::{exit, JobDefaults};
use progress::ProgressRenderer;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "civitdl")]
#[command(about = "Download CivitAI models into the right ComfyUI folder")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Model id, model page URL, download URL or search term
    reference: Option<String>,

    /// Write directly into this directory instead of the mapped folder
    #[arg(short = 'o', long = "output-path", global = true)]
    output_path: Option<PathBuf>,

    /// ComfyUI root (overrides COMFYUI_PATH and the saved config)
    #[arg(short = 'r', long = "root-path", global = true)]
    root_path: Option<PathBuf>,

    /// CivitAI API token (overrides CIVITAI_API_TOKEN and the saved config)
    #[arg(short, long, global = true)]
    token: Option<String>,

    /// Replace a local file whose digest does not match
    #[arg(short, long)]
    force: bool,

    /// Override the model type used for placement (e.g. LORA, Checkpoint)
    #[arg(long = "model-type", global = true)]
    model_type: Option<String>,

    /// Version label or id to download (default: latest)
    #[arg(short = 'v', long)]
    version: Option<String>,

    /// File name or id within the version
    #[arg(long)]
    file: Option<String>,

    /// Batch file listing models to download
    #[arg(short, long, conflicts_with = "reference")]
    batch: Option<PathBuf>,

    /// Batch jobs to run at once
    #[arg(long, default_value_t = 1)]
    jobs: usize,

    /// Fail instead of picking a default when a version has several files
    #[arg(long)]
    strict: bool,

    /// Delete the saved configuration before running
    #[arg(long = "reset-config")]
    reset_config: bool,

    /// Prompt for models, versions and files
    #[arg(short, long)]
    interactive: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which versions of a model are installed
    Status {
        /// Model id, model page URL or search term
        reference: String,
    },
}

impl Args {
    fn cli_layer(&self) -> ConfigLayer {
        ConfigLayer {
            api_token: self.token.clone(),
            root_path: self.root_path.clone(),
            output_dir: self.output_path.clone(),
            ..ConfigLayer::default()
        }
    }

    fn job_defaults(&self) -> JobDefaults {
        JobDefaults {
            version: self.version.clone(),
            file: self.file.clone(),
            model_type: self.model_type.clone(),
            force: self.force,
            strict: self.strict,
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug {
        "debug"
    } else {
        "warn,civitdl=info,civitdl_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            ExitCode::from(exit::USAGE)
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    let boot = Bootstrap::new(args.cli_layer(), args.reset_config)?;
    let renderer = ProgressRenderer::new();
    let defaults = args.job_defaults();

    if let Some(Command::Status { reference }) = &args.command {
        let config = boot.effective_config(None).await?;
        let downloader = bootstrap::downloader(config)?;
        return commands::status(&downloader, reference, args.model_type.as_deref()).await;
    }

    if let Some(path) = &args.batch {
        let batch = BatchFile::load(path)?;
        debug!("Loaded {} batch entries from {}", batch.len(), path.display());
        let config = boot.effective_config(Some(&batch.config.layer)).await?;
        let downloader = bootstrap::downloader(config)?;
        return commands::run_batch(downloader, &batch, &defaults, args.jobs, &renderer).await;
    }

    // `--reset-config` on its own only resets
    if args.reset_config && args.reference.is_none() && !args.interactive {
        return Ok(exit::SUCCESS);
    }
    let interactive = args.interactive || args.reference.is_none();
    if interactive && !input::attended() {
        anyhow::bail!("No model reference given and no terminal to prompt on");
    }

    let config = boot.effective_config(None).await?;
    let downloader = bootstrap::downloader(config)?;
    if interactive {
        return interactive::run(&downloader, &defaults, args.reference.clone(), &renderer).await;
    }

    let reference = args.reference.as_deref().unwrap_or_default();
    let job = defaults.job(commands::parse_reference(reference)?);
    commands::run_single(&downloader, job, &renderer).await
}
