//! Startup: persisted config, layer merge and first-run token setup.

use crate::input;
use anyhow::{Context, Result};
use civitdl_core::{
    CancellationToken, CivitaiClient, ConfigLayer, Downloader, EffectiveConfig, HttpClient,
    PersistedConfig,
};
use console::style;
use tracing::{info, warn};

/// Config sources gathered before the first job runs.
pub struct Bootstrap {
    pub persisted: PersistedConfig,
    pub cli: ConfigLayer,
}

impl Bootstrap {
    /// Locate the persisted config, deleting it first when `reset` is set.
    pub fn new(cli: ConfigLayer, reset: bool) -> Result<Self> {
        let persisted =
            PersistedConfig::default_location().context("Cannot locate the config directory")?;
        if reset {
            if persisted.reset()? {
                eprintln!("Removed {}", persisted.path().display());
            } else {
                eprintln!("No saved configuration at {}", persisted.path().display());
            }
        }
        Ok(Self { persisted, cli })
    }

    /// Merge CLI, environment, batch and persisted layers.
    ///
    /// When no layer has a token and someone is at the terminal, ask for one
    /// and save it.
    pub async fn effective_config(&self, batch: Option<&ConfigLayer>) -> Result<EffectiveConfig> {
        let env = ConfigLayer::from_env();
        let saved = self.persisted.load()?;
        let empty = ConfigLayer::default();
        let mut config =
            EffectiveConfig::merge(&self.cli, &env, batch.unwrap_or(&empty), &saved);

        if config.api_token.is_none() && input::attended() {
            config.api_token = self.first_run_token().await?;
        }
        Ok(config)
    }

    async fn first_run_token(&self) -> Result<Option<String>> {
        eprintln!(
            "{}",
            style("No CivitAI API token configured. Some models require one.").yellow()
        );
        loop {
            let token = input::prompt_secret("API token (Enter to continue without)")?;
            if token.is_empty() {
                return Ok(None);
            }

            let client = CivitaiClient::new(HttpClient::new(Some(token.clone()))?);
            match client.validate_token().await {
                Ok(true) => {
                    self.persisted
                        .update(|layer| layer.api_token = Some(token.clone()))?;
                    info!("Saved API token to {}", self.persisted.path().display());
                    return Ok(Some(token));
                }
                Ok(false) => eprintln!("{}", style("The catalog rejected that token.").red()),
                Err(e) => {
                    warn!("Could not validate token: {}", e);
                    if input::prompt_confirmation("Use it anyway without saving?", false)? {
                        return Ok(Some(token));
                    }
                }
            }
        }
    }
}

/// A downloader that interrupts its transfers on Ctrl-C.
pub fn downloader(config: EffectiveConfig) -> Result<Downloader> {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, keeping partial downloads for resume");
            handle.cancel();
        }
    });
    Ok(Downloader::from_config(config)?.with_cancellation(cancel))
}
