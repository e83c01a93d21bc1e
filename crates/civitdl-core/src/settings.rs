//! Layered runtime configuration.
//!
//! Four sources feed one [`EffectiveConfig`]: CLI flags, environment,
//! the batch file's `config` block and the persisted config file. Each field
//! is resolved on its own, highest layer first; placement overrides merge
//! per label. Nothing outside this module reads the environment or the
//! config file.

use crate::config::PathsConfig;
use crate::{CivitdlError, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, info};

/// One configuration source. Every field is optional.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    #[serde(alias = "api_key", skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(alias = "comfyui_path", skip_serializing_if = "Option::is_none")]
    pub root_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Type label → subdirectory relative to the root.
    #[serde(alias = "paths", skip_serializing_if = "BTreeMap::is_empty")]
    pub placement_overrides: BTreeMap<String, String>,
}

impl std::fmt::Debug for ConfigLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLayer")
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("root_path", &self.root_path)
            .field("output_dir", &self.output_dir)
            .field("placement_overrides", &self.placement_overrides)
            .finish()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ConfigLayer {
    /// Build the environment layer from an arbitrary lookup.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            api_token: non_blank(lookup(PathsConfig::ENV_API_TOKEN)),
            root_path: non_blank(lookup(PathsConfig::ENV_ROOT_PATH)).map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Build the environment layer from the process environment.
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The merged, read-only configuration for one run.
#[derive(Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub api_token: Option<String>,
    pub root_path: PathBuf,
    /// When set, files are written here instead of the placement directory.
    pub output_dir: Option<PathBuf>,
    pub placement_overrides: BTreeMap<String, String>,
}

impl std::fmt::Debug for EffectiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectiveConfig")
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("root_path", &self.root_path)
            .field("output_dir", &self.output_dir)
            .field("placement_overrides", &self.placement_overrides)
            .finish()
    }
}

impl EffectiveConfig {
    /// Merge layers, CLI > environment > batch file > persisted.
    pub fn merge(
        cli: &ConfigLayer,
        env: &ConfigLayer,
        batch: &ConfigLayer,
        persisted: &ConfigLayer,
    ) -> Self {
        let layers = [cli, env, batch, persisted];

        let api_token = layers
            .iter()
            .find_map(|l| non_blank(l.api_token.clone()));
        let root_path = layers
            .iter()
            .find_map(|l| l.root_path.clone())
            .unwrap_or_else(default_root_path);
        let output_dir = layers.iter().find_map(|l| l.output_dir.clone());

        // lowest layer first so higher layers overwrite per label
        let mut overrides: BTreeMap<String, (String, String)> = BTreeMap::new();
        for layer in layers.iter().rev() {
            for (label, subdir) in &layer.placement_overrides {
                overrides.insert(label.to_lowercase(), (label.clone(), subdir.clone()));
            }
        }
        let placement_overrides = overrides.into_values().collect();

        let config = Self {
            api_token,
            root_path,
            output_dir,
            placement_overrides,
        };
        debug!("Effective config: {:?}", config);
        config
    }

    /// Config from a single layer, for callers without batch/persisted input.
    pub fn from_layer(layer: &ConfigLayer) -> Self {
        let empty = ConfigLayer::default();
        Self::merge(layer, &empty, &empty, &empty)
    }
}

/// `$HOME/ComfyUI`, or `./ComfyUI` when there is no home directory.
pub fn default_root_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PathsConfig::DEFAULT_ROOT_DIR_NAME)
}

/// The persisted key-value config file.
#[derive(Debug, Clone)]
pub struct PersistedConfig {
    path: PathBuf,
}

impl PersistedConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/civitdl/config.json`.
    pub fn default_location() -> Result<Self> {
        let base = dirs::config_dir().ok_or_else(|| CivitdlError::Config {
            message: "could not determine the user config directory".into(),
        })?;
        Ok(Self::new(
            base.join(PathsConfig::CONFIG_DIR_NAME)
                .join(PathsConfig::CONFIG_FILE_NAME),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the stored layer; a missing file is an empty layer.
    pub fn load(&self) -> Result<ConfigLayer> {
        Ok(atomic_read_json(&self.path)?.unwrap_or_default())
    }

    pub fn save(&self, layer: &ConfigLayer) -> Result<()> {
        atomic_write_json(&self.path, layer)?;
        info!("Saved configuration to {}", self.path.display());
        Ok(())
    }

    /// Merge `update` over the stored values and save.
    pub fn update(&self, update: impl FnOnce(&mut ConfigLayer)) -> Result<ConfigLayer> {
        let mut layer = self.load()?;
        update(&mut layer);
        self.save(&layer)?;
        Ok(layer)
    }

    /// Delete the stored config. Returns whether a file was removed.
    pub fn reset(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed configuration {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CivitdlError::io_with_path(e, &self.path)),
        }
    }
}

/// Read and parse a JSON file; `None` when it does not exist.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CivitdlError::Io {
                message: format!("Failed to open {}", path.display()),
                path: Some(path.to_path_buf()),
                source: Some(e),
            })
        }
    };

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| CivitdlError::Io {
            message: format!("Failed to read {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        })?;

    let data = serde_json::from_str(&contents).map_err(|e| CivitdlError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;
    Ok(Some(data))
}

/// Write JSON via a temp file, fsync and rename.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CivitdlError::Io {
            message: format!("Failed to create directory {}", parent.display()),
            path: Some(parent.to_path_buf()),
            source: Some(e),
        })?;
    }

    let temp_path = path.with_extension(format!("json.{}.tmp", process::id()));
    let serialized = serde_json::to_string_pretty(data).map_err(|e| CivitdlError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| CivitdlError::io_with_path(e, &temp_path))?;
        file.write_all(serialized.as_bytes())
            .map_err(|e| CivitdlError::io_with_path(e, &temp_path))?;
        file.sync_all()
            .map_err(|e| CivitdlError::io_with_path(e, &temp_path))?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        CivitdlError::Io {
            message: format!("Failed to rename temp file to {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }
    })
}
