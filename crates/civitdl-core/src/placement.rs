//! Folder-taxonomy placement.
//!
//! Maps a model-type label to a subdirectory under the installation root.
//! Labels are matched case-insensitively against a fixed default table;
//! configured overrides shadow only their own label. Unknown labels land in
//! the `models/other` bucket and the fallback is reported, never an error.

use crate::{CivitdlError, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Label used for the fallback bucket.
pub const FALLBACK_TYPE: &str = "Other";

const FALLBACK_SUBDIR: &str = "models/other";

/// Default type → subdirectory table.
const DEFAULT_RULES: &[(&str, &str)] = &[
    ("Checkpoint", "models/checkpoints"),
    ("LORA", "models/loras"),
    ("LoCon", "models/loras"),
    ("DoRA", "models/loras"),
    ("Controlnet", "models/controlnet"),
    ("Upscaler", "models/upscale_models"),
    ("VAE", "models/vae"),
    ("TextualInversion", "models/embeddings"),
    ("Embedding", "models/embeddings"),
    ("Hypernetwork", "models/hypernetworks"),
    ("AestheticGradient", "models/classifiers"),
    ("Poses", "poses"),
    ("Wildcards", "wildcards"),
    ("Workflows", "workflows"),
    ("Workflow", "workflows"),
    ("MotionModule", "models/motion_module"),
    (FALLBACK_TYPE, FALLBACK_SUBDIR),
];

/// Known type labels in table order, for CLI choices and help text.
pub fn known_type_labels() -> impl Iterator<Item = &'static str> {
    DEFAULT_RULES.iter().map(|(label, _)| *label)
}

/// Where a file of a given type goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// `root / subdirectory`.
    pub directory: PathBuf,
    pub subdirectory: PathBuf,
    /// True when the label was unknown and the fallback bucket was used.
    pub fallback: bool,
}

impl Placement {
    pub fn file_path(&self, file_name: &str) -> Result<PathBuf> {
        Ok(self.directory.join(safe_file_name(file_name)?))
    }
}

/// Type-label → directory mapper for one installation root.
#[derive(Debug, Clone)]
pub struct PlacementMapper {
    root: PathBuf,
    /// Keyed by lowercase label.
    overrides: HashMap<String, PathBuf>,
}

impl PlacementMapper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            overrides: HashMap::new(),
        }
    }

    /// Apply per-label overrides. Later calls shadow earlier ones.
    ///
    /// Overrides that would leave the root are dropped with a warning and the
    /// label keeps its default.
    pub fn with_overrides<'a>(
        mut self,
        overrides: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        for (label, subdir) in overrides {
            match relative_subdirectory(subdir) {
                Ok(subdir) => {
                    self.overrides.insert(label.trim().to_lowercase(), subdir);
                }
                Err(e) => warn!("Ignoring placement override for '{}': {}", label, e),
            }
        }
        self
    }

    pub fn from_config(root: impl Into<PathBuf>, overrides: &BTreeMap<String, String>) -> Self {
        Self::new(root).with_overrides(overrides)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a type label to its subdirectory.
    pub fn subdirectory(&self, type_label: &str) -> (PathBuf, bool) {
        let key = type_label.trim().to_lowercase();
        if let Some(subdir) = self.overrides.get(&key) {
            return (subdir.clone(), false);
        }
        match DEFAULT_RULES
            .iter()
            .find(|(label, _)| label.to_lowercase() == key)
        {
            Some((_, subdir)) => (PathBuf::from(subdir), false),
            None => (PathBuf::from(FALLBACK_SUBDIR), true),
        }
    }

    /// Resolve a type label to its directory under the root.
    pub fn placement(&self, type_label: &str) -> Placement {
        let (subdirectory, fallback) = self.subdirectory(type_label);
        if fallback {
            warn!(
                "Unknown model type '{}', placing in {} (use --model-type to correct)",
                type_label,
                subdirectory.display()
            );
        }
        Placement {
            directory: self.root.join(&subdirectory),
            subdirectory,
            fallback,
        }
    }

    /// Whether a label is mapped by an override or the default table.
    pub fn is_known(&self, type_label: &str) -> bool {
        !self.subdirectory(type_label).1
    }
}

/// Create the directory that will hold a file. Pre-existing is fine.
pub async fn ensure_directory(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CivitdlError::io_with_path(e, dir))?;
    debug!("Ensured directory {}", dir.display());
    Ok(())
}

/// Validate an override subdirectory: relative, no `..`, not empty.
pub fn relative_subdirectory(subdir: &str) -> Result<PathBuf> {
    let trimmed = subdir.trim();
    let path = PathBuf::from(trimmed);
    let escapes = path.components().any(|c| {
        !matches!(c, Component::Normal(_) | Component::CurDir)
    });
    if trimmed.is_empty() || escapes {
        return Err(CivitdlError::Config {
            message: format!("placement path '{}' must be relative to the root", subdir),
        });
    }
    Ok(path)
}

/// Reject file names that would escape the target directory.
pub fn safe_file_name(file_name: &str) -> Result<&str> {
    let trimmed = file_name.trim();
    let is_plain = !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed.contains(['/', '\\'])
        && Path::new(trimmed).file_name().is_some();
    if is_plain {
        Ok(trimmed)
    } else {
        Err(CivitdlError::Other(format!(
            "Refusing unsafe file name '{}'",
            file_name
        )))
    }
}

/// Guess a type label from a file name.
pub fn detect_model_type(file_name: &str) -> &'static str {
    let name = file_name.to_lowercase();

    if name.ends_with(".vae.pt") || name.ends_with(".vae.safetensors") {
        return "VAE";
    }

    let extension = Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension {
        "safetensors" | "ckpt" => {
            if name.contains("lora") {
                "LORA"
            } else if name.contains("locon") {
                "LoCon"
            } else if name.contains("vae") {
                "VAE"
            } else if name.contains("control") {
                "Controlnet"
            } else {
                "Checkpoint"
            }
        }
        "pt" | "pth" => {
            if name.contains("upscale") || name.contains("esrgan") {
                "Upscaler"
            } else {
                FALLBACK_TYPE
            }
        }
        "bin" => "Embedding",
        "json" if name.contains("workflow") => "Workflows",
        "json" if name.contains("pose") => "Poses",
        "pose" => "Poses",
        _ => FALLBACK_TYPE,
    }
}

/// Type label chosen for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeChoice {
    pub label: String,
    /// The declared type was not mapped and the label is a guess, or the
    /// fallback bucket was used.
    pub fallback: bool,
}

/// Pick the type label for placement.
///
/// An explicit override wins. The catalog's declared type is used when the
/// mapper knows it; otherwise the file name heuristic decides and the choice
/// is flagged so callers can surface it.
pub fn choose_type_label(
    mapper: &PlacementMapper,
    explicit: Option<&str>,
    declared: Option<&str>,
    file_name: &str,
) -> TypeChoice {
    if let Some(explicit) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return TypeChoice {
            label: explicit.to_string(),
            fallback: !mapper.is_known(explicit),
        };
    }
    let declared = declared.map(str::trim).filter(|s| !s.is_empty());
    if let Some(declared) = declared.filter(|d| mapper.is_known(d)) {
        return TypeChoice {
            label: declared.to_string(),
            fallback: false,
        };
    }

    let detected = detect_model_type(file_name);
    let fallback = declared.is_some() || detected == FALLBACK_TYPE;
    debug!(
        "Declared type {:?} not mapped, detected '{}' from {}",
        declared, detected, file_name
    );
    TypeChoice {
        label: detected.to_string(),
        fallback,
    }
}
