use serde::Deserialize;
use std::{collections::HashMap, fs, io, path::Path, path::PathBuf};
use thiserror::Error;

pub const MODEL_FILE: &str = "model.onnx";
pub const CLASSIFIER_CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let contents = fs::read_to_string(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// The slice of the exported model's `config.json` we care about: the mapping
/// from output index to human-readable label. Keys are strings because that is
/// how the export serializes them.
#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub id2label: HashMap<String, String>,
}

impl ClassifierConfig {
    pub fn load(artifact_dir: &Path) -> Result<Self, ArtifactError> {
        load_json(&artifact_dir.join(CLASSIFIER_CONFIG_FILE))
    }

    pub fn label_for(&self, class_id: usize) -> Option<&str> {
        self.id2label.get(&class_id.to_string()).map(String::as_str)
    }
}

/// Normalization constants and input size from `preprocessor_config.json`.
/// Defaults match the ViT image processor (224x224, mean/std 0.5).
#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessorConfig {
    #[serde(default = "default_mean_std")]
    pub image_mean: [f32; 3],
    #[serde(default = "default_mean_std")]
    pub image_std: [f32; 3],
    #[serde(default)]
    pub size: ImageSize,
}

fn default_mean_std() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

impl PreprocessorConfig {
    pub fn load(artifact_dir: &Path) -> Result<Self, ArtifactError> {
        load_json(&artifact_dir.join(PREPROCESSOR_CONFIG_FILE))
    }
}

// Older exports write `"size": 224`, newer ones `"size": {"height": .., "width": ..}`.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(untagged)]
pub enum ImageSize {
    Uniform(u32),
    Explicit { height: u32, width: u32 },
}

impl Default for ImageSize {
    fn default() -> Self {
        ImageSize::Uniform(224)
    }
}

impl ImageSize {
    pub fn height(&self) -> u32 {
        match self {
            ImageSize::Uniform(s) => *s,
            ImageSize::Explicit { height, .. } => *height,
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            ImageSize::Uniform(s) => *s,
            ImageSize::Explicit { width, .. } => *width,
        }
    }
}
