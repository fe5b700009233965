//! Error types for inference and training.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while loading a model or classifying an image.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// No model is loaded; classification cannot run until a reload succeeds.
    #[error("model unavailable: {reason}")]
    ModelUnavailable { reason: String },
    /// The image could not be opened or decoded.
    #[error("cannot load image {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    /// The model file or its weights are missing or malformed.
    #[error("invalid model {}: {message}", path.display())]
    Model { path: PathBuf, message: String },
    /// Manifest labels do not match the width of the output layer.
    #[error("model has {outputs} outputs but {labels} labels")]
    LabelMismatch { outputs: usize, labels: usize },
    #[error("manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClassifyError {
    /// Text shown to the user in place of a label.
    pub fn to_result_text(&self) -> String {
        format!("Error: {self}")
    }
}

/// Failure while reading a training or validation image folder.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("path does not exist: {}", .0.display())]
    Missing(PathBuf),
    #[error("path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("no class directories in {}", .0.display())]
    NoClasses(PathBuf),
    #[error("no images found in {}", .0.display())]
    Empty(PathBuf),
    #[error("cannot decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

/// Failure during a training run.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("training classes {train:?} differ from validation classes {validation:?}")]
    ClassMismatch {
        train: Vec<String>,
        validation: Vec<String>,
    },
    #[error("expected {expected} classes, found {found:?}")]
    ClassCount { expected: usize, found: Vec<String> },
    #[error("batch size must be at least 1")]
    EmptyBatch,
    #[error("backbone weights {}: {message}", path.display())]
    Backbone { path: PathBuf, message: String },
    #[error("cannot write model {}: {message}", path.display())]
    Save { path: PathBuf, message: String },
    #[error("optimizer state poisoned")]
    Poisoned,
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure reading the TOML configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_text_is_prefixed() {
        let err = ClassifyError::ModelUnavailable {
            reason: "missing file".into(),
        };
        let text = err.to_result_text();
        assert!(text.starts_with("Error:"));
        assert!(text.contains("missing file"));
    }
}
