//! TOML configuration for the classifier and the training run.
//!
//! Lookup order for [`AppConfig::load`]:
//! 1. an explicit path
//! 2. the `GARBAGE_SORTER_CONFIG` environment variable
//! 3. `garbage_sorter.toml` in the working directory
//!
//! When none of these exist the defaults are used. A file that exists but does
//! not parse is an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::network::BackboneSpec;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "GARBAGE_SORTER_CONFIG";
/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "garbage_sorter.toml";
/// Side length of the square model input.
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub classifier: ClassifierConfig,
    pub training: TrainingConfig,
}

/// Where the inference side finds the trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    /// Manifest written by training; defaults to the model path with a `.json` extension.
    pub manifest_path: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/trained_model.safetensors"),
            manifest_path: None,
        }
    }
}

impl ClassifierConfig {
    pub fn for_model(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            manifest_path: None,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| manifest_path_for(&self.model_path))
    }
}

/// Manifest location paired with a model file.
pub fn manifest_path_for(model_path: &Path) -> PathBuf {
    model_path.with_extension("json")
}

/// Settings for the offline fine-tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub train_dir: PathBuf,
    pub validation_dir: PathBuf,
    /// Pre-trained backbone weights with `features.<n>` keys.
    pub backbone_path: PathBuf,
    pub output_path: PathBuf,
    /// Optional per-epoch metrics export.
    pub history_path: Option<PathBuf>,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub hidden_units: usize,
    pub classes: usize,
    pub input_size: u32,
    pub seed: u64,
    pub backbone: BackboneSpec,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("train_set"),
            validation_dir: PathBuf::from("validation_set"),
            backbone_path: PathBuf::from("models/vgg16_features.safetensors"),
            output_path: PathBuf::from("models/trained_model.safetensors"),
            history_path: None,
            batch_size: 20,
            epochs: 3,
            learning_rate: 0.001,
            hidden_units: 256,
            classes: 4,
            input_size: DEFAULT_INPUT_SIZE,
            seed: 42,
            backbone: BackboneSpec::vgg16(),
        }
    }
}

impl AppConfig {
    /// Load configuration using the standard lookup order.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_baseline_run() {
        let cfg = TrainingConfig::default();
        assert_eq!(cfg.batch_size, 20);
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.hidden_units, 256);
        assert_eq!(cfg.classes, 4);
        assert_eq!(cfg.input_size, 224);
        assert_eq!(cfg.backbone, BackboneSpec::vgg16());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [classifier]
            model_path = "/opt/models/garbage.safetensors"

            [training]
            epochs = 10
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.classifier.model_path,
            PathBuf::from("/opt/models/garbage.safetensors")
        );
        assert_eq!(
            cfg.classifier.manifest_path(),
            PathBuf::from("/opt/models/garbage.json")
        );
        assert_eq!(cfg.training.epochs, 10);
        assert_eq!(cfg.training.batch_size, 20);
    }

    #[test]
    fn explicit_manifest_path_wins() {
        let cfg = ClassifierConfig {
            model_path: PathBuf::from("a.safetensors"),
            manifest_path: Some(PathBuf::from("labels.json")),
        };
        assert_eq!(cfg.manifest_path(), PathBuf::from("labels.json"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[training\nepochs = ").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/garbage.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
