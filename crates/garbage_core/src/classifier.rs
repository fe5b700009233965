use std::fs;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{ClassifierConfig, DEFAULT_INPUT_SIZE};
use crate::error::ClassifyError;
use crate::loader::load_tensors;
use crate::network::{BackboneSpec, GarbageNet};
use crate::preprocess::preprocess_image;

/// Labels in output-index order, matching alphabetically sorted class folders.
pub const DEFAULT_LABELS: [&str; 4] = ["Glass", "Metal", "Paper", "Plastic"];

/// Description of a saved model, written next to the weights file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Class names in output-index order.
    pub labels: Vec<String>,
    pub input_size: u32,
    pub hidden_units: usize,
    pub backbone: BackboneSpec,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            input_size: DEFAULT_INPUT_SIZE,
            hidden_units: 256,
            backbone: BackboneSpec::vgg16(),
        }
    }
}

impl ModelManifest {
    /// Read a manifest, falling back to the built-in layout when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ClassifyError> {
        if !path.exists() {
            warn!(
                "Manifest {} not found, assuming default layout and labels",
                path.display()
            );
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|source| ClassifyError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, json)
    }
}

/// Outcome of classifying one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub index: usize,
    /// Softmax output, one entry per label.
    pub probabilities: Vec<f32>,
}

impl Prediction {
    pub fn confidence(&self) -> f32 {
        self.probabilities.get(self.index).copied().unwrap_or(0.0)
    }
}

/// Work stages reported while a classification runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyStage {
    /// Decoding and resizing the image.
    Loading,
    /// Running the forward pass.
    Inferring,
    Finished,
}

impl ClassifyStage {
    /// Share of the work done once this stage is reached.
    pub fn fraction(self) -> f32 {
        match self {
            ClassifyStage::Loading => 0.1,
            ClassifyStage::Inferring => 0.5,
            ClassifyStage::Finished => 1.0,
        }
    }
}

/// Index of the largest value; ties resolve to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, best_v)| v > best_v) {
            best = Some((idx, v));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Loaded network plus the labels its outputs map to.
pub struct GarbageClassifier {
    net: GarbageNet,
    manifest: ModelManifest,
    device: Device,
}

impl GarbageClassifier {
    pub fn load(cfg: &ClassifierConfig, device: &Device) -> Result<Self, ClassifyError> {
        let manifest = ModelManifest::load_or_default(&cfg.manifest_path())?;
        Self::from_parts(&cfg.model_path, manifest, device)
    }

    pub fn from_parts(
        model_path: &Path,
        manifest: ModelManifest,
        device: &Device,
    ) -> Result<Self, ClassifyError> {
        let model_error = |message: String| ClassifyError::Model {
            path: model_path.to_path_buf(),
            message,
        };
        if !model_path.exists() {
            return Err(model_error("file not found".into()));
        }
        if manifest.labels.is_empty() {
            return Err(model_error("manifest lists no labels".into()));
        }
        let tensors = load_tensors(model_path, device).map_err(|e| model_error(format!("{e:#}")))?;
        let outputs = tensors
            .get("head.output.weight")
            .ok_or_else(|| model_error("no head.output.weight tensor".into()))?
            .dim(0)?;
        if outputs != manifest.labels.len() {
            return Err(ClassifyError::LabelMismatch {
                outputs,
                labels: manifest.labels.len(),
            });
        }
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let net = GarbageNet::load(
            vb,
            &manifest.backbone,
            manifest.input_size,
            manifest.hidden_units,
            outputs,
        )
        .map_err(|e| model_error(e.to_string()))?;
        info!(
            "Loaded model {} ({} classes: {})",
            model_path.display(),
            manifest.labels.len(),
            manifest.labels.join(", ")
        );
        Ok(Self {
            net,
            manifest,
            device: device.clone(),
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.manifest.labels
    }

    pub fn input_size(&self) -> u32 {
        self.manifest.input_size
    }

    pub fn classify(&self, path: &Path) -> Result<Prediction, ClassifyError> {
        self.classify_with_progress(path, |_| {})
    }

    pub fn classify_with_progress<F>(
        &self,
        path: &Path,
        mut progress: F,
    ) -> Result<Prediction, ClassifyError>
    where
        F: FnMut(ClassifyStage),
    {
        progress(ClassifyStage::Loading);
        let input = preprocess_image(path, self.manifest.input_size, &self.device)?;
        progress(ClassifyStage::Inferring);
        let probabilities = self.net.probabilities(&input)?.squeeze(0)?.to_vec1::<f32>()?;
        let index = argmax(&probabilities).ok_or_else(|| ClassifyError::Model {
            path: path.to_path_buf(),
            message: "model produced no usable scores".into(),
        })?;
        let label = self
            .manifest
            .labels
            .get(index)
            .cloned()
            .ok_or(ClassifyError::LabelMismatch {
                outputs: probabilities.len(),
                labels: self.manifest.labels.len(),
            })?;
        progress(ClassifyStage::Finished);
        Ok(Prediction {
            label,
            index,
            probabilities,
        })
    }
}

/// Process-wide model slot: either a loaded classifier or the reason it is missing.
pub enum ModelHandle {
    Loaded(GarbageClassifier),
    Unavailable { reason: String },
}

impl ModelHandle {
    /// Load the model; failures are logged and leave the handle unavailable.
    pub fn load(cfg: &ClassifierConfig, device: &Device) -> Self {
        match GarbageClassifier::load(cfg, device) {
            Ok(classifier) => ModelHandle::Loaded(classifier),
            Err(e) => {
                error!("Model could not be loaded: {e}");
                ModelHandle::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelHandle::Loaded(_))
    }

    pub fn classifier(&self) -> Result<&GarbageClassifier, ClassifyError> {
        match self {
            ModelHandle::Loaded(c) => Ok(c),
            ModelHandle::Unavailable { reason } => Err(ClassifyError::ModelUnavailable {
                reason: reason.clone(),
            }),
        }
    }

    pub fn classify(&self, path: &Path) -> Result<Prediction, ClassifyError> {
        self.classifier()?.classify(path)
    }

    pub fn classify_with_progress<F>(
        &self,
        path: &Path,
        progress: F,
    ) -> Result<Prediction, ClassifyError>
    where
        F: FnMut(ClassifyStage),
    {
        self.classifier()?.classify_with_progress(path, progress)
    }

    /// Label text, or `Error: ...` when anything failed.
    pub fn classify_text(&self, path: &Path) -> String {
        self.classify_text_with_progress(path, |_| {})
    }

    /// Same as [`ModelHandle::classify_text`], reporting stages as they start.
    pub fn classify_text_with_progress<F>(&self, path: &Path, progress: F) -> String
    where
        F: FnMut(ClassifyStage),
    {
        result_text(path, self.classify_with_progress(path, progress))
    }
}

/// Turn a classification outcome into the text shown to the user.
pub fn result_text(path: &Path, result: Result<Prediction, ClassifyError>) -> String {
    match result {
        Ok(p) => {
            info!(
                "{} -> {} ({:.3})",
                path.display(),
                p.label,
                p.confidence()
            );
            p.label
        }
        Err(e) => {
            warn!("Classification of {} failed: {e}", path.display());
            e.to_result_text()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0.1, 0.7, 0.2], Some(1))]
    #[case(&[0.25, 0.25, 0.25, 0.25], Some(0))]
    #[case(&[0.1, 0.4, 0.4, 0.1], Some(1))]
    #[case(&[f32::NAN, 0.3, 0.2], Some(1))]
    #[case(&[], None)]
    fn argmax_prefers_lowest_index_on_ties(#[case] values: &[f32], #[case] expected: Option<usize>) {
        assert_eq!(argmax(values), expected);
    }

    #[test]
    fn unavailable_handle_reports_model_unavailable() {
        let handle = ModelHandle::load(
            &ClassifierConfig::for_model("/nonexistent/trained_model.safetensors"),
            &Device::Cpu,
        );
        assert!(!handle.is_loaded());
        let err = handle.classify(Path::new("whatever.jpg")).unwrap_err();
        assert!(matches!(err, ClassifyError::ModelUnavailable { .. }));
        assert!(handle.classify_text(Path::new("whatever.jpg")).starts_with("Error:"));
    }

    #[test]
    fn result_text_is_label_or_error() {
        let ok = Ok(Prediction {
            label: "Metal".into(),
            index: 1,
            probabilities: vec![0.1, 0.6, 0.2, 0.1],
        });
        assert_eq!(result_text(Path::new("can.jpg"), ok), "Metal");

        let err = Err(ClassifyError::ModelUnavailable {
            reason: "no weights".into(),
        });
        assert_eq!(
            result_text(Path::new("can.jpg"), err),
            "Error: model unavailable: no weights"
        );
    }

    #[test]
    fn unavailable_handle_reports_stage_free_error_text() {
        let handle = ModelHandle::Unavailable {
            reason: "not trained yet".into(),
        };
        let mut stages = Vec::new();
        let text = handle.classify_text_with_progress(Path::new("x.png"), |s| stages.push(s));
        assert_eq!(text, "Error: model unavailable: not trained yet");
        assert!(stages.is_empty());
    }

    #[test]
    fn stage_fractions_increase() {
        assert!(ClassifyStage::Loading.fraction() < ClassifyStage::Inferring.fraction());
        assert_eq!(ClassifyStage::Finished.fraction(), 1.0);
    }

    #[test]
    fn default_manifest_uses_fixed_labels() {
        let m = ModelManifest::default();
        assert_eq!(m.labels, vec!["Glass", "Metal", "Paper", "Plastic"]);
        assert_eq!(m.input_size, 224);
    }

    #[test]
    fn missing_manifest_falls_back_to_default() {
        let m = ModelManifest::load_or_default(Path::new("/nonexistent/model.json")).unwrap();
        assert_eq!(m, ModelManifest::default());
    }

    #[test]
    fn malformed_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{ labels: oops").unwrap();
        let err = ModelManifest::load_or_default(&path).unwrap_err();
        assert!(matches!(err, ClassifyError::Manifest { .. }));
    }
}
