//! Fine-tuning of the classification head on a frozen backbone.
//!
//! The backbone weights come from a safetensors file and are served as
//! constants, so the optimizer only ever sees the head's variables. Each epoch
//! shuffles the training set, steps Adam once per batch and then measures the
//! validation set without updating anything. The finished model (backbone and
//! head in one file) is written together with its manifest.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap, loss};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{info, warn};

use crate::classifier::{DEFAULT_LABELS, ModelManifest};
use crate::config::{TrainingConfig, manifest_path_for};
use crate::dataset::ImageFolder;
use crate::error::TrainError;
use crate::loader::{load_var_builder, save_tensors};
use crate::network::{Backbone, ClassifierHead};

/// Loss and accuracy for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    /// 1-based epoch number.
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

/// Events emitted while training runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainProgress {
    Batch {
        epoch: usize,
        batch: usize,
        batches: usize,
        loss: f32,
    },
    Epoch(EpochMetrics),
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub classes: Vec<String>,
    pub history: Vec<EpochMetrics>,
    pub train_samples: usize,
    pub validation_samples: usize,
}

impl TrainingReport {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.history.last()
    }
}

#[derive(Default)]
struct Running {
    loss_sum: f32,
    correct: f32,
    seen: usize,
}

impl Running {
    fn add(&mut self, logits: &Tensor, targets: &Tensor, loss: f32) -> candle_core::Result<()> {
        let n = targets.dim(0)?;
        let hits = logits
            .argmax(1)?
            .eq(targets)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        self.loss_sum += loss * n as f32;
        self.correct += hits;
        self.seen += n;
        Ok(())
    }

    fn mean_loss(&self) -> f32 {
        if self.seen == 0 {
            0.0
        } else {
            self.loss_sum / self.seen as f32
        }
    }

    fn accuracy(&self) -> f32 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct / self.seen as f32
        }
    }
}

/// Train the head, persist the model and return the per-epoch history.
pub fn train<F>(
    cfg: &TrainingConfig,
    device: &Device,
    mut progress: F,
) -> Result<TrainingReport, TrainError>
where
    F: FnMut(TrainProgress),
{
    if cfg.batch_size == 0 {
        return Err(TrainError::EmptyBatch);
    }
    let train_set = ImageFolder::open(&cfg.train_dir)?;
    let validation_set = ImageFolder::open(&cfg.validation_dir)?;
    check_classes(cfg, &train_set, &validation_set)?;
    info!(
        "Training on {} images, validating on {} ({})",
        train_set.len(),
        validation_set.len(),
        train_set.classes().join(", ")
    );

    let backbone_vb = load_var_builder(&cfg.backbone_path, device).map_err(|e| {
        TrainError::Backbone {
            path: cfg.backbone_path.clone(),
            message: format!("{e:#}"),
        }
    })?;
    let backbone = Backbone::new(backbone_vb, &cfg.backbone).map_err(|e| TrainError::Backbone {
        path: cfg.backbone_path.clone(),
        message: e.to_string(),
    })?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let head = ClassifierHead::new(
        vb.pp("head"),
        cfg.backbone.feature_len(cfg.input_size),
        cfg.hidden_units,
        cfg.classes,
    )?;
    let params = ParamsAdamW {
        lr: cfg.learning_rate,
        beta1: 0.9,
        beta2: 0.999,
        eps: 1e-7,
        weight_decay: 0.0,
    };
    let mut optimizer = AdamW::new(varmap.all_vars(), params)?;

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut order: Vec<usize> = (0..train_set.len()).collect();
    let batches = order.len().div_ceil(cfg.batch_size);
    let mut history = Vec::with_capacity(cfg.epochs);

    for epoch in 1..=cfg.epochs {
        order.shuffle(&mut rng);
        let mut running = Running::default();
        for (batch, chunk) in order.chunks(cfg.batch_size).enumerate() {
            let (images, targets) = train_set.load_batch(chunk, cfg.input_size, device)?;
            let features = backbone.forward(&images)?.detach();
            let logits = head.forward(&features)?;
            let batch_loss = loss::cross_entropy(&logits, &targets)?;
            optimizer.backward_step(&batch_loss)?;

            let loss_value = batch_loss.to_scalar::<f32>()?;
            running.add(&logits, &targets, loss_value)?;
            progress(TrainProgress::Batch {
                epoch,
                batch: batch + 1,
                batches,
                loss: loss_value,
            });
        }

        let validation = evaluate(&backbone, &head, &validation_set, cfg, device)?;
        let metrics = EpochMetrics {
            epoch,
            loss: running.mean_loss(),
            accuracy: running.accuracy(),
            val_loss: validation.mean_loss(),
            val_accuracy: validation.accuracy(),
        };
        info!(
            "Epoch {}/{}: loss {:.4}, accuracy {:.4}, val_loss {:.4}, val_accuracy {:.4}",
            epoch, cfg.epochs, metrics.loss, metrics.accuracy, metrics.val_loss, metrics.val_accuracy
        );
        progress(TrainProgress::Epoch(metrics));
        history.push(metrics);
    }

    save_model(cfg, &backbone, &varmap, train_set.classes())?;
    if let Some(path) = &cfg.history_path {
        export_history_csv(&history, path)?;
    }

    Ok(TrainingReport {
        classes: train_set.classes().to_vec(),
        history,
        train_samples: train_set.len(),
        validation_samples: validation_set.len(),
    })
}

fn check_classes(
    cfg: &TrainingConfig,
    train_set: &ImageFolder,
    validation_set: &ImageFolder,
) -> Result<(), TrainError> {
    if train_set.classes() != validation_set.classes() {
        return Err(TrainError::ClassMismatch {
            train: train_set.classes().to_vec(),
            validation: validation_set.classes().to_vec(),
        });
    }
    if train_set.classes().len() != cfg.classes {
        return Err(TrainError::ClassCount {
            expected: cfg.classes,
            found: train_set.classes().to_vec(),
        });
    }
    if train_set.classes() != DEFAULT_LABELS {
        warn!(
            "Class folders {:?} differ from the built-in labels {:?}; the manifest records the folder names",
            train_set.classes(),
            DEFAULT_LABELS
        );
    }
    Ok(())
}

fn evaluate(
    backbone: &Backbone,
    head: &ClassifierHead,
    set: &ImageFolder,
    cfg: &TrainingConfig,
    device: &Device,
) -> Result<Running, TrainError> {
    let indices: Vec<usize> = (0..set.len()).collect();
    let mut running = Running::default();
    for chunk in indices.chunks(cfg.batch_size) {
        let (images, targets) = set.load_batch(chunk, cfg.input_size, device)?;
        let features = backbone.forward(&images)?;
        let logits = head.forward(&features)?.detach();
        let batch_loss = loss::cross_entropy(&logits, &targets)?.to_scalar::<f32>()?;
        running.add(&logits, &targets, batch_loss)?;
    }
    Ok(running)
}

fn save_model(
    cfg: &TrainingConfig,
    backbone: &Backbone,
    varmap: &VarMap,
    classes: &[String],
) -> Result<(), TrainError> {
    let mut tensors: HashMap<String, Tensor> = backbone.named_tensors();
    {
        let vars = varmap.data().lock().map_err(|_| TrainError::Poisoned)?;
        for (name, var) in vars.iter() {
            tensors.insert(name.clone(), var.as_tensor().clone());
        }
    }
    save_tensors(&tensors, &cfg.output_path).map_err(|e| TrainError::Save {
        path: cfg.output_path.clone(),
        message: format!("{e:#}"),
    })?;

    let manifest = ModelManifest {
        labels: classes.to_vec(),
        input_size: cfg.input_size,
        hidden_units: cfg.hidden_units,
        backbone: cfg.backbone.clone(),
    };
    let manifest_path = manifest_path_for(&cfg.output_path);
    manifest.save(&manifest_path)?;
    info!(
        "Saved model to {} (manifest {})",
        cfg.output_path.display(),
        manifest_path.display()
    );
    Ok(())
}

/// Export per-epoch metrics to CSV with headers:
/// epoch,loss,accuracy,val_loss,val_accuracy
pub fn export_history_csv(history: &[EpochMetrics], path: impl AsRef<Path>) -> Result<(), TrainError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for m in history {
        wtr.serialize(m)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn export_history_writes_expected_headers_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let history = vec![
            EpochMetrics {
                epoch: 1,
                loss: 1.25,
                accuracy: 0.5,
                val_loss: 1.5,
                val_accuracy: 0.25,
            },
            EpochMetrics {
                epoch: 2,
                loss: 0.75,
                accuracy: 0.75,
                val_loss: 0.875,
                val_accuracy: 0.5,
            },
        ];

        export_history_csv(&history, &path).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["epoch", "loss", "accuracy", "val_loss", "val_accuracy"]
        );
        let mut recs = rdr.records();
        let r1 = recs.next().unwrap().unwrap();
        assert_eq!(&r1[0], "1");
        assert_eq!(&r1[1], "1.25");
        assert_eq!(&r1[4], "0.25");
        let r2 = recs.next().unwrap().unwrap();
        assert_eq!(&r2[0], "2");
        assert_eq!(&r2[3], "0.875");
        assert_eq!(r2[4].parse::<f32>().unwrap(), 0.5);
        assert!(recs.next().is_none());
    }

    #[test]
    fn running_metrics_count_hits() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[2f32, 0.], [0., 3.], [5., 1.]], &device).unwrap();
        let targets = Tensor::new(&[0u32, 1, 1], &device).unwrap();
        let mut running = Running::default();
        running.add(&logits, &targets, 0.5).unwrap();
        approx::assert_abs_diff_eq!(running.accuracy(), 2.0 / 3.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(running.mean_loss(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let cfg = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        let err = train(&cfg, &Device::Cpu, |_| {}).unwrap_err();
        assert!(matches!(err, TrainError::EmptyBatch));
    }
}
