//! Garbage photo classification: preprocessing, a frozen VGG-style backbone
//! with a trainable dense head, single-image inference and the offline
//! fine-tuning loop that produces the model.

pub mod classifier;
pub mod config;
pub mod dataset;
pub mod device;
pub mod error;
pub mod loader;
pub mod network;
pub mod preprocess;
pub mod training;

pub use classifier::{
    ClassifyStage, DEFAULT_LABELS, GarbageClassifier, ModelHandle, ModelManifest, Prediction,
    argmax, result_text,
};
pub use config::{AppConfig, ClassifierConfig, TrainingConfig};
pub use dataset::{IMAGE_EXTENSIONS, ImageFolder, Sample, is_supported_image, scan_images};
pub use candle_core::Device;
pub use device::get_device;
pub use error::{ClassifyError, ConfigError, DatasetError, TrainError};
pub use network::{Backbone, BackboneSpec, ClassifierHead, GarbageNet};
pub use preprocess::{image_to_pixels, image_to_tensor, preprocess_image};
pub use training::{EpochMetrics, TrainProgress, TrainingReport, export_history_csv, train};
