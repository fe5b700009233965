//! Directory-structured image sets: one sub-directory per class.

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::error::DatasetError;
use crate::preprocess::image_to_pixels;

/// File extensions read as images, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// A labelled image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub class: usize,
}

/// Images grouped by class folder. Class indices follow alphabetical folder order.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    classes: Vec<String>,
    samples: Vec<Sample>,
}

impl ImageFolder {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(DatasetError::Missing(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(DatasetError::NotADirectory(root.to_path_buf()));
        }

        let mut classes: Vec<String> = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                classes.push(name.to_string());
            }
        }
        if classes.is_empty() {
            return Err(DatasetError::NoClasses(root.to_path_buf()));
        }
        classes.sort();

        let mut samples = Vec::new();
        for (class, name) in classes.iter().enumerate() {
            let mut files = scan_images(root.join(name));
            files.sort();
            tracing::debug!("Class {class}: {name} ({} images)", files.len());
            samples.extend(files.into_iter().map(|path| Sample { path, class }));
        }
        if samples.is_empty() {
            return Err(DatasetError::Empty(root.to_path_buf()));
        }

        Ok(Self { classes, samples })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decode the given samples into an NHWC batch and its class targets.
    pub fn load_batch(
        &self,
        indices: &[usize],
        size: u32,
        device: &Device,
    ) -> Result<(Tensor, Tensor), DatasetError> {
        let side = size as usize;
        let decoded: Vec<Vec<f32>> = indices
            .par_iter()
            .map(|&i| {
                let sample = &self.samples[i];
                let img = image::open(&sample.path).map_err(|source| DatasetError::Decode {
                    path: sample.path.clone(),
                    source,
                })?;
                Ok(image_to_pixels(&img, size))
            })
            .collect::<Result<_, DatasetError>>()?;

        let pixels: Vec<f32> = decoded.into_iter().flatten().collect();
        let images = Tensor::from_vec(pixels, (indices.len(), side, side, 3), device)?;
        let targets: Vec<u32> = indices
            .iter()
            .map(|&i| self.samples[i].class as u32)
            .collect();
        let targets = Tensor::from_vec(targets, indices.len(), device)?;
        Ok((images, targets))
    }
}

/// List supported image files below `dir`, recursively.
pub fn scan_images(dir: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("walkdir error: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_file() && is_supported_image(path) {
            files.push(path.to_path_buf());
        }
    }
    files
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}
