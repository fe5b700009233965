//! Image to tensor conversion shared by inference and training.

use std::path::Path;

use candle_core::{Device, Tensor};
use image::{DynamicImage, imageops::FilterType};

use crate::error::ClassifyError;

/// Stretch `img` to `size`×`size` and return its RGB pixels scaled to `[0, 1]`,
/// row-major with interleaved channels (HWC).
pub fn image_to_pixels(img: &DynamicImage, size: u32) -> Vec<f32> {
    let resized = img.resize_exact(size, size, FilterType::Nearest).to_rgb8();
    resized
        .into_raw()
        .into_iter()
        .map(|v| f32::from(v) / 255.0)
        .collect()
}

/// Convert a decoded image into a `(1, size, size, 3)` tensor.
pub fn image_to_tensor(
    img: &DynamicImage,
    size: u32,
    device: &Device,
) -> Result<Tensor, ClassifyError> {
    let side = size as usize;
    let pixels = image_to_pixels(img, size);
    Ok(Tensor::from_vec(pixels, (1, side, side, 3), device)?)
}

/// Open the image at `path` and convert it into a `(1, size, size, 3)` tensor.
///
/// Aspect ratio is not preserved.
pub fn preprocess_image(
    path: impl AsRef<Path>,
    size: u32,
    device: &Device,
) -> Result<Tensor, ClassifyError> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|source| ClassifyError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    image_to_tensor(&img, size, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_INPUT_SIZE;
    use image::{ImageBuffer, Rgb, RgbImage};
    use rstest::rstest;
    use tempfile::tempdir;

    #[rstest]
    #[case(640, 480)]
    #[case(224, 224)]
    #[case(17, 301)]
    #[case(1, 1)]
    fn any_image_yields_fixed_shape_in_unit_range(#[case] w: u32, #[case] h: u32) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.png");
        let img: RgbImage =
            ImageBuffer::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 255]));
        img.save(&path).unwrap();

        let tensor = preprocess_image(&path, DEFAULT_INPUT_SIZE, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 224, 224, 3]);

        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn pixel_values_are_divided_by_255() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([255, 0, 51])));
        let pixels = image_to_pixels(&img, 2);
        assert_eq!(pixels.len(), 2 * 2 * 3);
        approx::assert_abs_diff_eq!(pixels[0], 1.0);
        approx::assert_abs_diff_eq!(pixels[1], 0.0);
        approx::assert_abs_diff_eq!(pixels[2], 0.2, epsilon = 1e-6);
    }

    #[test]
    fn grayscale_input_is_expanded_to_three_channels() {
        let img = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(8, 8, image::Luma([128])));
        let tensor = image_to_tensor(&img, 4, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 4, 4, 3]);
    }

    #[test]
    fn missing_path_is_a_load_error() {
        let err = preprocess_image("/nonexistent/can.jpg", 224, &Device::Cpu).unwrap_err();
        assert!(matches!(err, ClassifyError::Load { .. }));
    }

    #[test]
    fn corrupt_file_is_a_load_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"\xFF\xD8 definitely not a jpeg").unwrap();
        let err = preprocess_image(&path, 224, &Device::Cpu).unwrap_err();
        assert!(matches!(err, ClassifyError::Load { .. }));
    }
}
