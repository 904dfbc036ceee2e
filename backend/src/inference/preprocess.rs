use image::imageops::FilterType;
use ndarray::Array4;
use std::path::Path;

use super::InferenceError;

/// Resize and normalisation applied before the forward pass.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Preprocessor {
    pub fn new(input_size: u32, mean: &[f32], std: &[f32]) -> Result<Self, InferenceError> {
        let channels = |values: &[f32], name: &str| -> Result<[f32; 3], InferenceError> {
            values.try_into().map_err(|_| {
                InferenceError::Preprocessing(format!("{} needs exactly 3 values", name))
            })
        };
        Ok(Self {
            input_size,
            mean: channels(mean, "mean")?,
            std: channels(std, "std")?,
        })
    }

    /// Decodes the file and returns it as a `[1, 3, size, size]` batch,
    /// together with the original (width, height).
    pub fn load(&self, path: &Path) -> Result<(Array4<f32>, (u32, u32)), InferenceError> {
        let img = image::open(path)?;
        let original = (img.width(), img.height());
        Ok((self.tensorize(&img.to_rgb8()), original))
    }

    pub fn tensorize(&self, rgb: &image::RgbImage) -> Array4<f32> {
        let size = self.input_size;
        let resized = image::imageops::resize(rgb, size, size, FilterType::Triangle);
        let side = size as usize;
        let mut batch = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                batch[[0, c, y as usize, x as usize]] = (value - self.mean[c]) / self.std[c];
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn produces_normalised_chw_batch() {
        let pre = Preprocessor::new(4, &[0.5, 0.5, 0.5], &[0.5, 0.5, 0.5]).unwrap();
        let img = RgbImage::from_pixel(8, 6, Rgb([255, 0, 255]));
        let batch = pre.tensorize(&img);
        assert_eq!(batch.dim(), (1, 3, 4, 4));
        assert!((batch[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
        assert!((batch[[0, 1, 2, 3]] + 1.0).abs() < 1e-6);
        assert!((batch[[0, 2, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn load_reports_original_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        RgbImage::from_pixel(10, 7, Rgb([40, 40, 40])).save(&path).unwrap();
        let pre = Preprocessor::new(8, &[0.485, 0.456, 0.406], &[0.229, 0.224, 0.225]).unwrap();
        let (batch, original) = pre.load(&path).unwrap();
        assert_eq!(original, (10, 7));
        assert_eq!(batch.dim(), (1, 3, 8, 8));
    }

    #[test]
    fn rejects_wrong_channel_count() {
        assert!(Preprocessor::new(8, &[0.5], &[0.5, 0.5, 0.5]).is_err());
    }

    #[test]
    fn undecodable_file_is_a_preprocessing_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        let pre = Preprocessor::new(8, &[0.5; 3], &[0.5; 3]).unwrap();
        assert!(matches!(
            pre.load(&path),
            Err(InferenceError::Preprocessing(_))
        ));
    }
}
