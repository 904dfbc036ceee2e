use image::{ImageFormat, Rgba, RgbaImage};
use ndarray::Array2;
use std::path::Path;

use super::colormap::Colormap;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Saliency map is empty")]
    Empty,
    #[error("Saliency map is too large: {0}x{1}")]
    TooLarge(usize, usize),
    #[error("Failed to write overlay: {0}")]
    Write(#[from] image::ImageError),
}

/// Colors a saliency map through `colormap` with a uniform `alpha`.
///
/// Values are min-max normalised over the finite entries; non-finite entries
/// and constant maps render at the low end of the colormap.
pub fn render_heatmap(
    heatmap: &Array2<f32>,
    colormap: Colormap,
    alpha: f32,
) -> Result<RgbaImage, RenderError> {
    let (rows, cols) = heatmap.dim();
    if rows == 0 || cols == 0 {
        return Err(RenderError::Empty);
    }
    let (width, height) = match (u32::try_from(cols), u32::try_from(rows)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(RenderError::TooLarge(cols, rows)),
    };

    let (min, max) = heatmap
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let alpha = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;

    Ok(RgbaImage::from_fn(width, height, |x, y| {
        let value = heatmap[[y as usize, x as usize]];
        let normalised = if value.is_finite() && range > f32::EPSILON {
            (value - min) / range
        } else {
            0.0
        };
        let [r, g, b] = colormap.rgb(normalised);
        Rgba([r, g, b, alpha])
    }))
}

/// Renders and writes the overlay as PNG.
pub fn save_heatmap(
    heatmap: &Array2<f32>,
    colormap: Colormap,
    alpha: f32,
    path: &Path,
) -> Result<(), RenderError> {
    let overlay = render_heatmap(heatmap, colormap, alpha)?;
    overlay.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
