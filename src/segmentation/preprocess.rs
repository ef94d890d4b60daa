use super::types::ProbabilityMap;
use crate::error::{MatteError, Result};
use image::{imageops, RgbImage};
use ndarray::{Array4, ArrayViewD, Axis};

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in source.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, c, y, x]] = pixel[c] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }

    /// Turn a single-channel model output into a probability map
    ///
    /// Accepts `[1, 1, H, W]`, `[1, H, W]` or `[H, W]` tensors; values are
    /// clamped to [0, 1]
    pub fn matte_from_tensor(matte: ArrayViewD<'_, f32>) -> Result<ProbabilityMap> {
        let _span = tracing::debug_span!("postprocess").entered();

        let mut view = matte;
        while view.ndim() > 2 {
            if view.shape()[0] != 1 {
                return Err(MatteError::inference(format!(
                    "expected a single-channel matte, got shape {:?}",
                    view.shape()
                )));
            }
            view = view.index_axis_move(Axis(0), 0);
        }
        if view.ndim() != 2 {
            return Err(MatteError::inference(format!(
                "matte tensor has rank {}",
                view.ndim()
            )));
        }

        let (height, width) = (view.shape()[0], view.shape()[1]);
        if width == 0 || height == 0 {
            return Err(MatteError::degenerate(format!(
                "matte tensor is {}x{}",
                width, height
            )));
        }

        let values = view.iter().map(|&v| v.clamp(0.0, 1.0)).collect();
        ProbabilityMap::new(width as u32, height as u32, values)
    }
}
