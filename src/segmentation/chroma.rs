use super::preprocess::Preprocessor;
use super::types::{ProbabilityMap, SegmentationModel};
use crate::config::QualityTier;
use crate::error::{MatteError, Result};
use image::RgbImage;

/// Model-free segmentation by keying out a backdrop colour
///
/// Pixels within `tolerance` of the key colour (RGB distance, normalised
/// to [0, 1]) are background; beyond `tolerance + softness` they are
/// subject, with a linear ramp in between. Useful in front of a green
/// screen and as a deterministic stand-in when no ONNX model is loaded
pub struct ChromaKeyModel {
    key: [f32; 3],
    tolerance: f32,
    softness: f32,
}

impl ChromaKeyModel {
    pub fn new(key: [u8; 3], tolerance: f32, softness: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&tolerance) || !(0.0..=1.0).contains(&softness) {
            return Err(MatteError::config(format!(
                "chroma key tolerance {} / softness {} must lie in [0, 1]",
                tolerance, softness
            )));
        }
        Ok(Self {
            key: key.map(|c| c as f32 / 255.0),
            tolerance,
            softness,
        })
    }

    /// Green screen with the usual tolerance and softness
    pub fn green_screen() -> Self {
        Self {
            key: [0.0, 1.0, 0.0],
            tolerance: 0.3,
            softness: 0.1,
        }
    }

    fn foreground(&self, distance: f32) -> f32 {
        if distance <= self.tolerance {
            0.0
        } else if self.softness <= f32::EPSILON || distance >= self.tolerance + self.softness {
            1.0
        } else {
            (distance - self.tolerance) / self.softness
        }
    }
}

impl SegmentationModel for ChromaKeyModel {
    fn segment(&mut self, frame: &RgbImage, tier: QualityTier) -> Result<ProbabilityMap> {
        let _span = tracing::debug_span!("chroma_key_segment").entered();

        let (width, height) = self.input_size(tier);
        let tensor = Preprocessor::new(width, height).preprocess(frame)?;

        let norm = 3f32.sqrt();
        Ok(ProbabilityMap::from_fn(width, height, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let distance = (0..3)
                .map(|c| {
                    let d = tensor[[0, c, y, x]] - self.key[c];
                    d * d
                })
                .sum::<f32>()
                .sqrt()
                / norm;
            self.foreground(distance)
        }))
    }

    fn input_size(&self, tier: QualityTier) -> (u32, u32) {
        match tier {
            QualityTier::Fast => (160, 90),
            QualityTier::Accurate => (320, 180),
        }
    }

    fn name(&self) -> &str {
        "chroma-key"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_colour_is_background() {
        let mut model = ChromaKeyModel::green_screen();
        let frame = RgbImage::from_pixel(320, 180, image::Rgb([0, 255, 0]));
        let map = model.segment(&frame, QualityTier::Fast).unwrap();

        assert_eq!((map.width(), map.height()), (160, 90));
        assert!(map.as_slice().iter().all(|&p| p == 0.0));
    }

    #[test]
    fn distant_colour_is_subject() {
        let mut model = ChromaKeyModel::green_screen();
        let frame = RgbImage::from_pixel(64, 64, image::Rgb([255, 0, 255]));
        let map = model.segment(&frame, QualityTier::Accurate).unwrap();

        assert_eq!((map.width(), map.height()), (320, 180));
        assert!(map.as_slice().iter().all(|&p| p == 1.0));
    }

    #[test]
    fn softness_ramps_linearly() {
        let model = ChromaKeyModel::new([0, 0, 0], 0.2, 0.4).unwrap();
        assert_eq!(model.foreground(0.1), 0.0);
        assert!((model.foreground(0.4) - 0.5).abs() < 1e-6);
        assert_eq!(model.foreground(0.7), 1.0);
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        assert!(ChromaKeyModel::new([0, 255, 0], 1.2, 0.1).is_err());
        assert!(ChromaKeyModel::new([0, 255, 0], 0.2, -0.1).is_err());
    }
}
