use crate::config::QualityTier;
use crate::error::{MatteError, Result};
use crate::frame::Extent;
use image::RgbImage;

/// Per-pixel foreground confidence at the engine's native resolution
///
/// Values run from 0.0 (background) to 1.0 (subject), row-major
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl ProbabilityMap {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = Extent::new(width, height).area();
        if data.len() != expected {
            return Err(MatteError::invalid_buffer(format!(
                "{}x{} probability map needs {} values, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Map with every pixel set to `value`
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; Extent::new(width, height).area()],
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> f32,
    {
        let mut data = Vec::with_capacity(Extent::new(width, height).area());
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }
}

/// Trait for segmentation models
/// Allows swapping between different backends (RVM, chroma key, test fakes)
pub trait SegmentationModel: Send {
    /// Produce a foreground probability map for a frame
    ///
    /// # Arguments
    /// * `frame` - Input RGB frame at the host's resolution
    /// * `tier` - Requested latency/precision trade-off
    ///
    /// # Returns
    /// * Probability map at the model's own resolution, which need not
    ///   match the frame
    fn segment(&mut self, frame: &RgbImage, tier: QualityTier) -> Result<ProbabilityMap>;

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// The pipeline calls this when the stream's frame size changes
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }

    /// Get the model's preferred input dimensions for a tier
    ///
    /// Returns (width, height)
    fn input_size(&self, tier: QualityTier) -> (u32, u32);

    /// Model name for logging
    fn name(&self) -> &str;
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for Box<M> {
    fn segment(&mut self, frame: &RgbImage, tier: QualityTier) -> Result<ProbabilityMap> {
        (**self).segment(frame, tier)
    }

    fn reset_state(&mut self) {
        (**self).reset_state()
    }

    fn input_size(&self, tier: QualityTier) -> (u32, u32) {
        (**self).input_size(tier)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_length() {
        assert!(ProbabilityMap::new(2, 2, vec![0.0; 3]).is_err());
        let map = ProbabilityMap::new(2, 2, vec![0.0, 0.25, 0.5, 1.0]).unwrap();
        assert_eq!(map.get(1, 1), 1.0);
        assert_eq!(map.extent(), Extent::new(2, 2));
    }

    #[test]
    fn from_fn_is_row_major() {
        let map = ProbabilityMap::from_fn(3, 2, |x, y| (y * 3 + x) as f32);
        assert_eq!(map.as_slice(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}
