use crate::error::{MatteError, Result};
use crate::frame::PixelFormat;
use clap::ValueEnum;

/// Engine setting trading inference latency for mask precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum QualityTier {
    #[default]
    Fast,
    Accurate,
}

/// How the segmentation engine hands its result back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CompletionMode {
    /// `process` stalls for one inference and returns its mask
    #[default]
    Blocking,
    /// Inference runs on an engine worker; `process` returns the latest mask
    Callback,
}

/// Layout of the mask handed back to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MaskFormat {
    /// One byte per pixel
    #[default]
    Gray8,
    /// Gray level replicated into B, G, R with opaque alpha
    Bgra8,
}

impl MaskFormat {
    pub const fn pixel_format(self) -> PixelFormat {
        match self {
            MaskFormat::Gray8 => PixelFormat::Gray8,
            MaskFormat::Bgra8 => PixelFormat::Bgra8,
        }
    }
}

/// Which reference level the subject receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MaskPolarity {
    /// Subject black, background white
    #[default]
    SubjectDark,
    /// Subject white, background black
    SubjectLight,
}

impl MaskPolarity {
    /// `(subject, background)` gray levels
    pub const fn levels(self) -> (u8, u8) {
        match self {
            MaskPolarity::SubjectDark => (0, 255),
            MaskPolarity::SubjectLight => (255, 0),
        }
    }
}

/// Clean-up applied to a thresholded mask
///
/// Each knob runs from 0.0 (off) to 1.0 and only takes effect when
/// [`PipelineConfig::threshold`] is set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcess {
    /// Drop subject regions no larger than this fraction of the mask area
    pub contour_filter: f32,
    /// Blur the binary mask at model resolution and re-threshold it at frame size
    pub smooth_contour: f32,
    /// Grow the subject and soften its edge
    pub feather: f32,
}

impl PostProcess {
    pub const OFF: Self = Self {
        contour_filter: 0.0,
        smooth_contour: 0.0,
        feather: 0.0,
    };

    pub fn is_active(&self) -> bool {
        self.contour_filter > 0.0 || self.smooth_contour > 0.0 || self.feather > 0.0
    }

    fn validate(&self) -> Result<()> {
        let knobs = [
            ("contour_filter", self.contour_filter),
            ("smooth_contour", self.smooth_contour),
            ("feather", self.feather),
        ];
        for (name, value) in knobs {
            if !(0.0..=1.0).contains(&value) {
                return Err(MatteError::config(format!(
                    "{} {} is outside [0, 1]",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for PostProcess {
    fn default() -> Self {
        Self {
            contour_filter: 0.05,
            smooth_contour: 0.5,
            feather: 0.0,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub quality_tier: QualityTier,
    pub completion: CompletionMode,
    pub mask_format: MaskFormat,
    pub polarity: MaskPolarity,
    /// Binarise probabilities at this level before blending
    pub threshold: Option<f32>,
    /// Clean-up of the thresholded mask
    pub post_process: PostProcess,
    /// Submit only every n-th frame while a same-size mask is available
    pub mask_every_n_frames: u32,
    /// Frames between stats log lines, 0 disables them
    pub stats_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_tier: QualityTier::Fast,
            completion: CompletionMode::Blocking,
            mask_format: MaskFormat::Gray8,
            polarity: MaskPolarity::SubjectDark,
            threshold: None,
            post_process: PostProcess::default(),
            mask_every_n_frames: 1,
            stats_interval: 30,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(threshold) = self.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(MatteError::config(format!(
                    "threshold {} is outside [0, 1]",
                    threshold
                )));
            }
        }
        self.post_process.validate()?;
        if self.mask_every_n_frames == 0 {
            return Err(MatteError::config("mask_every_n_frames must be at least 1"));
        }
        Ok(())
    }
}
