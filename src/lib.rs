//! Person segmentation masks for live video.
//!
//! A host hands each frame to [`Pipeline::process`] and gets back a mask of
//! the same size, separating the subject from the background. Inference is
//! delegated to a [`SegmentationModel`], run either on the caller's thread
//! or on an engine worker; the pipeline always answers with a validly sized
//! mask, falling back to all-background when nothing better is available.
//!
//! ```no_run
//! use camola_matte::{ChromaKeyModel, Pipeline, PipelineConfig, PixelFormat};
//!
//! let mut pipeline = Pipeline::new(ChromaKeyModel::green_screen(), PipelineConfig::default())?;
//! let frame = vec![0u8; 1280 * 720 * 4];
//! let mask = pipeline.process(&frame, 1280, 720, PixelFormat::Bgra8);
//! assert_eq!(mask.len(), 1280 * 720);
//! # Ok::<(), camola_matte::MatteError>(())
//! ```

pub mod compositor;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod pool;
pub mod segmentation;

pub use compositor::{Mask, MaskCompositor};
pub use config::{
    CompletionMode, MaskFormat, MaskPolarity, PipelineConfig, PostProcess, QualityTier,
};
pub use error::{MatteError, Result};
pub use frame::{Extent, Frame, PixelFormat};
pub use pipeline::{Pipeline, PipelineState, PipelineStats};
pub use segmentation::{ChromaKeyModel, ProbabilityMap, SegmentationModel};
