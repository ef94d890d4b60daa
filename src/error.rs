//! Error types for the mask pipeline

use crate::frame::{Extent, PixelFormat};
use thiserror::Error;

/// Result type alias for the mask pipeline
pub type Result<T> = std::result::Result<T, MatteError>;

/// Errors raised inside the frame-to-mask pipeline
///
/// None of these cross [`Pipeline::process`](crate::pipeline::Pipeline::process);
/// the coordinator logs them and falls back to the best valid mask
#[derive(Error, Debug)]
pub enum MatteError {
    #[error("Invalid buffer: {0}")]
    InvalidBuffer(String),

    #[error("Unsupported pixel format {format} for {usage}")]
    UnsupportedFormat {
        format: PixelFormat,
        usage: &'static str,
    },

    #[error("Degenerate extent: {0}")]
    DegenerateExtent(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Mask is {mask} but frame is {frame}")]
    DimensionMismatch { mask: Extent, frame: Extent },

    #[error("Segmentation engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
}

impl MatteError {
    pub fn invalid_buffer<S: Into<String>>(msg: S) -> Self {
        Self::InvalidBuffer(msg.into())
    }

    pub fn degenerate<S: Into<String>>(msg: S) -> Self {
        Self::DegenerateExtent(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::InferenceFailed(msg.into())
    }

    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::EngineUnavailable(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}
