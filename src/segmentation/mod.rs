mod chroma;
mod preprocess;
#[cfg(feature = "onnx")]
mod rvm;
pub mod types;

pub use chroma::ChromaKeyModel;
pub use preprocess::Preprocessor;
#[cfg(feature = "onnx")]
pub use rvm::RobustVideoMatting;
pub use types::{ProbabilityMap, SegmentationModel};

/// Create the default ONNX segmentation model (RVM)
#[cfg(feature = "onnx")]
pub fn create_default_model(
    model_path: &std::path::Path,
) -> crate::error::Result<Box<dyn SegmentationModel>> {
    let model = RobustVideoMatting::new(model_path)?;
    Ok(Box::new(model))
}
