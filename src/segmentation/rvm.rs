use super::preprocess::Preprocessor;
use super::types::{ProbabilityMap, SegmentationModel};
use crate::config::QualityTier;
use crate::error::{MatteError, Result};
use image::RgbImage;
use ndarray::{Array1, ArrayD, IxDyn};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency
/// Hidden states (r1-r4) are carried between frames for smooth results
pub struct RobustVideoMatting {
    session: Session,

    // Recurrent hidden states, fed back on the next frame
    recurrent: Option<[ArrayD<f32>; 4]>,

    // Tier the hidden states were produced at
    tier: Option<QualityTier>,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Self::build_session(path).map_err(|e| {
            MatteError::unavailable(format!("failed to load {}: {}", path.display(), e))
        })?;

        tracing::info!("RVM model loaded successfully");

        Ok(Self {
            session,
            recurrent: None,
            tier: None,
        })
    }

    // Builder errors carry the builder back, so flatten them to text
    fn build_session(path: &Path) -> std::result::Result<Session, String> {
        Session::builder()
            .map_err(|e| e.to_string())?
            .with_execution_providers(Self::execution_providers())
            .map_err(|e| e.to_string())?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| e.to_string())?
            .with_intra_threads(4)
            .map_err(|e| e.to_string())?
            .commit_from_file(path)
            .map_err(|e| e.to_string())
    }

    /// Providers in order of preference; ONNX Runtime falls back down the list
    #[allow(unused_mut)]
    fn execution_providers() -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();

        #[cfg(feature = "tensorrt")]
        {
            use ort::execution_providers::TensorRTExecutionProvider;
            tracing::info!("Registering TensorRT execution provider");
            providers.push(TensorRTExecutionProvider::default().build());
        }

        #[cfg(feature = "cuda")]
        {
            use ort::execution_providers::CUDAExecutionProvider;
            tracing::info!("Registering CUDA execution provider");
            providers.push(CUDAExecutionProvider::default().build());
        }

        providers.push(CPUExecutionProvider::default().build());
        providers
    }

    /// Input edge length and hidden-state downsample ratio per tier
    const fn geometry(tier: QualityTier) -> (u32, f32) {
        match tier {
            QualityTier::Fast => (256, 0.25),
            QualityTier::Accurate => (512, 0.375),
        }
    }

    /// RVM accepts 1x1x1x1 zero tensors as the initial recurrent state
    fn initial_state() -> [ArrayD<f32>; 4] {
        std::array::from_fn(|_| ArrayD::zeros(IxDyn(&[1, 1, 1, 1])))
    }
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbImage, tier: QualityTier) -> Result<ProbabilityMap> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        // Hidden states are only meaningful at the resolution they were made at
        if self.tier != Some(tier) {
            self.recurrent = None;
            self.tier = Some(tier);
        }
        let recurrent = self.recurrent.take().unwrap_or_else(Self::initial_state);

        let (side, downsample_ratio) = Self::geometry(tier);
        let input_tensor = Preprocessor::new(side, side).preprocess(frame)?;
        let ratio = Array1::from_elem(1, downsample_ratio);

        // RVM expects: src, r1i, r2i, r3i, r4i, downsample_ratio
        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![
                TensorRef::from_array_view(input_tensor.view())?,
                TensorRef::from_array_view(recurrent[0].view())?,
                TensorRef::from_array_view(recurrent[1].view())?,
                TensorRef::from_array_view(recurrent[2].view())?,
                TensorRef::from_array_view(recurrent[3].view())?,
                TensorRef::from_array_view(ratio.view())?
            ])
            .map_err(|e| MatteError::inference(e.to_string()))?;
        drop(_infer_span);

        if outputs.len() < 6 {
            return Err(MatteError::inference(format!(
                "RVM returned {} outputs, expected 6",
                outputs.len()
            )));
        }

        // Outputs: fgr, pha, r1o, r2o, r3o, r4o
        let matte = Preprocessor::matte_from_tensor(outputs[1].try_extract_array::<f32>()?)?;
        let next_state = [
            outputs[2].try_extract_array::<f32>()?.to_owned(),
            outputs[3].try_extract_array::<f32>()?.to_owned(),
            outputs[4].try_extract_array::<f32>()?.to_owned(),
            outputs[5].try_extract_array::<f32>()?.to_owned(),
        ];
        drop(outputs);
        self.recurrent = Some(next_state);

        Ok(matte)
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.recurrent = None;
    }

    fn input_size(&self, tier: QualityTier) -> (u32, u32) {
        let (side, _) = Self::geometry(tier);
        (side, side)
    }

    fn name(&self) -> &str {
        "robust-video-matting"
    }
}
