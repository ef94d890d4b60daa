use std::time::Duration;

use super::{InferenceCompletion, InferenceRequest, SegmentationEngine, Submission};
use crate::config::CompletionMode;
use crate::segmentation::SegmentationModel;

/// Runs the model on the caller's thread
pub struct BlockingEngine<M> {
    model: M,
}

impl<M: SegmentationModel> BlockingEngine<M> {
    pub fn new(model: M) -> Self {
        tracing::info!("Blocking engine using {}", model.name());
        Self { model }
    }

    pub fn into_inner(self) -> M {
        self.model
    }
}

impl<M: SegmentationModel> SegmentationEngine for BlockingEngine<M> {
    fn mode(&self) -> CompletionMode {
        CompletionMode::Blocking
    }

    fn submit(&mut self, request: InferenceRequest) -> Submission {
        let _span = tracing::debug_span!("blocking_inference", id = request.id).entered();
        let result = self.model.segment(&request.image, request.tier);
        Submission::Completed(request.complete(result))
    }

    fn poll(&mut self) -> Option<InferenceCompletion> {
        None
    }

    fn wait(&self, _timeout: Duration) -> bool {
        false
    }

    fn reset(&mut self) {
        self.model.reset_state();
    }

    fn name(&self) -> &str {
        self.model.name()
    }
}
