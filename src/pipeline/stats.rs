/// Counters describing what the coordinator did with each frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames handed to `process`
    pub frames: u64,
    /// Inference requests accepted by the engine
    pub submitted: u64,
    /// Completions that produced a new mask
    pub composited: u64,
    /// Frames not submitted because a request was in flight
    pub busy_skips: u64,
    /// Frames not submitted because of `mask_every_n_frames`
    pub cadence_skips: u64,
    /// Frames answered with the all-background mask
    pub fallbacks: u64,
    /// Completions with no usable result
    pub inference_failures: u64,
    /// Stored masks dropped because the frame size changed
    pub dimension_mismatches: u64,
    /// Frames rejected by the buffer adapter
    pub invalid_frames: u64,
}

impl PipelineStats {
    pub(crate) fn log_summary(&self) {
        tracing::info!(
            "Frame {}: submitted={}, composited={}, busy={}, cadence={}, fallback={}, failed={}, resized={}, invalid={}",
            self.frames,
            self.submitted,
            self.composited,
            self.busy_skips,
            self.cadence_skips,
            self.fallbacks,
            self.inference_failures,
            self.dimension_mismatches,
            self.invalid_frames
        );
    }
}
