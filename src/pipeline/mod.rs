//! Pipeline coordinator.
//!
//! Sits between the host's synchronous `process(frame) -> mask` contract
//! and the engine's possibly asynchronous completion. Per frame it:
//!
//! 1. collects a finished inference, if any, and composites it into the
//!    latest mask,
//! 2. drops the latest mask if its size no longer matches the frame,
//! 3. submits the frame unless a request is already in flight (single-slot
//!    backpressure) or the mask cadence says to skip it,
//! 4. answers with the latest mask when it matches the frame's size, or
//!    the all-background fallback otherwise.
//!
//! `process` never fails and never returns an unwritten buffer.

mod stats;

pub use stats::PipelineStats;

use std::time::Duration;

use image::RgbImage;

use crate::compositor::{Mask, MaskCompositor};
use crate::config::{CompletionMode, PipelineConfig};
use crate::engine::{
    BlockingEngine, CallbackEngine, InferenceCompletion, InferenceRequest, SegmentationEngine,
    Submission,
};
use crate::error::{MatteError, Result};
use crate::frame::{Extent, Frame, PixelFormat};
use crate::pool::{BufferHeader, BufferRole, PixelBufferPool, PooledBuffer};
use crate::segmentation::SegmentationModel;

/// Lifecycle of the pipeline's single mask slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No request outstanding and no mask yet
    Idle,
    /// A request has been handed to the engine and not yet collected
    RequestInFlight,
    /// A mask is available and nothing is outstanding
    ResultReady,
}

/// Bookkeeping for the outstanding request
#[derive(Debug)]
struct InFlight {
    id: u64,
    input: BufferHeader,
}

/// Frame-to-mask coordinator
pub struct Pipeline {
    config: PipelineConfig,
    engine: Box<dyn SegmentationEngine>,
    compositor: MaskCompositor,
    pool: PixelBufferPool,
    state: PipelineState,
    in_flight: Option<InFlight>,
    latest: Option<Mask>,
    stream_extent: Option<Extent>,
    next_request_id: u64,
    frames_since_submit: u32,
    stats: PipelineStats,
}

impl Pipeline {
    /// Build a pipeline around `model` using the configured completion mode
    pub fn new<M>(model: M, config: PipelineConfig) -> Result<Self>
    where
        M: SegmentationModel + 'static,
    {
        config.validate()?;
        let engine: Box<dyn SegmentationEngine> = match config.completion {
            CompletionMode::Blocking => Box::new(BlockingEngine::new(model)),
            CompletionMode::Callback => Box::new(CallbackEngine::spawn(model)?),
        };
        Self::with_engine(engine, config)
    }

    /// Build a pipeline around an already constructed engine
    pub fn with_engine(engine: Box<dyn SegmentationEngine>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let compositor = MaskCompositor::from_config(&config)?;

        if engine.mode() != config.completion {
            tracing::warn!(
                "Engine {} completes {:?} but {:?} was configured",
                engine.name(),
                engine.mode(),
                config.completion
            );
        }
        tracing::info!(
            "Pipeline ready: engine={}, completion={:?}, tier={:?}, mask={}",
            engine.name(),
            engine.mode(),
            config.quality_tier,
            compositor.format()
        );

        Ok(Self {
            config,
            engine,
            compositor,
            pool: PixelBufferPool::new(),
            state: PipelineState::Idle,
            in_flight: None,
            latest: None,
            stream_extent: None,
            next_request_id: 1,
            frames_since_submit: 0,
            stats: PipelineStats::default(),
        })
    }

    /// Process one host frame and return its mask
    ///
    /// The result is always `width * height * bytes_per_pixel(mask_format)`
    /// bytes: a fresh composite, the latest same-size mask, or the
    /// all-background fallback
    pub fn process(&mut self, pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Vec<u8> {
        let extent = Extent::new(width, height);
        let mut mask = vec![0; self.compositor.mask_len(extent)];
        self.run(Frame::wrap(pixels, width, height, format), extent, &mut mask);
        mask
    }

    /// Like [`process`](Self::process), writing into a caller-owned buffer
    ///
    /// Fails only if `out` is not exactly the mask size for this frame
    pub fn process_into(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> Result<()> {
        let extent = Extent::new(width, height);
        self.check_output(extent, out)?;
        self.run(Frame::wrap(pixels, width, height, format), extent, out);
        Ok(())
    }

    /// Process a frame the host has already wrapped, e.g. with a row stride
    pub fn process_frame(&mut self, frame: &Frame<'_>, out: &mut [u8]) -> Result<()> {
        self.check_output(frame.extent(), out)?;
        self.run(Ok(*frame), frame.extent(), out);
        Ok(())
    }

    /// Wait up to `timeout` for the outstanding request to finish
    ///
    /// Returns `true` when nothing is outstanding or its completion is
    /// ready to be collected by the next `process` call
    pub fn wait_for_result(&self, timeout: Duration) -> bool {
        self.state != PipelineState::RequestInFlight || self.engine.wait(timeout)
    }

    /// Forget the latest mask and any model state, e.g. when switching cameras
    pub fn reset(&mut self) {
        tracing::info!("Resetting pipeline");
        // An outstanding input buffer is still reclaimed when its completion lands
        self.latest = None;
        self.pool.clear();
        self.stream_extent = None;
        self.engine.reset();
        self.settle();
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Extent of the latest mask, if one is stored
    pub fn latest_extent(&self) -> Option<Extent> {
        self.latest.as_ref().map(Mask::extent)
    }

    /// Pixel buffers allocated so far
    pub fn pool_allocations(&self) -> u64 {
        self.pool.allocations()
    }

    fn check_output(&self, extent: Extent, out: &[u8]) -> Result<()> {
        let expected = self.compositor.mask_len(extent);
        if out.len() != expected {
            return Err(MatteError::invalid_buffer(format!(
                "{} {} mask needs {} bytes, output holds {}",
                extent,
                self.compositor.format(),
                expected,
                out.len()
            )));
        }
        Ok(())
    }

    fn run(&mut self, frame: Result<Frame<'_>>, extent: Extent, out: &mut [u8]) {
        self.stats.frames += 1;
        let _span = tracing::debug_span!("process", frame = self.stats.frames).entered();

        self.collect_completion();

        match frame {
            Ok(frame) => self.ingest(&frame),
            Err(e) => {
                self.stats.invalid_frames += 1;
                tracing::warn!("Dropping frame {}: {}", self.stats.frames, e);
            }
        }

        self.emit(extent, out);

        let interval = self.config.stats_interval;
        if interval > 0 && self.stats.frames % interval == 0 {
            self.stats.log_summary();
        }
    }

    fn collect_completion(&mut self) {
        if self.state != PipelineState::RequestInFlight {
            return;
        }
        if let Some(completion) = self.engine.poll() {
            self.complete(completion);
        }
    }

    fn ingest(&mut self, frame: &Frame<'_>) {
        let extent = frame.extent();
        if let Some(previous) = self.stream_extent.replace(extent) {
            if previous != extent {
                tracing::info!("Frame size changed from {} to {}", previous, extent);
                self.engine.reset();
            }
        }
        self.discard_mismatched(extent);

        match self.state {
            PipelineState::RequestInFlight => {
                self.stats.busy_skips += 1;
                if let Some(in_flight) = &self.in_flight {
                    tracing::debug!("Request {} still in flight, not submitting", in_flight.id);
                }
            }
            PipelineState::Idle | PipelineState::ResultReady => {
                let due = self.frames_since_submit + 1 >= self.config.mask_every_n_frames;
                if self.latest.is_some() && !due {
                    self.frames_since_submit += 1;
                    self.stats.cadence_skips += 1;
                } else {
                    self.submit(frame);
                }
            }
        }
    }

    fn discard_mismatched(&mut self, extent: Extent) {
        let stale = match self.latest.take() {
            Some(mask) if mask.extent() != extent => mask,
            other => {
                self.latest = other;
                return;
            }
        };

        let mismatch = MatteError::DimensionMismatch {
            mask: stale.extent(),
            frame: extent,
        };
        tracing::debug!("Discarding stored mask: {}", mismatch);
        self.stats.dimension_mismatches += 1;
        self.pool.checkin(stale.into_buffer());
        if self.state == PipelineState::ResultReady {
            self.state = PipelineState::Idle;
        }
    }

    fn submit(&mut self, frame: &Frame<'_>) {
        let extent = frame.extent();
        let mut buffer = self
            .pool
            .checkout(BufferRole::InputConverted, extent, PixelFormat::Rgb8);
        if let Err(e) = frame.write_rgb(buffer.data_mut()) {
            tracing::warn!("Could not convert frame: {}", e);
            self.pool.checkin(buffer);
            return;
        }
        let (header, image) = match buffer.into_rgb_image() {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!("Could not hand off input buffer: {}", e);
                return;
            }
        };

        let id = self.next_request_id;
        self.next_request_id += 1;
        let request = InferenceRequest {
            id,
            extent,
            tier: self.config.quality_tier,
            image,
        };

        self.in_flight = Some(InFlight { id, input: header });
        self.state = PipelineState::RequestInFlight;
        self.frames_since_submit = 0;

        match self.engine.submit(request) {
            Submission::Completed(completion) => {
                self.stats.submitted += 1;
                self.complete(completion);
            }
            Submission::Pending => {
                self.stats.submitted += 1;
                tracing::debug!("Request {} submitted for {}", id, extent);
            }
            Submission::Rejected { request, reason } => {
                tracing::warn!("Engine rejected request {}: {}", id, reason);
                self.stats.inference_failures += 1;
                self.in_flight = None;
                self.recycle_input(header, request.image);
                self.settle();
            }
        }
    }

    fn complete(&mut self, completion: InferenceCompletion) {
        let Some(in_flight) = self.in_flight.take() else {
            tracing::warn!("Ignoring completion {} with no request in flight", completion.id);
            return;
        };
        if in_flight.id != completion.id {
            tracing::warn!(
                "Completion {} arrived while waiting for {}",
                completion.id,
                in_flight.id
            );
        }
        self.recycle_input(in_flight.input, completion.image);

        let id = completion.id;
        let extent = completion.extent;
        let composited = completion
            .result
            .and_then(|map| self.compositor.composite(&mut self.pool, extent, &map));

        match composited {
            Ok(mask) => {
                tracing::debug!("Request {} composited at {}", id, extent);
                if let Some(previous) = self.latest.replace(mask) {
                    self.pool.checkin(previous.into_buffer());
                }
                self.stats.composited += 1;
            }
            Err(e) => {
                self.stats.inference_failures += 1;
                tracing::warn!("No mask update from request {}: {}", id, e);
            }
        }
        self.settle();
    }

    fn recycle_input(&mut self, header: BufferHeader, image: RgbImage) {
        if let Some(buffer) = PooledBuffer::reclaim(header, image.into_raw()) {
            self.pool.checkin(buffer);
        }
    }

    /// Pick the resting state once nothing is outstanding
    fn settle(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        self.state = if self.latest.is_some() {
            PipelineState::ResultReady
        } else {
            PipelineState::Idle
        };
    }

    fn emit(&mut self, extent: Extent, out: &mut [u8]) {
        match &self.latest {
            Some(mask) if mask.extent() == extent => out.copy_from_slice(mask.as_bytes()),
            _ => {
                self.compositor.fill_background(out);
                self.stats.fallbacks += 1;
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        tracing::debug!("Pipeline shutting down");
        self.stats.log_summary();
    }
}
