use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camola_matte::engine::{InferenceCompletion, InferenceRequest, SegmentationEngine, Submission};
use camola_matte::{
    ChromaKeyModel, CompletionMode, Frame, MaskFormat, MatteError, Pipeline, PipelineConfig,
    PipelineState, PixelFormat, ProbabilityMap, QualityTier, Result, SegmentationModel,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Counters {
    calls: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl Counters {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

/// Answers every frame with the same probability
struct Constant {
    value: f32,
    counters: Counters,
}

impl Constant {
    fn new(value: f32) -> (Self, Counters) {
        let counters = Counters::default();
        let model = Self {
            value,
            counters: counters.clone(),
        };
        (model, counters)
    }
}

impl SegmentationModel for Constant {
    fn segment(&mut self, _frame: &RgbImage, _tier: QualityTier) -> Result<ProbabilityMap> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProbabilityMap::filled(16, 9, self.value))
    }

    fn reset_state(&mut self) {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn input_size(&self, _tier: QualityTier) -> (u32, u32) {
        (16, 9)
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Plays back a fixed list of results
struct Scripted {
    results: VecDeque<Result<ProbabilityMap>>,
}

impl SegmentationModel for Scripted {
    fn segment(&mut self, _frame: &RgbImage, _tier: QualityTier) -> Result<ProbabilityMap> {
        self.results
            .pop_front()
            .unwrap_or_else(|| Err(MatteError::inference("script exhausted")))
    }

    fn input_size(&self, _tier: QualityTier) -> (u32, u32) {
        (8, 8)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Holds every inference until the test releases it
struct Gated {
    value: f32,
    release: Receiver<()>,
    calls: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

struct Gate {
    release: Sender<()>,
    calls: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl Gated {
    fn new(value: f32) -> (Self, Gate) {
        let (release_tx, release_rx) = unbounded();
        let calls = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let model = Self {
            value,
            release: release_rx,
            calls: Arc::clone(&calls),
            resets: Arc::clone(&resets),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::clone(&max_active),
        };
        let gate = Gate {
            release: release_tx,
            calls,
            resets,
            max_active,
        };
        (model, gate)
    }
}

impl SegmentationModel for Gated {
    fn segment(&mut self, _frame: &RgbImage, _tier: QualityTier) -> Result<ProbabilityMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let released = self.release.recv();
        self.active.fetch_sub(1, Ordering::SeqCst);
        released.map_err(|_| MatteError::inference("gate closed"))?;
        Ok(ProbabilityMap::filled(4, 4, self.value))
    }

    fn reset_state(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn input_size(&self, _tier: QualityTier) -> (u32, u32) {
        (4, 4)
    }

    fn name(&self) -> &str {
        "gated"
    }
}

impl Gate {
    fn open_once(&self) {
        self.release.send(()).unwrap();
    }
}

/// Engine that turns every request away
struct Refusing;

impl SegmentationEngine for Refusing {
    fn mode(&self) -> CompletionMode {
        CompletionMode::Callback
    }

    fn submit(&mut self, request: InferenceRequest) -> Submission {
        Submission::Rejected {
            request,
            reason: MatteError::unavailable("engine is saturated"),
        }
    }

    fn poll(&mut self) -> Option<InferenceCompletion> {
        None
    }

    fn wait(&self, _timeout: Duration) -> bool {
        false
    }

    fn reset(&mut self) {}

    fn name(&self) -> &str {
        "refusing"
    }
}

fn blocking() -> PipelineConfig {
    PipelineConfig::default()
}

fn callback() -> PipelineConfig {
    PipelineConfig {
        completion: CompletionMode::Callback,
        ..PipelineConfig::default()
    }
}

fn rgba(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    pixel.repeat((width * height) as usize)
}

fn all(mask: &[u8], level: u8) -> bool {
    mask.iter().all(|&v| v == level)
}

#[test]
fn mask_always_matches_frame_size() {
    for mask_format in [MaskFormat::Gray8, MaskFormat::Bgra8] {
        let (model, _) = Constant::new(0.5);
        let config = PipelineConfig {
            mask_format,
            ..blocking()
        };
        let mut pipeline = Pipeline::new(model, config).unwrap();
        let bpp = mask_format.pixel_format().bytes_per_pixel();

        for (width, height) in [(1, 1), (3, 7), (64, 36), (640, 480), (5, 5)] {
            let frame = rgba(width, height, [10, 20, 30, 255]);
            let mask = pipeline.process(&frame, width, height, PixelFormat::Rgba8);
            assert_eq!(mask.len(), (width * height) as usize * bpp);
        }
    }
}

#[test]
fn blocking_mode_returns_fresh_composite() {
    let frame = rgba(256, 256, [255, 255, 255, 255]);

    let (model, _) = Constant::new(0.0);
    let mut pipeline = Pipeline::new(model, blocking()).unwrap();
    let mask = pipeline.process(&frame, 256, 256, PixelFormat::Rgba8);
    assert_eq!(mask.len(), 256 * 256);
    assert!(all(&mask, 255));
    assert_eq!(pipeline.state(), PipelineState::ResultReady);

    let (model, _) = Constant::new(1.0);
    let mut pipeline = Pipeline::new(model, blocking()).unwrap();
    let mask = pipeline.process(&frame, 256, 256, PixelFormat::Rgba8);
    assert!(all(&mask, 0));
    assert_eq!(pipeline.stats().fallbacks, 0);
}

#[test]
fn first_callback_frame_gets_fallback() {
    let (model, gate) = Gated::new(1.0);
    let mut pipeline = Pipeline::new(model, callback()).unwrap();
    let frame = rgba(32, 24, [0, 0, 0, 255]);

    let mask = pipeline.process(&frame, 32, 24, PixelFormat::Rgba8);
    assert_eq!(mask.len(), 32 * 24);
    assert!(all(&mask, 255));
    assert_eq!(pipeline.state(), PipelineState::RequestInFlight);

    gate.open_once();
    assert!(pipeline.wait_for_result(WAIT));

    let mask = pipeline.process(&frame, 32, 24, PixelFormat::Rgba8);
    assert!(all(&mask, 0));
    assert_eq!(pipeline.stats().composited, 1);
    assert_eq!(pipeline.stats().fallbacks, 1);

    drop(gate);
    drop(pipeline);
}

#[test]
fn size_change_mid_request_falls_back() {
    let (model, gate) = Gated::new(1.0);
    let mut pipeline = Pipeline::new(model, callback()).unwrap();
    let small = rgba(100, 100, [0, 0, 0, 255]);
    let large = rgba(200, 200, [0, 0, 0, 255]);

    pipeline.process(&small, 100, 100, PixelFormat::Rgba8);
    let mask = pipeline.process(&large, 200, 200, PixelFormat::Rgba8);
    assert_eq!(mask.len(), 200 * 200);
    assert!(all(&mask, 255));
    assert_eq!(pipeline.stats().submitted, 1);
    assert_eq!(pipeline.stats().busy_skips, 1);

    // The 100x100 result lands after the stream moved on
    gate.open_once();
    assert!(pipeline.wait_for_result(WAIT));
    let mask = pipeline.process(&large, 200, 200, PixelFormat::Rgba8);
    assert!(all(&mask, 255));
    assert_eq!(pipeline.stats().dimension_mismatches, 1);
    assert_eq!(pipeline.stats().submitted, 2);
    assert_eq!(pipeline.state(), PipelineState::RequestInFlight);

    gate.open_once();
    assert!(pipeline.wait_for_result(WAIT));
    let mask = pipeline.process(&large, 200, 200, PixelFormat::Rgba8);
    assert!(all(&mask, 0));
    assert_eq!(pipeline.latest_extent(), Some(camola_matte::Extent::new(200, 200)));

    drop(gate);
    drop(pipeline);
}

#[test]
fn size_changes_never_stall_callback_mode() {
    let (model, gate) = Gated::new(1.0);
    let mut pipeline = Pipeline::new(model, callback()).unwrap();
    pipeline.process(&rgba(8, 8, [0; 4]), 8, 8, PixelFormat::Rgba8);

    for (width, height) in [(16, 16), (8, 8), (16, 16), (8, 8)] {
        let frame = rgba(width, height, [0; 4]);
        let start = Instant::now();
        let mask = pipeline.process(&frame, width, height, PixelFormat::Rgba8);
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(mask.len(), (width * height) as usize);
        assert!(all(&mask, 255));
    }
    let stats = pipeline.stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.busy_skips, 4);
    assert_eq!(stats.inference_failures, 0);
    assert_eq!(gate.resets.load(Ordering::SeqCst), 0);

    gate.open_once();
    assert!(pipeline.wait_for_result(WAIT));
    let mask = pipeline.process(&rgba(8, 8, [0; 4]), 8, 8, PixelFormat::Rgba8);
    assert!(all(&mask, 0));
    assert_eq!(pipeline.stats().submitted, 2);

    // The four size changes collapse into one reset before the next inference
    gate.open_once();
    assert!(pipeline.wait_for_result(WAIT));
    assert_eq!(gate.resets.load(Ordering::SeqCst), 1);

    drop(gate);
    drop(pipeline);
}

#[test]
fn rejected_requests_fall_back_and_recycle_input() {
    let mut pipeline = Pipeline::with_engine(Box::new(Refusing), callback()).unwrap();
    assert_eq!(pipeline.engine_name(), "refusing");
    assert_eq!(pipeline.config().completion, CompletionMode::Callback);

    let frame = rgba(8, 8, [0; 4]);
    for _ in 0..3 {
        let mask = pipeline.process(&frame, 8, 8, PixelFormat::Rgba8);
        assert!(all(&mask, 255));
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    let stats = pipeline.stats();
    assert_eq!(stats.submitted, 0);
    assert_eq!(stats.inference_failures, 3);
    assert_eq!(stats.fallbacks, 3);
    assert_eq!(pipeline.pool_allocations(), 1);
}

#[test]
fn at_most_one_request_in_flight() {
    let (model, gate) = Gated::new(0.5);
    let mut pipeline = Pipeline::new(model, callback()).unwrap();
    let frame = rgba(16, 16, [0, 0, 0, 255]);

    for _ in 0..10 {
        let mask = pipeline.process(&frame, 16, 16, PixelFormat::Rgba8);
        assert_eq!(mask.len(), 16 * 16);
    }
    let stats = pipeline.stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.busy_skips, 9);

    for _ in 0..20 {
        gate.open_once();
        assert!(pipeline.wait_for_result(WAIT));
        pipeline.process(&frame, 16, 16, PixelFormat::Rgba8);
    }

    assert_eq!(gate.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.stats().composited, 20);
    assert!(gate.calls.load(Ordering::SeqCst) <= pipeline.stats().submitted as usize);

    drop(gate);
    drop(pipeline);
}

#[test]
fn failed_inference_keeps_previous_mask() {
    let model = Scripted {
        results: VecDeque::from(vec![
            Ok(ProbabilityMap::filled(8, 8, 1.0)),
            Err(MatteError::inference("model returned no alpha")),
            Ok(ProbabilityMap::filled(8, 8, 0.0)),
        ]),
    };
    let mut pipeline = Pipeline::new(model, blocking()).unwrap();
    let frame = rgba(20, 10, [0, 0, 0, 255]);

    assert!(all(&pipeline.process(&frame, 20, 10, PixelFormat::Rgba8), 0));

    let mask = pipeline.process(&frame, 20, 10, PixelFormat::Rgba8);
    assert!(all(&mask, 0));
    assert_eq!(pipeline.stats().inference_failures, 1);
    assert_eq!(pipeline.state(), PipelineState::ResultReady);

    assert!(all(&pipeline.process(&frame, 20, 10, PixelFormat::Rgba8), 255));
}

#[test]
fn failure_before_any_mask_returns_fallback() {
    let model = Scripted {
        results: VecDeque::new(),
    };
    let mut pipeline = Pipeline::new(model, blocking()).unwrap();
    let frame = rgba(8, 8, [0, 0, 0, 255]);

    let mask = pipeline.process(&frame, 8, 8, PixelFormat::Rgba8);
    assert!(all(&mask, 255));
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.stats().inference_failures, 1);
}

#[test]
fn invalid_buffer_is_dropped_without_failing() {
    let (model, counters) = Constant::new(1.0);
    let mut pipeline = Pipeline::new(model, blocking()).unwrap();

    let short = vec![0u8; 10];
    let mask = pipeline.process(&short, 8, 8, PixelFormat::Rgba8);
    assert_eq!(mask.len(), 64);
    assert!(all(&mask, 255));
    assert_eq!(pipeline.stats().invalid_frames, 1);
    assert_eq!(counters.calls(), 0);

    let mask = pipeline.process(&[], 0, 0, PixelFormat::Bgra8);
    assert!(mask.is_empty());
    assert_eq!(pipeline.stats().invalid_frames, 2);

    // A same-size mask survives a dropped frame
    let frame = rgba(8, 8, [0, 0, 0, 255]);
    assert!(all(&pipeline.process(&frame, 8, 8, PixelFormat::Rgba8), 0));
    assert!(all(&pipeline.process(&short, 8, 8, PixelFormat::Rgba8), 0));
    assert_eq!(counters.calls(), 1);
}

#[test]
fn cadence_skips_inference_between_masks() {
    let (model, counters) = Constant::new(1.0);
    let config = PipelineConfig {
        mask_every_n_frames: 3,
        ..blocking()
    };
    let mut pipeline = Pipeline::new(model, config).unwrap();
    let frame = rgba(12, 12, [0, 0, 0, 255]);

    for _ in 0..7 {
        assert!(all(&pipeline.process(&frame, 12, 12, PixelFormat::Rgba8), 0));
    }
    assert_eq!(counters.calls(), 3);
    assert_eq!(pipeline.stats().cadence_skips, 4);
}

#[test]
fn pool_reallocates_only_on_size_change() {
    let (model, _) = Constant::new(0.5);
    let mut pipeline = Pipeline::new(model, blocking()).unwrap();

    let frame = rgba(64, 48, [0, 0, 0, 255]);
    for _ in 0..10 {
        pipeline.process(&frame, 64, 48, PixelFormat::Rgba8);
    }
    // Converted input plus two mask buffers
    assert_eq!(pipeline.pool_allocations(), 3);

    let frame = rgba(32, 32, [0, 0, 0, 255]);
    for _ in 0..10 {
        pipeline.process(&frame, 32, 32, PixelFormat::Rgba8);
    }
    assert_eq!(pipeline.pool_allocations(), 6);
}

#[test]
fn size_change_and_reset_clear_model_state() {
    let (model, counters) = Constant::new(1.0);
    let mut pipeline = Pipeline::new(model, blocking()).unwrap();

    pipeline.process(&rgba(8, 8, [0; 4]), 8, 8, PixelFormat::Rgba8);
    pipeline.process(&rgba(16, 8, [0; 4]), 16, 8, PixelFormat::Rgba8);
    assert_eq!(counters.resets(), 1);

    let allocations = pipeline.pool_allocations();
    pipeline.reset();
    assert_eq!(counters.resets(), 2);
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.latest_extent(), None);

    let mask = pipeline.process(&rgba(16, 8, [0; 4]), 16, 8, PixelFormat::Rgba8);
    assert!(all(&mask, 0));
    assert_eq!(counters.resets(), 2);
    // Input and mask buffers were released by the reset
    assert_eq!(pipeline.pool_allocations(), allocations + 2);
}

#[test]
fn process_into_checks_output_size() {
    let (model, _) = Constant::new(1.0);
    let mut pipeline = Pipeline::new(model, blocking()).unwrap();
    let frame = rgba(4, 4, [0; 4]);

    let mut wrong = vec![0u8; 15];
    let err = pipeline
        .process_into(&frame, 4, 4, PixelFormat::Rgba8, &mut wrong)
        .unwrap_err();
    assert!(matches!(err, MatteError::InvalidBuffer(_)));
    assert_eq!(pipeline.stats().frames, 0);

    let mut out = vec![7u8; 16];
    pipeline
        .process_into(&frame, 4, 4, PixelFormat::Rgba8, &mut out)
        .unwrap();
    assert!(all(&out, 0));
}

#[test]
fn padded_rows_are_accepted() {
    let (model, counters) = Constant::new(1.0);
    let mut pipeline = Pipeline::new(model, blocking()).unwrap();

    // 6x3 BGRA with 8 bytes of row padding
    let stride = 6 * 4 + 8;
    let data = vec![90u8; stride * 3];
    let frame = Frame::wrap_with_stride(&data, 6, 3, PixelFormat::Bgra8, stride).unwrap();

    let mut out = vec![0u8; 18];
    pipeline.process_frame(&frame, &mut out).unwrap();
    assert!(all(&out, 0));
    assert_eq!(counters.calls(), 1);
}

#[test]
fn chroma_key_separates_backdrop_from_subject() {
    let config = PipelineConfig {
        quality_tier: QualityTier::Accurate,
        ..blocking()
    };
    let mut pipeline = Pipeline::new(ChromaKeyModel::green_screen(), config).unwrap();

    let green = rgba(64, 36, [0, 255, 0, 255]);
    assert!(all(&pipeline.process(&green, 64, 36, PixelFormat::Rgba8), 255));

    // Red in BGRA byte order
    let red = rgba(64, 36, [0, 0, 255, 255]);
    assert!(all(&pipeline.process(&red, 64, 36, PixelFormat::Bgra8), 0));
}

#[test]
fn invalid_config_is_rejected() {
    let (model, _) = Constant::new(0.0);
    let config = PipelineConfig {
        mask_every_n_frames: 0,
        ..blocking()
    };
    assert!(matches!(
        Pipeline::new(model, config),
        Err(MatteError::Config(_))
    ));
}
