use anyhow::{Context, Result};
use camola_matte::{
    ChromaKeyModel, CompletionMode, MaskFormat, MaskPolarity, Pipeline, PipelineConfig, PixelFormat,
    PostProcess, QualityTier, SegmentationModel,
};
use clap::Parser;
use image::{GrayImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Frames to process, in order
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory the masks are written to
    #[arg(short, long, default_value = "masks")]
    output_dir: PathBuf,

    /// Path to segmentation model (ONNX file)
    /// If not provided, keys out --key-color instead
    #[arg(long)]
    model: Option<PathBuf>,

    /// Inference quality tier
    #[arg(long, value_enum, default_value_t = QualityTier::Fast)]
    quality: QualityTier,

    /// Run inference on the calling thread or on an engine worker
    #[arg(long, value_enum, default_value_t = CompletionMode::Blocking)]
    completion: CompletionMode,

    /// Mask pixel layout
    #[arg(long, value_enum, default_value_t = MaskFormat::Gray8)]
    mask_format: MaskFormat,

    /// Which side of the mask is dark
    #[arg(long, value_enum, default_value_t = MaskPolarity::SubjectDark)]
    polarity: MaskPolarity,

    /// Binarise the mask at this foreground probability
    #[arg(long)]
    threshold: Option<f32>,

    /// Drop thresholded regions smaller than this fraction of the frame
    #[arg(long, default_value_t = 0.05)]
    contour_filter: f32,

    /// Smooth the thresholded contour, 0 disables
    #[arg(long, default_value_t = 0.5)]
    smooth_contour: f32,

    /// Grow and soften the thresholded edge, 0 disables
    #[arg(long, default_value_t = 0.0)]
    feather: f32,

    /// Only run inference every N frames
    #[arg(long, default_value_t = 1)]
    mask_every: u32,

    /// Backdrop colour for the chroma key model, as RRGGBB
    #[arg(long, default_value = "00ff00", value_parser = parse_key_color)]
    key_color: [u8; 3],

    /// Chroma key distance treated as backdrop
    #[arg(long, default_value_t = 0.3)]
    tolerance: f32,

    /// Chroma key ramp width between backdrop and subject
    #[arg(long, default_value_t = 0.1)]
    softness: f32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Number of passes over the input frames
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn parse_key_color(value: &str) -> std::result::Result<[u8; 3], String> {
    let hex = value.trim_start_matches('#');
    if hex.len() != 6 {
        return Err(format!("expected RRGGBB, got {:?}", value));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("{:?}: {}", value, e))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Camola matte starting");
    tracing::info!("Inputs: {} frame(s) x {} loop(s)", args.inputs.len(), args.loops);
    tracing::info!("Target FPS: {}", args.fps);

    let frames = load_frames(&args.inputs)?;

    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("Failed to create output directory {}", args.output_dir.display())
    })?;

    let model = create_model(&args)?;
    let config = PipelineConfig {
        quality_tier: args.quality,
        completion: args.completion,
        mask_format: args.mask_format,
        polarity: args.polarity,
        threshold: args.threshold,
        post_process: PostProcess {
            contour_filter: args.contour_filter,
            smooth_contour: args.smooth_contour,
            feather: args.feather,
        },
        mask_every_n_frames: args.mask_every,
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(model, config).context("Failed to build mask pipeline")?;
    tracing::info!("Segmenting with {}", pipeline.engine_name());

    run_pipeline(&mut pipeline, &frames, &args)?;

    Ok(())
}

fn load_frames(paths: &[PathBuf]) -> Result<Vec<RgbaImage>> {
    paths
        .iter()
        .map(|path| {
            let frame = image::open(path)
                .with_context(|| format!("Failed to read frame {}", path.display()))?
                .to_rgba8();
            tracing::debug!("Loaded {} ({}x{})", path.display(), frame.width(), frame.height());
            Ok(frame)
        })
        .collect()
}

fn create_model(args: &Args) -> Result<Box<dyn SegmentationModel>> {
    match &args.model {
        Some(path) => load_onnx_model(path),
        None => {
            tracing::info!(
                "No model given, chroma keying #{:02x}{:02x}{:02x}",
                args.key_color[0],
                args.key_color[1],
                args.key_color[2]
            );
            let model = ChromaKeyModel::new(args.key_color, args.tolerance, args.softness)
                .context("Invalid chroma key settings")?;
            Ok(Box::new(model))
        }
    }
}

#[cfg(feature = "onnx")]
fn load_onnx_model(path: &Path) -> Result<Box<dyn SegmentationModel>> {
    tracing::info!("Loading segmentation model from {}", path.display());
    let model = camola_matte::segmentation::create_default_model(path)
        .context("Failed to load segmentation model")?;
    tracing::info!("Segmentation model loaded successfully");
    Ok(model)
}

#[cfg(not(feature = "onnx"))]
fn load_onnx_model(path: &Path) -> Result<Box<dyn SegmentationModel>> {
    anyhow::bail!(
        "Cannot load {}: built without the `onnx` feature",
        path.display()
    )
}

fn run_pipeline(pipeline: &mut Pipeline, frames: &[RgbaImage], args: &Args) -> Result<()> {
    let frame_duration = Duration::from_secs_f32(1.0 / args.fps.max(1) as f32);
    let mut frame_count = 0u64;
    let mut total_process_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;

    tracing::info!("Starting mask pipeline loop");

    for _ in 0..args.loops {
        for frame in frames {
            let loop_start = Instant::now();
            let (width, height) = frame.dimensions();

            let process_start = Instant::now();
            let mask = pipeline.process(frame.as_raw(), width, height, PixelFormat::Rgba8);
            total_process_time += process_start.elapsed();

            frame_count += 1;

            let output_start = Instant::now();
            let path = args.output_dir.join(format!("mask_{:05}.png", frame_count));
            write_mask(&path, mask, width, height, args.mask_format)?;
            total_output_time += output_start.elapsed();

            // Log stats every 30 frames
            if frame_count % 30 == 0 {
                let avg_process_ms = total_process_time.as_secs_f64() * 1000.0 / frame_count as f64;
                let avg_output_ms = total_output_time.as_secs_f64() * 1000.0 / frame_count as f64;
                tracing::info!(
                    "Frame {}: process={:.1}ms, output={:.1}ms, state={:?}",
                    frame_count,
                    avg_process_ms,
                    avg_output_ms,
                    pipeline.state()
                );
            }

            // Frame rate limiting
            let elapsed = loop_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }
    }

    let stats = pipeline.stats();
    tracing::info!(
        "Done: {} frames, {} composited, {} fallbacks, masks in {}",
        stats.frames,
        stats.composited,
        stats.fallbacks,
        args.output_dir.display()
    );

    Ok(())
}

fn write_mask(path: &Path, mask: Vec<u8>, width: u32, height: u32, format: MaskFormat) -> Result<()> {
    match format {
        MaskFormat::Gray8 => GrayImage::from_raw(width, height, mask)
            .context("Mask size does not match frame")?
            .save(path),
        // Gray levels are replicated, so BGRA and RGBA coincide
        MaskFormat::Bgra8 => RgbaImage::from_raw(width, height, mask)
            .context("Mask size does not match frame")?
            .save(path),
    }
    .with_context(|| format!("Failed to write {}", path.display()))
}
