//! Mask compositing.
//!
//! Rescales an engine probability map onto the frame's extent with linear
//! interpolation and blends the subject and background reference levels
//! by it. Output is a pure function of `(extent, map)` and configuration.
//!
//! With a threshold configured the map is binarised at model resolution
//! first, and may be cleaned up (small regions dropped, contour smoothed,
//! edge feathered) before it is scaled to the frame.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

use crate::config::{MaskPolarity, PipelineConfig, PostProcess};
use crate::error::{MatteError, Result};
use crate::frame::{Extent, PixelFormat};
use crate::pool::{BufferRole, PixelBufferPool, PooledBuffer};
use crate::segmentation::ProbabilityMap;

/// Composited mask at frame resolution, backed by a pooled buffer
#[derive(Debug)]
pub struct Mask {
    buffer: PooledBuffer,
}

impl Mask {
    pub fn extent(&self) -> Extent {
        self.buffer.extent()
    }

    pub fn format(&self) -> PixelFormat {
        self.buffer.format()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.data()
    }

    /// Give the backing buffer back, e.g. to return it to the pool
    pub fn into_buffer(self) -> PooledBuffer {
        self.buffer
    }
}

/// Horizontal or vertical sample position in the source map
#[derive(Debug, Clone, Copy)]
struct Tap {
    lo: usize,
    hi: usize,
    frac: f32,
}

impl Tap {
    /// Centre-aligned mapping of destination index `i` through `scale`
    fn new(i: u32, scale: f32, source_len: u32) -> Self {
        let last = (source_len - 1) as f32;
        let pos = ((i as f32 + 0.5) / scale - 0.5).clamp(0.0, last);
        let lo = pos.floor();
        Self {
            lo: lo as usize,
            hi: (lo as usize + 1).min(source_len as usize - 1),
            frac: pos - lo,
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Round a kernel size down to an integer and up to the next odd one
fn odd_kernel(size: f32) -> u32 {
    let size = size as u32;
    size + u32::from(size % 2 == 0)
}

/// Gaussian sigma for a kernel of `size` taps, as OpenCV derives it
fn kernel_sigma(size: u32) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Clear 8-connected subject regions no larger than `fraction` of the image
fn drop_small_regions(matte: &mut GrayImage, fraction: f32) {
    let (width, height) = (matte.width() as usize, matte.height() as usize);
    let min_area = (width * height) as f64 * fraction as f64;
    let pixels: &mut [u8] = matte;

    let mut seen = vec![false; pixels.len()];
    let mut region = Vec::new();
    let mut stack = Vec::new();

    for start in 0..pixels.len() {
        if seen[start] || pixels[start] == 0 {
            continue;
        }
        seen[start] = true;
        stack.push(start);
        region.clear();

        while let Some(i) = stack.pop() {
            region.push(i);
            let (x, y) = (i % width, i / width);
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let n = ny * width + nx;
                    if !seen[n] && pixels[n] != 0 {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        if region.len() as f64 <= min_area {
            for &i in &region {
                pixels[i] = 0;
            }
        }
    }
}

/// Square max filter, equivalent to `radius` passes of a 3x3 dilation
fn dilate(matte: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = matte.dimensions();
    let window = |centre: u32, len: u32| centre.saturating_sub(radius)..=(centre + radius).min(len - 1);

    let rows = GrayImage::from_fn(width, height, |x, y| {
        Luma([window(x, width).map(|i| matte.get_pixel(i, y)[0]).max().unwrap_or(0)])
    });
    GrayImage::from_fn(width, height, |x, y| {
        Luma([window(y, height).map(|j| rows.get_pixel(x, j)[0]).max().unwrap_or(0)])
    })
}

/// Blends subject/background reference levels by a probability map
#[derive(Debug, Clone)]
pub struct MaskCompositor {
    subject: f32,
    background: u8,
    threshold: Option<f32>,
    post: PostProcess,
    format: PixelFormat,
}

impl MaskCompositor {
    pub fn new(polarity: MaskPolarity, threshold: Option<f32>, format: PixelFormat) -> Result<Self> {
        if !matches!(format, PixelFormat::Gray8 | PixelFormat::Bgra8) {
            return Err(MatteError::UnsupportedFormat {
                format,
                usage: "mask output",
            });
        }
        let (subject, background) = polarity.levels();
        Ok(Self {
            subject: subject as f32,
            background,
            threshold,
            post: PostProcess::OFF,
            format,
        })
    }

    /// Clean up thresholded masks with `post`; ignored without a threshold
    pub fn with_post_process(mut self, post: PostProcess) -> Self {
        self.post = post;
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let compositor = Self::new(
            config.polarity,
            config.threshold,
            config.mask_format.pixel_format(),
        )?;
        Ok(compositor.with_post_process(config.post_process))
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn background_level(&self) -> u8 {
        self.background
    }

    /// Bytes needed for a mask of `extent`
    pub fn mask_len(&self, extent: Extent) -> usize {
        extent.byte_len(self.format)
    }

    /// Rescale `map` to `extent` and blend it into a pooled `mask-output` buffer
    pub fn composite(
        &self,
        pool: &mut PixelBufferPool,
        extent: Extent,
        map: &ProbabilityMap,
    ) -> Result<Mask> {
        let _span = tracing::debug_span!("composite").entered();

        if extent.is_empty() {
            return Err(MatteError::degenerate(format!("target extent is {}", extent)));
        }
        if map.extent().is_empty() {
            return Err(MatteError::degenerate(format!(
                "probability map is {}",
                map.extent()
            )));
        }

        let mut buffer = pool.checkout(BufferRole::MaskOutput, extent, self.format);
        match self.threshold {
            Some(threshold) if self.post.is_active() => {
                let matte = self.binary_matte(extent, map, threshold);
                let bpp = self.format.bytes_per_pixel();
                for (pixel, &value) in buffer.data_mut().chunks_exact_mut(bpp).zip(matte.as_raw()) {
                    let level = lerp(self.background as f32, self.subject, value as f32 / 255.0);
                    self.write_pixel(pixel, level.round() as u8);
                }
            }
            _ => self.resample_into(buffer.data_mut(), extent, map),
        }

        Ok(Mask { buffer })
    }

    /// Bilinear resample fused with the blend
    fn resample_into(&self, out: &mut [u8], extent: Extent, map: &ProbabilityMap) {
        let sx = extent.width as f32 / map.width() as f32;
        let sy = extent.height as f32 / map.height() as f32;
        let columns: Vec<Tap> = (0..extent.width)
            .map(|x| Tap::new(x, sx, map.width()))
            .collect();

        let bpp = self.format.bytes_per_pixel();
        let row_bytes = extent.width as usize * bpp;
        let stride = map.width() as usize;
        let values = map.as_slice();

        for (y, row) in out.chunks_exact_mut(row_bytes).enumerate() {
            let ty = Tap::new(y as u32, sy, map.height());
            let upper = &values[ty.lo * stride..(ty.lo + 1) * stride];
            let lower = &values[ty.hi * stride..(ty.hi + 1) * stride];

            for (pixel, tx) in row.chunks_exact_mut(bpp).zip(&columns) {
                let top = lerp(upper[tx.lo], upper[tx.hi], tx.frac);
                let bottom = lerp(lower[tx.lo], lower[tx.hi], tx.frac);
                let level = self.blend(lerp(top, bottom, ty.frac));
                self.write_pixel(pixel, level);
            }
        }
    }

    /// Threshold at model resolution, clean up, then scale to `extent`
    ///
    /// Returns subject strength per pixel, 0 to 255
    fn binary_matte(&self, extent: Extent, map: &ProbabilityMap, threshold: f32) -> GrayImage {
        let _span = tracing::debug_span!("post_process").entered();
        let post = self.post;

        let mut matte = GrayImage::from_fn(map.width(), map.height(), |x, y| {
            Luma([if map.get(x, y) >= threshold { u8::MAX } else { 0 }])
        });

        if post.contour_filter > 0.0 && post.contour_filter < 1.0 {
            drop_small_regions(&mut matte, post.contour_filter);
        }
        if post.smooth_contour > 0.0 {
            let size = odd_kernel(3.0 + 11.0 * post.smooth_contour);
            matte = imageops::blur(&matte, kernel_sigma(size));
        }

        if matte.dimensions() != (extent.width, extent.height) {
            matte = imageops::resize(&matte, extent.width, extent.height, FilterType::Triangle);
        }

        if post.smooth_contour > 0.0 {
            for pixel in matte.pixels_mut() {
                pixel[0] = if pixel[0] > 128 { u8::MAX } else { 0 };
            }
        }
        if post.feather > 0.0 {
            let size = odd_kernel(40.0 * post.feather);
            matte = dilate(&matte, size / 3);
            matte = imageops::blur(&matte, kernel_sigma(size));
        }

        matte
    }

    /// Fill `out` with the background level: the fallback mask
    pub fn fill_background(&self, out: &mut [u8]) {
        for pixel in out.chunks_exact_mut(self.format.bytes_per_pixel()) {
            self.write_pixel(pixel, self.background);
        }
    }

    fn blend(&self, probability: f32) -> u8 {
        let weight = match self.threshold {
            Some(t) if probability >= t => 1.0,
            Some(_) => 0.0,
            None => probability.clamp(0.0, 1.0),
        };
        lerp(self.background as f32, self.subject, weight)
            .round()
            .clamp(0.0, 255.0) as u8
    }

    fn write_pixel(&self, pixel: &mut [u8], level: u8) {
        match self.format {
            PixelFormat::Bgra8 => {
                pixel[..3].fill(level);
                pixel[3] = u8::MAX;
            }
            _ => pixel[0] = level,
        }
    }
}
