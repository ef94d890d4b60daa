use super::{Extent, PixelFormat};
use crate::error::{MatteError, Result};

/// Borrowed view over a host pixel buffer
///
/// Wrapping never copies. The frame is only valid for as long as the
/// host keeps the underlying bytes alive, which in practice means one
/// `process` call
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    extent: Extent,
    format: PixelFormat,
    stride: usize,
}

impl<'a> Frame<'a> {
    /// Wrap a tightly packed buffer
    pub fn wrap(data: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let stride = width as usize * format.bytes_per_pixel();
        Self::wrap_with_stride(data, width, height, format, stride)
    }

    /// Wrap a buffer whose rows are `stride` bytes apart
    ///
    /// Hosts that render into GPU staging surfaces often pad rows, so
    /// `stride` may exceed `width * bytes_per_pixel`. The last row does
    /// not need to carry padding
    pub fn wrap_with_stride(
        data: &'a [u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: usize,
    ) -> Result<Self> {
        let extent = Extent::new(width, height);
        if extent.is_empty() {
            return Err(MatteError::degenerate(format!("frame is {}", extent)));
        }

        let row_bytes = width as usize * format.bytes_per_pixel();
        if stride < row_bytes {
            return Err(MatteError::invalid_buffer(format!(
                "stride {} is shorter than a {} row of {} bytes",
                stride, format, row_bytes
            )));
        }

        let required = stride
            .checked_mul(height as usize - 1)
            .and_then(|rows| rows.checked_add(row_bytes))
            .ok_or_else(|| {
                MatteError::invalid_buffer(format!(
                    "stride {} over {} rows does not fit in memory",
                    stride, height
                ))
            })?;
        if data.len() < required {
            return Err(MatteError::invalid_buffer(format!(
                "{} {} frame needs {} bytes, got {}",
                extent,
                format,
                required,
                data.len()
            )));
        }

        Ok(Self {
            data,
            extent,
            format,
            stride,
        })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Pixel bytes of row `y`, without padding
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        let len = self.extent.width as usize * self.format.bytes_per_pixel();
        &self.data[start..start + len]
    }

    /// Convert into packed RGB8, overwriting every byte of `out`
    ///
    /// `out` must be exactly `width * height * 3` bytes
    pub fn write_rgb(&self, out: &mut [u8]) -> Result<()> {
        let _span = tracing::debug_span!("convert_rgb").entered();

        let expected = self.extent.byte_len(PixelFormat::Rgb8);
        if out.len() != expected {
            return Err(MatteError::invalid_buffer(format!(
                "RGB destination holds {} bytes, {} frame needs {}",
                out.len(),
                self.extent,
                expected
            )));
        }

        let dst_row_bytes = self.extent.width as usize * 3;
        for (y, dst) in out.chunks_exact_mut(dst_row_bytes).enumerate() {
            let src = self.row(y as u32);
            match self.format {
                PixelFormat::Bgra8 => {
                    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
                        d[0] = s[2];
                        d[1] = s[1];
                        d[2] = s[0];
                    }
                }
                PixelFormat::Rgba8 => {
                    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
                        d.copy_from_slice(&s[..3]);
                    }
                }
                PixelFormat::Rgb8 => dst.copy_from_slice(src),
                PixelFormat::Gray8 => {
                    for (d, &s) in dst.chunks_exact_mut(3).zip(src) {
                        d.fill(s);
                    }
                }
            }
        }

        Ok(())
    }
}
