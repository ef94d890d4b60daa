mod adapter;

pub use adapter::Frame;

use std::fmt;

/// Pixel layouts understood by the pipeline
///
/// Host frames usually arrive as `Bgra8`; masks leave as `Gray8` or,
/// for hosts that want a four channel texture, `Bgra8`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit packed B, G, R, A
    Bgra8,
    /// 32-bit packed R, G, B, A
    Rgba8,
    /// 24-bit packed R, G, B
    Rgb8,
    /// Single 8-bit channel
    Gray8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Bgra8 => "BGRA8",
            PixelFormat::Rgba8 => "RGBA8",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Gray8 => "GRAY8",
        };
        f.write_str(name)
    }
}

/// Width and height of an image in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of a tightly packed image of this extent in `format`
    pub const fn byte_len(&self, format: PixelFormat) -> usize {
        self.area() * format.bytes_per_pixel()
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
