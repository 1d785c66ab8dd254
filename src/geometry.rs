//! Allocation parameters of a buffer.
//!
//! A [`Geometry`] bundles the size, pixel format and usage a buffer was
//! allocated with. The vault compares an entry's geometry against its current
//! target to detect buffers made stale by a resize.

use std::fmt;

/// Dimensions of a buffer in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Creates a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Unspecified or unsupported.
    #[default]
    Invalid,
    /// 32-bit, alpha in the high byte, then blue, green, red.
    Abgr8888,
    /// Like [`PixelFormat::Abgr8888`] with an unused alpha byte.
    Xbgr8888,
    /// 32-bit, alpha in the high byte, then red, green, blue.
    Argb8888,
    /// Like [`PixelFormat::Argb8888`] with an unused alpha byte.
    Xrgb8888,
    /// 24-bit packed blue, green, red.
    Bgr888,
    /// 24-bit packed red, green, blue.
    Rgb888,
    /// 16-bit 5:6:5.
    Rgb565,
    /// 16-bit 5:5:5:1.
    Rgba5551,
    /// 16-bit 4:4:4:4.
    Rgba4444,
}

impl PixelFormat {
    /// Returns the number of bytes one pixel occupies, or 0 for `Invalid`.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Invalid => 0,
            Self::Abgr8888 | Self::Xbgr8888 | Self::Argb8888 | Self::Xrgb8888 => 4,
            Self::Bgr888 | Self::Rgb888 => 3,
            Self::Rgb565 | Self::Rgba5551 | Self::Rgba4444 => 2,
        }
    }
}

/// Usage hint passed through to the remote allocator.
///
/// The vault treats this as an opaque value that only takes part in geometry
/// comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    /// GPU-accessible storage.
    pub const HARDWARE: Self = Self(1);
    /// CPU-mappable storage.
    pub const SOFTWARE: Self = Self(2);
}

/// The parameters a buffer was allocated with.
///
/// Geometry recorded on a ledger entry never changes; a geometry change is
/// realized by retiring the entry and allocating a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Geometry {
    /// Buffer dimensions.
    pub size: Size,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Usage hint.
    pub usage: BufferUsage,
}

impl Geometry {
    /// Creates a new geometry.
    #[must_use]
    pub const fn new(size: Size, format: PixelFormat, usage: BufferUsage) -> Self {
        Self {
            size,
            format,
            usage,
        }
    }

    /// Returns a copy with a different size.
    #[must_use]
    pub const fn with_size(self, size: Size) -> Self {
        Self { size, ..self }
    }

    /// Returns `true` if the remote side can allocate buffers of this shape.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.size.width > 0 && self.size.height > 0 && self.format != PixelFormat::Invalid
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} usage={}", self.size, self.format, self.usage.0)
    }
}
