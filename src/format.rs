use serde::{Deserialize, Serialize};

use crate::engine::RawFormat;

/// Pixel format identifier (e.g., YUYV, MJPG, RGB3).
///
/// Stored as the four ASCII bytes; the packed 32-bit code uses the V4L2
/// little-endian convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");

    /// Packed 32-bit representation.
    #[must_use]
    pub const fn code(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Rebuild from the packed 32-bit representation.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        Self(code.to_le_bytes())
    }

    /// Textual rendering; non-ASCII bytes are replaced.
    #[must_use]
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Frame interval in seconds per frame (numerator/denominator), the
/// convention V4L2 reports. The rate in frames per second is the inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInterval {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameInterval {
    #[must_use]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Frames per second, rounded down. Zero when the interval is unset.
    #[must_use]
    pub const fn fps(&self) -> u32 {
        if self.numerator == 0 {
            0
        } else {
            self.denominator / self.numerator
        }
    }
}

/// Video format specification: pixel format, dimensions, frame interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    /// Pixel format.
    pub fourcc: FourCC,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame interval.
    pub interval: FrameInterval,
}

impl Format {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC, interval: FrameInterval) -> Self {
        Self {
            fourcc,
            width,
            height,
            interval,
        }
    }

    /// Translate a raw engine descriptor, preserving every reported field.
    #[must_use]
    pub fn from_raw(raw: &RawFormat) -> Self {
        Self {
            fourcc: FourCC::from_code(raw.fourcc),
            width: raw.width,
            height: raw.height,
            interval: FrameInterval::new(raw.numerator, raw.denominator),
        }
    }

    /// Raw descriptor for the engine's configuration call.
    #[must_use]
    pub fn to_raw(&self) -> RawFormat {
        RawFormat {
            fourcc: self.fourcc.code(),
            width: self.width,
            height: self.height,
            numerator: self.interval.numerator,
            denominator: self.interval.denominator,
        }
    }
}
