use std::sync::Arc;

use crate::convert;

/// A view of the most recently captured frame.
///
/// The packed payload is shared with the capture engine's buffer bookkeeping
/// (no copy on access); RGB conversion allocates a fresh buffer owned by the
/// caller. Before the first successful capture the payload is empty.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<Vec<u8>>,
    width: u32,
    height: u32,
}

impl Frame {
    pub(crate) fn new(data: Arc<Vec<u8>>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Frame width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Read-only view of the packed 4:2:2 payload
    /// (`width * height * 2` bytes).
    #[must_use]
    pub fn as_yuyv(&self) -> &[u8] {
        &self.data
    }

    /// Convert to a freshly allocated RGB24 buffer of
    /// `width * height * 3` bytes.
    #[must_use]
    pub fn to_rgb(&self) -> Vec<u8> {
        convert::yuyv_to_rgb(&self.data, self.width, self.height)
    }

    /// Expected packed payload size for the frame's dimensions.
    #[must_use]
    pub const fn expected_size(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 2
    }

    /// Whether the payload length matches the dimensions.
    #[must_use]
    pub fn validate_size(&self) -> bool {
        self.data.len() == self.expected_size()
    }
}
