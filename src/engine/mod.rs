//! Contract with the native capture engine.
//!
//! The session consumes the engine only through [`CaptureEngine`]; the Linux
//! backend lives in [`v4l2`] and a deterministic stand-in for tests and
//! non-Linux hosts in [`mock`].

mod log;
pub mod mock;
#[cfg(target_os = "linux")]
pub mod v4l2;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

pub use log::LogContext;
pub use mock::MockEngine;
#[cfg(target_os = "linux")]
pub use v4l2::V4l2Engine;

/// Raw control descriptor as enumerated by the engine.
///
/// `type_code` uses the compact numbering the metadata translator maps:
/// 0 invalid, 1 int, 2 bool, 3 menu, 4 int64, 5 class, 6 string,
/// 7 bitmask, 8 int_menu. `flags` is the V4L2 flag word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawControl {
    pub id: u32,
    pub name: String,
    pub type_code: u32,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub default: i64,
    pub flags: u32,
    pub menu: Vec<RawMenuItem>,
}

/// Raw menu entry; `label` is meaningful for menu controls, `value` for
/// integer-menu controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMenuItem {
    pub index: u32,
    pub label: String,
    pub value: i64,
}

/// Raw format descriptor: packed fourcc, dimensions, frame interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFormat {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub numerator: u32,
    pub denominator: u32,
}

/// Per-device native capture engine.
///
/// Implementations perform the actual kernel negotiation and buffer
/// management; the session layer only sequences calls and owns lifecycle
/// state. All failure detail an implementation can attach beyond the
/// returned error goes through the session's [`LogContext`].
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    /// Enumerate raw control descriptors, in device order.
    fn enumerate_controls(&self) -> io::Result<Vec<RawControl>>;

    /// Enumerate raw format descriptors, in device order.
    fn enumerate_formats(&self) -> io::Result<Vec<RawFormat>>;

    /// Begin streaming. Returns the negotiated (width, height).
    fn start(&self) -> io::Result<(u32, u32)>;

    /// Issue the stop request. Outstanding buffers drain asynchronously;
    /// the readiness descriptor signals once more when the drain completes.
    fn stop(&self) -> io::Result<()>;

    /// Dequeue one frame into the engine's current buffer. `false` means a
    /// transient failure the caller may retry; it is not fatal.
    fn dequeue(&self) -> bool;

    /// The most recently dequeued packed frame. Empty before the first
    /// successful dequeue.
    fn frame(&self) -> Arc<Vec<u8>>;

    /// Query the currently negotiated format from the driver.
    fn config_get(&self) -> io::Result<RawFormat>;

    /// Apply dimensions and frame interval. Returns the negotiated
    /// (width, height), which may differ from the request.
    fn config_set(&self, format: &RawFormat) -> io::Result<(u32, u32)>;

    /// Read a control's current value.
    fn control_get(&self, id: u32) -> io::Result<i64>;

    /// Write a control value.
    fn control_set(&self, id: u32, value: i64) -> io::Result<()>;

    /// Suspend until the device's readiness descriptor becomes readable
    /// (a frame or a stop-completion event is pending).
    async fn wait_readable(&self) -> io::Result<()>;

    /// The failure-record cell this engine writes into. Sessions keep a
    /// clone and read it back when a call fails.
    fn log_context(&self) -> LogContext;
}
