//! Async session handle over a single V4L2 capture device.
//!
//! A [`CaptureSession`] owns one opened device: it snapshots the control and
//! format catalogs at open time, negotiates resolution and frame rate,
//! starts and stops streaming, and delivers frames through one-shot capture
//! callbacks armed on the device's readiness descriptor.
//!
//! The kernel-facing work lives behind the [`engine::CaptureEngine`] trait;
//! the Linux backend drives V4L2 through the `v4l` crate and a deterministic
//! [`engine::MockEngine`] stands in for tests and non-Linux hosts.

pub mod config;
pub mod control;
pub mod convert;
pub mod engine;
pub mod error;
pub mod format;
pub mod frame;
pub mod session;

mod watch;

pub use config::CameraConfig;
pub use control::{Control, ControlFlags, ControlType, MenuItem};
#[cfg(target_os = "linux")]
pub use engine::V4l2Engine;
pub use engine::{CaptureEngine, LogContext, MockEngine, RawControl, RawFormat, RawMenuItem};
pub use error::{CameraError, Result};
pub use format::{Format, FourCC, FrameInterval};
pub use frame::Frame;
pub use session::{CaptureSession, SessionState};
