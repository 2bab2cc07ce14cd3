use thiserror::Error;

/// Errors surfaced by a capture session.
///
/// Asynchronous dequeue failures are not represented here: a transient
/// failure to pull a frame is reported through the capture callback's
/// `success` flag and the caller retries by arming another capture.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Configuration rejected: {details}")]
    Configuration { details: String },

    #[error("Cannot start streaming: {details}")]
    Start { details: String },

    #[error("Cannot stop streaming: {details}")]
    Stop { details: String },

    #[error("Control {id} access failed: {details}")]
    ControlAccess { id: u32, details: String },

    #[error("Cannot query configuration: {details}")]
    Query { details: String },

    /// A capture or stop watch is already pending on this session.
    #[error("A capture or stop is already pending")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CameraError>;
