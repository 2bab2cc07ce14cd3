use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CameraError, Result};
use crate::format::{Format, FourCC, FrameInterval};

/// Capture configuration for the demo binary and embedding applications.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Device node path (e.g. /dev/video0)
    #[serde(default = "default_device")]
    pub device: String,

    /// Requested resolution (width, height); the driver may adjust it
    #[serde(default = "default_resolution")]
    pub resolution: (u32, u32),

    /// Requested frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Pixel format (YUYV, MJPG, ...)
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            resolution: default_resolution(),
            fps: default_fps(),
            format: default_format(),
        }
    }
}

impl CameraConfig {
    /// Load configuration from a TOML file, with `V4L2CAM_*` environment
    /// variables layered on top.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let settings = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("V4L2CAM").separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Logical validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(CameraError::Configuration {
                details: "device path must not be empty".to_string(),
            });
        }
        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err(CameraError::Configuration {
                details: format!(
                    "resolution {}x{} is not valid",
                    self.resolution.0, self.resolution.1
                ),
            });
        }
        if self.fps == 0 {
            return Err(CameraError::Configuration {
                details: "fps must be greater than zero".to_string(),
            });
        }
        self.fourcc()?;
        Ok(())
    }

    /// The requested format as a negotiation request.
    pub fn to_format(&self) -> Result<Format> {
        Ok(Format::new(
            self.resolution.0,
            self.resolution.1,
            self.fourcc()?,
            FrameInterval::new(1, self.fps),
        ))
    }

    /// Serialized TOML rendering, used by `--print-config`.
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn fourcc(&self) -> Result<FourCC> {
        match self.format.to_uppercase().as_str() {
            "YUYV" => Ok(FourCC::YUYV),
            "MJPG" | "MJPEG" => Ok(FourCC::MJPG),
            "RGB3" | "RGB24" => Ok(FourCC::RGB3),
            other => {
                let bytes = other.as_bytes();
                if bytes.len() == 4 {
                    Ok(FourCC::new(&[bytes[0], bytes[1], bytes[2], bytes[3]]))
                } else {
                    Err(CameraError::Configuration {
                        details: format!("unknown pixel format: {}", self.format),
                    })
                }
            }
        }
    }
}

fn default_device() -> String {
    "/dev/video0".to_string()
}

const fn default_resolution() -> (u32, u32) {
    (640, 480)
}

const fn default_fps() -> u32 {
    30
}

fn default_format() -> String {
    "YUYV".to_string()
}
