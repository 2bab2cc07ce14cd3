//! V4L2 capture engine built on the `v4l` crate.

use std::io;
use std::os::raw::c_int;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use v4l::buffer::Type as BufType;
use v4l::control::{
    Control as V4lControl, MenuItem as V4lMenuItem, Type as CtrlType, Value as CtrlValue,
};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::{CaptureStream, Stream as StreamTrait};
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, Fraction};

use super::{CaptureEngine, LogContext, RawControl, RawFormat, RawMenuItem};

const BUFFER_COUNT: u32 = 4;

/// Capture engine backed by a V4L2 device node.
pub struct V4l2Engine {
    device: Device,
    stream: Mutex<Option<MmapStream<'static>>>,
    frame: Mutex<Arc<Vec<u8>>>,
    fd: c_int,
    log: LogContext,
}

impl V4l2Engine {
    /// Open a V4L2 device node (e.g. `/dev/video0`).
    pub fn open(path: &str) -> io::Result<Self> {
        let log = LogContext::new();

        let device = Device::with_path(path).map_err(|e| {
            log.record_error("open", &e);
            e
        })?;

        let caps = device.query_caps().map_err(|e| {
            log.record_error("QUERYCAP", &e);
            e
        })?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            log.record_fail("device does not support video capture");
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "device does not support video capture",
            ));
        }

        info!("Opened {}: {} ({})", path, caps.card, caps.driver);

        let fd = device.handle().fd();
        Ok(Self {
            device,
            stream: Mutex::new(None),
            frame: Mutex::new(Arc::new(Vec::new())),
            fd,
            log,
        })
    }

    fn negotiated_dims(&self) -> io::Result<(u32, u32)> {
        let fmt = self.device.format().map_err(|e| {
            self.log.record_error("G_FMT", &e);
            e
        })?;
        Ok((fmt.width, fmt.height))
    }
}

#[async_trait]
impl CaptureEngine for V4l2Engine {
    fn enumerate_controls(&self) -> io::Result<Vec<RawControl>> {
        let descriptions = self.device.query_controls().map_err(|e| {
            self.log.record_error("QUERYCTRL", &e);
            e
        })?;

        Ok(descriptions
            .into_iter()
            .map(|desc| {
                let menu = desc
                    .items
                    .as_ref()
                    .map(|items| {
                        items
                            .iter()
                            .map(|(index, item)| match item {
                                V4lMenuItem::Name(name) => RawMenuItem {
                                    index: *index,
                                    label: name.clone(),
                                    value: i64::from(*index),
                                },
                                V4lMenuItem::Value(value) => RawMenuItem {
                                    index: *index,
                                    label: String::new(),
                                    value: *value,
                                },
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                RawControl {
                    id: desc.id,
                    name: desc.name.clone(),
                    type_code: control_type_code(desc.typ),
                    min: desc.minimum as i64,
                    max: desc.maximum as i64,
                    step: desc.step as i64,
                    default: desc.default as i64,
                    flags: desc.flags.bits(),
                    menu,
                }
            })
            .collect())
    }

    fn enumerate_formats(&self) -> io::Result<Vec<RawFormat>> {
        let mut formats = Vec::new();

        let descriptions = self.device.enum_formats().map_err(|e| {
            self.log.record_error("ENUM_FMT", &e);
            e
        })?;

        for desc in descriptions {
            let sizes = self.device.enum_framesizes(desc.fourcc).map_err(|e| {
                self.log.record_error("ENUM_FRAMESIZES", &e);
                e
            })?;

            for framesize in sizes {
                // Stepwise ranges are rare on capture hardware; only the
                // discrete sizes make it into the catalog.
                let FrameSizeEnum::Discrete(discrete) = framesize.size else {
                    continue;
                };

                let fourcc = u32::from_le_bytes(desc.fourcc.repr);
                let intervals = self
                    .device
                    .enum_frameintervals(desc.fourcc, discrete.width, discrete.height)
                    .unwrap_or_default();

                let mut any = false;
                for fi in &intervals {
                    if let FrameIntervalEnum::Discrete(fraction) = &fi.interval {
                        formats.push(RawFormat {
                            fourcc,
                            width: discrete.width,
                            height: discrete.height,
                            numerator: fraction.numerator,
                            denominator: fraction.denominator,
                        });
                        any = true;
                    }
                }
                if !any {
                    formats.push(RawFormat {
                        fourcc,
                        width: discrete.width,
                        height: discrete.height,
                        numerator: 0,
                        denominator: 0,
                    });
                }
            }
        }

        Ok(formats)
    }

    fn start(&self) -> io::Result<(u32, u32)> {
        let mut guard = self.stream.lock();
        if guard.is_some() {
            // Already streaming; report the negotiated dimensions again.
            return self.negotiated_dims();
        }

        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, BUFFER_COUNT)
            .map_err(|e| {
                self.log.record_error("REQBUFS", &e);
                e
            })?;
        stream.start().map_err(|e| {
            self.log.record_error("STREAMON", &e);
            e
        })?;
        *guard = Some(stream);
        drop(guard);

        self.negotiated_dims()
    }

    fn stop(&self) -> io::Result<()> {
        let mut guard = self.stream.lock();
        match guard.as_mut() {
            Some(stream) => {
                stream.stop().map_err(|e| {
                    self.log.record_error("STREAMOFF", &e);
                    e
                })?;
                // Dropping the stream releases the mapped buffers.
                *guard = None;
                Ok(())
            }
            None => {
                self.log.record_fail("stop while not streaming");
                Err(io::Error::new(io::ErrorKind::InvalidInput, "not streaming"))
            }
        }
    }

    fn dequeue(&self) -> bool {
        let mut guard = self.stream.lock();
        let Some(stream) = guard.as_mut() else {
            self.log.record_fail("dequeue while not streaming");
            return false;
        };
        match stream.next() {
            Ok((buf, meta)) => {
                debug!("Dequeued frame seq={} ({} bytes)", meta.sequence, buf.len());
                *self.frame.lock() = Arc::new(buf.to_vec());
                true
            }
            Err(e) => {
                self.log.record_error("DQBUF", &e);
                false
            }
        }
    }

    fn frame(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.frame.lock())
    }

    fn config_get(&self) -> io::Result<RawFormat> {
        let fmt = self.device.format().map_err(|e| {
            self.log.record_error("G_FMT", &e);
            e
        })?;
        let params = self.device.params().map_err(|e| {
            self.log.record_error("G_PARM", &e);
            e
        })?;

        Ok(RawFormat {
            fourcc: u32::from_le_bytes(fmt.fourcc.repr),
            width: fmt.width,
            height: fmt.height,
            numerator: params.interval.numerator,
            denominator: params.interval.denominator,
        })
    }

    fn config_set(&self, format: &RawFormat) -> io::Result<(u32, u32)> {
        let mut fmt = self.device.format().map_err(|e| {
            self.log.record_error("G_FMT", &e);
            e
        })?;
        fmt.width = format.width;
        fmt.height = format.height;
        if format.fourcc != 0 {
            fmt.fourcc = v4l::FourCC::new(&format.fourcc.to_le_bytes());
        }

        let actual = self.device.set_format(&fmt).map_err(|e| {
            self.log.record_error("S_FMT", &e);
            e
        })?;
        if actual.width != format.width || actual.height != format.height {
            warn!(
                "Resolution adjusted by driver: requested {}x{}, got {}x{}",
                format.width, format.height, actual.width, actual.height
            );
        }

        if format.numerator != 0 && format.denominator != 0 {
            let mut params = self.device.params().map_err(|e| {
                self.log.record_error("G_PARM", &e);
                e
            })?;
            params.interval = Fraction::new(format.numerator, format.denominator);
            self.device.set_params(&params).map_err(|e| {
                self.log.record_error("S_PARM", &e);
                e
            })?;
        }

        Ok((actual.width, actual.height))
    }

    fn control_get(&self, id: u32) -> io::Result<i64> {
        let control = self.device.control(id).map_err(|e| {
            self.log.record_error("G_CTRL", &e);
            e
        })?;
        match control.value {
            CtrlValue::Integer(value) => Ok(value),
            CtrlValue::Boolean(value) => Ok(i64::from(value)),
            _ => {
                self.log.record_fail("control value is not an integer");
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "control value is not an integer",
                ))
            }
        }
    }

    fn control_set(&self, id: u32, value: i64) -> io::Result<()> {
        // Match the control's value kind; write-only controls cannot be
        // probed and get the integer form.
        let ctrl_value = match self.device.control(id) {
            Ok(current) => match current.value {
                CtrlValue::Boolean(_) => CtrlValue::Boolean(value != 0),
                _ => CtrlValue::Integer(value),
            },
            Err(_) => CtrlValue::Integer(value),
        };

        self.device
            .set_control(V4lControl {
                id,
                value: ctrl_value,
            })
            .map_err(|e| {
                self.log.record_error("S_CTRL", &e);
                e
            })
    }

    async fn wait_readable(&self) -> io::Result<()> {
        let fd = self.fd;
        tokio::task::spawn_blocking(move || poll_readable(fd))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    fn log_context(&self) -> LogContext {
        self.log.clone()
    }
}

/// Block until `fd` is readable (or in an error state, which a stopped
/// stream reports and which also counts as a readiness signal).
fn poll_readable(fd: c_int) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc > 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if rc < 0 && err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Map the v4l control type to the compact code the metadata translator
/// understands. Types with no counterpart in the public model (buttons,
/// compound payloads) come back as invalid.
fn control_type_code(typ: CtrlType) -> u32 {
    match typ {
        CtrlType::Integer => 1,
        CtrlType::Boolean => 2,
        CtrlType::Menu => 3,
        CtrlType::Integer64 => 4,
        CtrlType::CtrlClass => 5,
        CtrlType::String => 6,
        CtrlType::Bitmask => 7,
        CtrlType::IntegerMenu => 8,
        _ => 0,
    }
}
