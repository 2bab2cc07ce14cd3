//! Deterministic capture engine for tests and hosts without V4L2.
//!
//! Frames are synthesized test patterns; readiness is scripted by the test
//! through [`MockEngine::signal_ready`].

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{CaptureEngine, LogContext, RawControl, RawFormat, RawMenuItem};
use crate::control::ControlFlags;
use crate::format::FourCC;

/// Test pattern types for synthesized frames.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE-style color bars.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with the given Y, U, V samples.
    Solid(u8, u8, u8),
}

struct MockState {
    width: u32,
    height: u32,
    interval: (u32, u32),
    started: bool,
    values: HashMap<u32, i64>,
    frame: Arc<Vec<u8>>,
    dequeues: u64,
}

/// Capture engine stand-in with a fixed control/format catalog.
pub struct MockEngine {
    controls: Vec<RawControl>,
    formats: Vec<RawFormat>,
    pattern: TestPattern,
    state: Mutex<MockState>,
    ready: Notify,
    log: LogContext,
    fail_dequeue: AtomicBool,
    refuse_start: AtomicBool,
    refuse_stop: AtomicBool,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a mock engine with the default catalog: an integer, a boolean,
    /// a read-only, a menu, and an integer-menu control, and three discrete
    /// YUYV formats.
    #[must_use]
    pub fn new() -> Self {
        let controls = default_controls();
        let formats = default_formats();
        let values = controls
            .iter()
            .map(|ctrl| (ctrl.id, ctrl.default))
            .collect();

        Self {
            controls,
            formats,
            pattern: TestPattern::ColorBars,
            state: Mutex::new(MockState {
                width: 640,
                height: 480,
                interval: (1, 30),
                started: false,
                values,
                frame: Arc::new(Vec::new()),
                dequeues: 0,
            }),
            ready: Notify::new(),
            log: LogContext::new(),
            fail_dequeue: AtomicBool::new(false),
            refuse_start: AtomicBool::new(false),
            refuse_stop: AtomicBool::new(false),
        }
    }

    /// Replace the control catalog.
    #[must_use]
    pub fn with_controls(mut self, controls: Vec<RawControl>) -> Self {
        self.state.get_mut().values = controls
            .iter()
            .map(|ctrl| (ctrl.id, ctrl.default))
            .collect();
        self.controls = controls;
        self
    }

    /// Replace the format catalog.
    #[must_use]
    pub fn with_formats(mut self, formats: Vec<RawFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Set the synthesized frame pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Make the device readiness descriptor signal once.
    pub fn signal_ready(&self) {
        self.ready.notify_one();
    }

    /// Make subsequent dequeues report transient failure.
    pub fn set_fail_dequeue(&self, fail: bool) {
        self.fail_dequeue.store(fail, Ordering::Relaxed);
    }

    /// Make the next start attempt fail.
    pub fn set_refuse_start(&self, refuse: bool) {
        self.refuse_start.store(refuse, Ordering::Relaxed);
    }

    /// Make the next stop request fail.
    pub fn set_refuse_stop(&self, refuse: bool) {
        self.refuse_stop.store(refuse, Ordering::Relaxed);
    }

    /// Number of frames dequeued so far.
    #[must_use]
    pub fn dequeue_count(&self) -> u64 {
        self.state.lock().dequeues
    }

    fn find_control(&self, id: u32) -> io::Result<&RawControl> {
        self.controls.iter().find(|ctrl| ctrl.id == id).ok_or_else(|| {
            self.log.record_fail("unknown control id");
            io::Error::new(io::ErrorKind::NotFound, "unknown control id")
        })
    }
}

#[async_trait]
impl CaptureEngine for MockEngine {
    fn enumerate_controls(&self) -> io::Result<Vec<RawControl>> {
        Ok(self.controls.clone())
    }

    fn enumerate_formats(&self) -> io::Result<Vec<RawFormat>> {
        Ok(self.formats.clone())
    }

    fn start(&self) -> io::Result<(u32, u32)> {
        if self.refuse_start.load(Ordering::Relaxed) {
            self.log.record_fail("start refused");
            return Err(io::Error::new(io::ErrorKind::Other, "start refused"));
        }
        let mut state = self.state.lock();
        state.started = true;
        Ok((state.width, state.height))
    }

    fn stop(&self) -> io::Result<()> {
        if self.refuse_stop.load(Ordering::Relaxed) {
            self.log.record_fail("stop refused");
            return Err(io::Error::new(io::ErrorKind::Other, "stop refused"));
        }
        let mut state = self.state.lock();
        if !state.started {
            self.log.record_fail("stop while not streaming");
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not streaming",
            ));
        }
        state.started = false;
        Ok(())
    }

    fn dequeue(&self) -> bool {
        if self.fail_dequeue.load(Ordering::Relaxed) {
            self.log.record_fail("dequeue failed");
            return false;
        }
        let mut state = self.state.lock();
        let frame = generate_test_frame(state.width, state.height, self.pattern);
        state.frame = Arc::new(frame);
        state.dequeues += 1;
        true
    }

    fn frame(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.state.lock().frame)
    }

    fn config_get(&self) -> io::Result<RawFormat> {
        let state = self.state.lock();
        Ok(RawFormat {
            fourcc: FourCC::YUYV.code(),
            width: state.width,
            height: state.height,
            numerator: state.interval.0,
            denominator: state.interval.1,
        })
    }

    fn config_set(&self, format: &RawFormat) -> io::Result<(u32, u32)> {
        // Snap to the supported format closest to the request, the way a
        // driver adjusts dimensions it cannot honor verbatim.
        let nearest = self
            .formats
            .iter()
            .min_by_key(|f| {
                f.width.abs_diff(format.width) + f.height.abs_diff(format.height)
            })
            .copied()
            .ok_or_else(|| {
                self.log.record_fail("no supported formats");
                io::Error::new(io::ErrorKind::Unsupported, "no supported formats")
            })?;

        let mut state = self.state.lock();
        state.width = nearest.width;
        state.height = nearest.height;
        if format.numerator != 0 && format.denominator != 0 {
            state.interval = (format.numerator, format.denominator);
        }
        Ok((state.width, state.height))
    }

    fn control_get(&self, id: u32) -> io::Result<i64> {
        let control = self.find_control(id)?;
        let flags = ControlFlags::from_bits(control.flags);
        if flags.disabled || flags.write_only {
            self.log.record_fail("control not readable");
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "control not readable",
            ));
        }
        Ok(*self
            .state
            .lock()
            .values
            .get(&id)
            .expect("value seeded for every control"))
    }

    fn control_set(&self, id: u32, value: i64) -> io::Result<()> {
        let control = self.find_control(id)?;
        let flags = ControlFlags::from_bits(control.flags);
        if flags.disabled || flags.read_only || flags.grabbed {
            self.log.record_fail("control not writable");
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "control not writable",
            ));
        }
        if value < control.min || value > control.max {
            self.log.record_fail("control value out of range");
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "control value out of range",
            ));
        }
        self.state.lock().values.insert(id, value);
        Ok(())
    }

    async fn wait_readable(&self) -> io::Result<()> {
        self.ready.notified().await;
        Ok(())
    }

    fn log_context(&self) -> LogContext {
        self.log.clone()
    }
}

fn default_controls() -> Vec<RawControl> {
    vec![
        RawControl {
            id: 0x0098_0900,
            name: "Brightness".to_string(),
            type_code: 1,
            min: -64,
            max: 64,
            step: 1,
            default: 0,
            flags: 0,
            menu: Vec::new(),
        },
        RawControl {
            id: 0x0098_0913,
            name: "White Balance Temperature, Auto".to_string(),
            type_code: 2,
            min: 0,
            max: 1,
            step: 1,
            default: 1,
            flags: 0,
            menu: Vec::new(),
        },
        RawControl {
            id: 0x0098_091b,
            name: "Exposure (Absolute)".to_string(),
            type_code: 1,
            min: 3,
            max: 2047,
            step: 1,
            default: 250,
            flags: 0x0004, // read-only
            menu: Vec::new(),
        },
        RawControl {
            id: 0x0098_0918,
            name: "Power Line Frequency".to_string(),
            type_code: 3,
            min: 0,
            max: 2,
            step: 1,
            default: 1,
            flags: 0,
            menu: vec![
                RawMenuItem {
                    index: 0,
                    label: "Disabled".to_string(),
                    value: 0,
                },
                RawMenuItem {
                    index: 1,
                    label: "50 Hz".to_string(),
                    value: 1,
                },
                RawMenuItem {
                    index: 2,
                    label: "60 Hz".to_string(),
                    value: 2,
                },
            ],
        },
        RawControl {
            id: 0x009a_0902,
            name: "ISO Sensitivity".to_string(),
            type_code: 8,
            min: 0,
            max: 3,
            step: 1,
            default: 0,
            flags: 0,
            menu: vec![
                RawMenuItem {
                    index: 0,
                    label: String::new(),
                    value: 100,
                },
                RawMenuItem {
                    index: 1,
                    label: String::new(),
                    value: 200,
                },
                RawMenuItem {
                    index: 2,
                    label: String::new(),
                    value: 400,
                },
                RawMenuItem {
                    index: 3,
                    label: String::new(),
                    value: 800,
                },
            ],
        },
    ]
}

fn default_formats() -> Vec<RawFormat> {
    let yuyv = FourCC::YUYV.code();
    vec![
        RawFormat {
            fourcc: yuyv,
            width: 640,
            height: 480,
            numerator: 1,
            denominator: 30,
        },
        RawFormat {
            fourcc: yuyv,
            width: 1280,
            height: 720,
            numerator: 1,
            denominator: 30,
        },
        RawFormat {
            fourcc: yuyv,
            width: 320,
            height: 240,
            numerator: 1,
            denominator: 15,
        },
    ]
}

/// Generate YUYV test frame data for the given pattern.
fn generate_test_frame(width: u32, height: u32, pattern: TestPattern) -> Vec<u8> {
    let size = (width * height * 2) as usize;
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, width, height),
        TestPattern::Gradient => generate_gradient(&mut data, width, height),
        TestPattern::Solid(y, u, v) => generate_solid(&mut data, y, u, v),
    }

    data
}

/// YUYV color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = u_val;
                data[offset + 2] = y_val;
                data[offset + 3] = v_val;
            }
        }
    }
}

/// YUYV horizontal gradient with neutral chroma.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width.max(1)) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = 128;
                data[offset + 2] = y_val;
                data[offset + 3] = 128;
            }
        }
    }
}

/// Solid YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for group in data.chunks_exact_mut(4) {
        group[0] = y;
        group[1] = u;
        group[2] = y;
        group[3] = v;
    }
}
