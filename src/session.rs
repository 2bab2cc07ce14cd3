use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::control::Control;
use crate::engine::{CaptureEngine, LogContext};
use crate::error::{CameraError, Result};
use crate::format::Format;
use crate::frame::Frame;
use crate::watch::{WatchKind, WatchSlot};

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Device opened, catalogs populated, nothing negotiated yet.
    Opened,
    /// A configure call succeeded; dimensions reflect the negotiation.
    Configured,
    /// Streaming.
    Started,
    /// The stop drain completed.
    Stopped,
}

/// A stateful handle over one opened capture device.
///
/// Control and format catalogs are immutable snapshots taken at open time.
/// `width`/`height` always reflect the last successful native negotiation
/// (never the requested values verbatim) and are zero until the first
/// successful `start` or `config_set`.
///
/// At most one asynchronous watch (capture or stop) may be outstanding;
/// a second request fails with [`CameraError::Busy`], except that `stop`
/// preempts a pending capture. Dropping the session cancels any pending
/// watch before the device handle is released, so callbacks never run
/// against a destroyed session.
///
/// `capture` and `stop` arm their watches on the current tokio runtime and
/// must be called from within one.
pub struct CaptureSession {
    engine: Arc<dyn CaptureEngine>,
    device: String,
    controls: Vec<Control>,
    formats: Vec<Format>,
    width: AtomicU32,
    height: AtomicU32,
    state: Arc<Mutex<SessionState>>,
    watch: WatchSlot,
    log: LogContext,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device", &self.device)
            .field("controls", &self.controls.len())
            .field("formats", &self.formats.len())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CaptureSession {
    /// Open the V4L2 device at `path` and snapshot its metadata.
    #[cfg(target_os = "linux")]
    pub fn open(path: impl Into<String>) -> Result<Self> {
        let device = path.into();
        let engine = crate::engine::V4l2Engine::open(&device).map_err(|e| {
            CameraError::DeviceOpen {
                device: device.clone(),
                details: e.to_string(),
            }
        })?;
        Self::with_engine(Arc::new(engine), device)
    }

    /// Build a session over an already-constructed engine. This is the
    /// seam tests and non-V4L2 backends use.
    pub fn with_engine(engine: Arc<dyn CaptureEngine>, device: impl Into<String>) -> Result<Self> {
        let device = device.into();
        let log = engine.log_context();

        let raw_controls = engine.enumerate_controls().map_err(|e| {
            CameraError::DeviceOpen {
                device: device.clone(),
                details: log.take().unwrap_or_else(|| e.to_string()),
            }
        })?;
        let raw_formats = engine.enumerate_formats().map_err(|e| {
            CameraError::DeviceOpen {
                device: device.clone(),
                details: log.take().unwrap_or_else(|| e.to_string()),
            }
        })?;

        let controls: Vec<Control> = raw_controls.iter().map(Control::from_raw).collect();
        let formats: Vec<Format> = raw_formats.iter().map(Format::from_raw).collect();

        info!(
            "Capture session on {}: {} controls, {} formats",
            device,
            controls.len(),
            formats.len()
        );

        Ok(Self {
            engine,
            device,
            controls,
            formats,
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            state: Arc::new(Mutex::new(SessionState::Opened)),
            watch: WatchSlot::new(),
            log,
        })
    }

    /// Device path this session was opened on.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Control catalog, in device enumeration order.
    #[must_use]
    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    /// Look up a control by its device-reported name.
    #[must_use]
    pub fn control_named(&self, name: &str) -> Option<&Control> {
        self.controls.iter().find(|ctrl| ctrl.name == name)
    }

    /// Format catalog, in device enumeration order.
    #[must_use]
    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    /// Negotiated frame width; zero before the first successful
    /// `start`/`config_set`.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width.load(Ordering::Relaxed)
    }

    /// Negotiated frame height; zero before the first successful
    /// `start`/`config_set`.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Begin streaming. Updates `width`/`height` from the negotiated
    /// format. Calling it on a started session re-reports the negotiated
    /// dimensions.
    pub fn start(&self) -> Result<()> {
        let (width, height) = self.engine.start().map_err(|e| CameraError::Start {
            details: self.failure_detail(&e),
        })?;

        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);
        *self.state.lock() = SessionState::Started;

        info!("Streaming started on {} at {}x{}", self.device, width, height);
        Ok(())
    }

    /// Apply dimensions and frame interval. On success `width`/`height`
    /// take the engine's negotiated values, which may differ from the
    /// request.
    pub fn config_set(&self, format: &Format) -> Result<()> {
        let (width, height) =
            self.engine
                .config_set(&format.to_raw())
                .map_err(|e| CameraError::Configuration {
                    details: self.failure_detail(&e),
                })?;

        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);

        let mut state = self.state.lock();
        if *state != SessionState::Started {
            *state = SessionState::Configured;
        }
        drop(state);

        debug!("Configured {} to {}x{}", self.device, width, height);
        Ok(())
    }

    /// Query the currently negotiated format from the driver (not the
    /// cached catalog).
    pub fn config_get(&self) -> Result<Format> {
        let raw = self.engine.config_get().map_err(|e| CameraError::Query {
            details: self.failure_detail(&e),
        })?;
        Ok(Format::from_raw(&raw))
    }

    /// Arm a one-shot watch for the next frame. Returns immediately; when
    /// the device signals readiness, one frame is dequeued and `callback`
    /// receives the outcome. `false` is a transient dequeue failure;
    /// retry by calling `capture` again.
    ///
    /// Fails with [`CameraError::Busy`] while a capture or stop watch is
    /// already pending.
    pub fn capture<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        self.watch.arm(
            WatchKind::Capture,
            false,
            Arc::clone(&self.engine),
            move |result| {
                let success = match result {
                    Ok(()) => engine.dequeue(),
                    Err(e) => {
                        warn!("Readiness wait failed: {}", e);
                        false
                    }
                };
                callback(success);
            },
        )
    }

    /// Issue the stop request synchronously, then arm a one-shot watch for
    /// the drain-complete signal; `callback` runs once the stream has fully
    /// quiesced and the session is `Stopped`.
    ///
    /// A pending capture watch is preempted (its callback is dropped
    /// uninvoked, since the stream it was waiting on is going away). A second
    /// stop while one is draining fails with [`CameraError::Busy`].
    pub fn stop<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.watch.pending_kind() == Some(WatchKind::Stop) {
            return Err(CameraError::Busy);
        }

        self.engine.stop().map_err(|e| CameraError::Stop {
            details: self.failure_detail(&e),
        })?;

        let device = self.device.clone();
        let state = Arc::clone(&self.state);
        self.watch.arm(
            WatchKind::Stop,
            true,
            Arc::clone(&self.engine),
            move |result| {
                if let Err(e) = result {
                    warn!("Drain wait failed: {}", e);
                }
                *state.lock() = SessionState::Stopped;
                debug!("Streaming fully stopped on {}", device);
                callback();
            },
        )
    }

    /// View of the most recently captured frame. Contents are unspecified
    /// (empty) before the first successful capture callback.
    #[must_use]
    pub fn frame(&self) -> Frame {
        Frame::new(self.engine.frame(), self.width(), self.height())
    }

    /// Read a control's current value.
    pub fn control_get(&self, id: u32) -> Result<i64> {
        self.engine
            .control_get(id)
            .map_err(|e| CameraError::ControlAccess {
                id,
                details: self.failure_detail(&e),
            })
    }

    /// Write a control value. Returns the session for chaining.
    pub fn control_set(&self, id: u32, value: i64) -> Result<&Self> {
        self.engine
            .control_set(id, value)
            .map_err(|e| CameraError::ControlAccess {
                id,
                details: self.failure_detail(&e),
            })?;
        Ok(self)
    }

    /// Prefer the engine's failure record; fall back to the error display.
    fn failure_detail(&self, err: &io::Error) -> String {
        self.log.take().unwrap_or_else(|| err.to_string())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // Cancel before the engine (and with it the device handle) goes
        // away, so no callback observes a destroyed session.
        self.watch.cancel_pending();
        debug!("Capture session on {} closed", self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlType, MenuItem};
    use crate::engine::MockEngine;
    use crate::format::{FourCC, FrameInterval};
    use std::sync::atomic::AtomicU32 as TestCounter;
    use std::time::Duration;
    use tokio::sync::oneshot;

    const BRIGHTNESS: u32 = 0x0098_0900;
    const EXPOSURE_READ_ONLY: u32 = 0x0098_091b;

    fn session() -> (Arc<MockEngine>, CaptureSession) {
        let engine = Arc::new(MockEngine::new());
        let session = CaptureSession::with_engine(engine.clone(), "/dev/video9")
            .expect("mock session opens");
        (engine, session)
    }

    #[tokio::test]
    async fn test_open_populates_catalogs_in_device_order() {
        let (engine, session) = session();

        let raw = engine.enumerate_controls().expect("raw controls");
        assert_eq!(session.controls().len(), raw.len());
        for (control, raw) in session.controls().iter().zip(&raw) {
            assert_eq!(control.id, raw.id);
        }

        assert_eq!(session.formats().len(), 3);
        assert_eq!(session.formats()[0].width, 640);
        assert_eq!(session.state(), SessionState::Opened);
        assert_eq!(session.width(), 0);
        assert_eq!(session.height(), 0);
    }

    #[tokio::test]
    async fn test_menu_catalog_entry_kinds() {
        let (_engine, session) = session();

        let menu = session
            .control_named("Power Line Frequency")
            .expect("menu control present");
        assert_eq!(menu.typ, ControlType::Menu);
        assert_eq!(menu.menu.len(), 3);
        assert!(matches!(menu.menu[1], MenuItem::Label(ref l) if l == "50 Hz"));

        let iso = session
            .control_named("ISO Sensitivity")
            .expect("integer-menu control present");
        assert_eq!(iso.typ, ControlType::IntegerMenu);
        assert_eq!(iso.menu.len(), 4);
        assert!(matches!(iso.menu[0], MenuItem::Value(100)));
    }

    #[tokio::test]
    async fn test_configure_takes_negotiated_dimensions() {
        let (_engine, session) = session();

        let requested = Format::new(1234, 700, FourCC::YUYV, FrameInterval::new(1, 30));
        session.config_set(&requested).expect("configure accepted");

        // The driver snapped to 1280x720, not the request
        assert_eq!(session.width(), 1280);
        assert_eq!(session.height(), 720);
        assert_eq!(session.state(), SessionState::Configured);

        let live = session.config_get().expect("config query");
        assert_eq!(live.width, session.width());
        assert_eq!(live.height, session.height());
    }

    #[tokio::test]
    async fn test_start_sets_dimensions_and_is_idempotent() {
        let (_engine, session) = session();

        session.start().expect("start");
        assert_eq!(session.state(), SessionState::Started);
        assert_eq!(session.width(), 640);
        assert_eq!(session.height(), 480);

        session.start().expect("re-start");
        assert_ne!(session.width(), 0);
        assert_ne!(session.height(), 0);
    }

    #[tokio::test]
    async fn test_start_failure_is_typed_and_nondestructive() {
        let (engine, session) = session();
        engine.set_refuse_start(true);

        let err = session.start().expect_err("start refused");
        assert!(matches!(err, CameraError::Start { .. }));
        assert_eq!(session.state(), SessionState::Opened);
    }

    #[tokio::test]
    async fn test_capture_invokes_callback_exactly_once() {
        let (engine, session) = session();
        session.start().expect("start");

        let fired = Arc::new(TestCounter::new(0));
        let (tx, rx) = oneshot::channel();
        let counter = Arc::clone(&fired);
        session
            .capture(move |success| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(success);
            })
            .expect("capture arms");

        engine.signal_ready();
        assert!(rx.await.expect("callback fired"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(engine.dequeue_count(), 1);

        // The watch is one-shot: new readiness without a new arm does nothing
        engine.signal_ready();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_rearms_independently() {
        let (engine, session) = session();
        session.start().expect("start");

        for expected in 1..=3u64 {
            let (tx, rx) = oneshot::channel();
            session
                .capture(move |success| {
                    let _ = tx.send(success);
                })
                .expect("fresh arm after each firing");
            engine.signal_ready();
            assert!(rx.await.expect("fired"));
            assert_eq!(engine.dequeue_count(), expected);
        }
    }

    #[tokio::test]
    async fn test_second_capture_while_pending_is_busy() {
        let (_engine, session) = session();
        session.start().expect("start");

        session.capture(|_| {}).expect("first capture arms");
        let err = session.capture(|_| {}).expect_err("second must be rejected");
        assert!(matches!(err, CameraError::Busy));
    }

    #[tokio::test]
    async fn test_dequeue_failure_reports_false() {
        let (engine, session) = session();
        session.start().expect("start");
        engine.set_fail_dequeue(true);

        let (tx, rx) = oneshot::channel();
        session
            .capture(move |success| {
                let _ = tx.send(success);
            })
            .expect("capture arms");
        engine.signal_ready();

        assert!(!rx.await.expect("callback fired"));

        // Retry path: the next capture succeeds once the fault clears
        engine.set_fail_dequeue(false);
        let (tx, rx) = oneshot::channel();
        session
            .capture(move |success| {
                let _ = tx.send(success);
            })
            .expect("retry arms");
        engine.signal_ready();
        assert!(rx.await.expect("callback fired"));
    }

    #[tokio::test]
    async fn test_stop_preempts_pending_capture() {
        let (engine, session) = session();
        session.start().expect("start");

        let capture_fired = Arc::new(TestCounter::new(0));
        let counter = Arc::clone(&capture_fired);
        session
            .capture(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("capture arms");

        let (tx, rx) = oneshot::channel();
        session
            .stop(move || {
                let _ = tx.send(());
            })
            .expect("stop preempts the capture watch");

        engine.signal_ready();
        rx.await.expect("stop callback fired");

        assert_eq!(capture_fired.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_fails_fast_when_request_rejected() {
        let (engine, session) = session();
        session.start().expect("start");
        engine.set_refuse_stop(true);

        let err = session.stop(|| {}).expect_err("stop request rejected");
        assert!(matches!(err, CameraError::Stop { .. }));
        // Still started; the drain watch was never armed
        assert_eq!(session.state(), SessionState::Started);
    }

    #[tokio::test]
    async fn test_second_stop_while_draining_is_busy() {
        let (_engine, session) = session();
        session.start().expect("start");

        session.stop(|| {}).expect("first stop arms the drain watch");
        let err = session.stop(|| {}).expect_err("second stop while draining");
        assert!(matches!(err, CameraError::Busy));
    }

    #[tokio::test]
    async fn test_stop_then_restart() {
        let (engine, session) = session();
        session.start().expect("start");

        let (tx, rx) = oneshot::channel();
        session
            .stop(move || {
                let _ = tx.send(());
            })
            .expect("stop");
        engine.signal_ready();
        rx.await.expect("drained");
        assert_eq!(session.state(), SessionState::Stopped);

        session.start().expect("restart after stop");
        assert_eq!(session.state(), SessionState::Started);
    }

    #[tokio::test]
    async fn test_frame_accessor_views() {
        let (engine, session) = session();
        session.start().expect("start");

        let (tx, rx) = oneshot::channel();
        session
            .capture(move |success| {
                let _ = tx.send(success);
            })
            .expect("capture arms");
        engine.signal_ready();
        assert!(rx.await.expect("captured"));

        let frame = session.frame();
        assert_eq!(frame.as_yuyv().len(), (640 * 480 * 2) as usize);
        assert!(frame.validate_size());
        assert_eq!(frame.to_rgb().len(), (640 * 480 * 3) as usize);
    }

    #[tokio::test]
    async fn test_control_set_then_get_round_trips() {
        let (_engine, session) = session();

        session
            .control_set(BRIGHTNESS, 32)
            .expect("writable control accepts value");
        assert_eq!(session.control_get(BRIGHTNESS).expect("readable"), 32);
    }

    #[tokio::test]
    async fn test_read_only_control_rejects_set() {
        let (_engine, session) = session();

        let err = session
            .control_set(EXPOSURE_READ_ONLY, 100)
            .expect_err("read-only control");
        assert!(matches!(
            err,
            CameraError::ControlAccess {
                id: EXPOSURE_READ_ONLY,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_control_is_typed_error() {
        let (_engine, session) = session();

        let err = session.control_get(0xdead_beef).expect_err("unknown id");
        assert!(matches!(err, CameraError::ControlAccess { .. }));
    }

    #[tokio::test]
    async fn test_control_set_chains() {
        let (_engine, session) = session();

        session
            .control_set(BRIGHTNESS, 10)
            .expect("first")
            .control_set(0x0098_0913, 0)
            .expect("chained");
        assert_eq!(session.control_get(BRIGHTNESS).expect("get"), 10);
    }

    #[tokio::test]
    async fn test_drop_cancels_pending_watch() {
        let engine = Arc::new(MockEngine::new());
        let fired = Arc::new(TestCounter::new(0));

        {
            let session = CaptureSession::with_engine(engine.clone(), "/dev/video9")
                .expect("mock session opens");
            session.start().expect("start");
            let counter = Arc::clone(&fired);
            session
                .capture(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("capture arms");
        } // session dropped with the watch pending

        engine.signal_ready();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
