//! One-shot readiness watches.
//!
//! A watch turns "the device's readiness descriptor became readable" into
//! exactly one invocation of a domain action. The registration is removed
//! from its slot before the action runs, so the action is free to arm a
//! fresh watch; a registration that was preempted or cancelled never runs
//! its action.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::engine::CaptureEngine;
use crate::error::CameraError;

/// What a pending registration was armed for. Stop watches may preempt
/// capture watches; nothing preempts a stop watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchKind {
    Capture,
    Stop,
}

struct WatchRegistration {
    kind: WatchKind,
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct WatchState {
    current: Option<WatchRegistration>,
    next_generation: u64,
}

/// A session's single watch slot: at most one registration outstanding.
#[derive(Clone, Default)]
pub(crate) struct WatchSlot {
    state: Arc<Mutex<WatchState>>,
}

impl WatchSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot watch. Fails with [`CameraError::Busy`] while another
    /// registration is outstanding, except that a stop watch armed with
    /// `preempt_capture` replaces a pending capture watch (whose action is
    /// dropped uninvoked).
    pub(crate) fn arm<F>(
        &self,
        kind: WatchKind,
        preempt_capture: bool,
        engine: Arc<dyn CaptureEngine>,
        on_ready: F,
    ) -> Result<(), CameraError>
    where
        F: FnOnce(io::Result<()>) + Send + 'static,
    {
        let mut state = self.state.lock();

        if let Some(pending) = &state.current {
            if preempt_capture && pending.kind == WatchKind::Capture {
                if let Some(pending) = state.current.take() {
                    pending.handle.abort();
                }
            } else {
                return Err(CameraError::Busy);
            }
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let weak = Arc::downgrade(&self.state);
        let handle = tokio::spawn(async move {
            let result = engine.wait_readable().await;

            // Deregister first. A stale generation means this registration
            // was preempted or cancelled while the wait completed; its
            // action must not run.
            let Some(shared) = weak.upgrade() else {
                return;
            };
            {
                let mut state = shared.lock();
                match &state.current {
                    Some(current) if current.generation == generation => {
                        state.current = None;
                    }
                    _ => return,
                }
            }

            on_ready(result);
        });

        state.current = Some(WatchRegistration {
            kind,
            generation,
            handle,
        });
        Ok(())
    }

    /// Cancel any outstanding registration without invoking its action.
    /// Used at session teardown, before the device handle is released.
    pub(crate) fn cancel_pending(&self) {
        if let Some(pending) = self.state.lock().current.take() {
            pending.handle.abort();
        }
    }

    /// Kind of the outstanding registration, if any.
    pub(crate) fn pending_kind(&self) -> Option<WatchKind> {
        self.state.lock().current.as_ref().map(|pending| pending.kind)
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.state.lock().current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn engine() -> Arc<MockEngine> {
        Arc::new(MockEngine::new())
    }

    #[tokio::test]
    async fn test_fires_exactly_once() {
        let engine = engine();
        let slot = WatchSlot::new();
        let fired = Arc::new(AtomicU32::new(0));
        let (tx, rx) = oneshot::channel();

        let counter = Arc::clone(&fired);
        slot.arm(WatchKind::Capture, false, engine.clone(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        })
        .expect("slot empty");

        engine.signal_ready();
        rx.await.expect("watch fired");
        // A second readiness signal has no registration to wake.
        engine.signal_ready();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!slot.is_armed());
    }

    #[tokio::test]
    async fn test_second_arm_is_busy() {
        let engine = engine();
        let slot = WatchSlot::new();

        slot.arm(WatchKind::Capture, false, engine.clone(), |_| {})
            .expect("first arm");
        let err = slot
            .arm(WatchKind::Capture, false, engine.clone(), |_| {})
            .expect_err("second arm must be rejected");
        assert!(matches!(err, CameraError::Busy));
    }

    #[tokio::test]
    async fn test_stop_preempts_capture() {
        let engine = engine();
        let slot = WatchSlot::new();
        let capture_fired = Arc::new(AtomicU32::new(0));
        let (tx, rx) = oneshot::channel();

        let counter = Arc::clone(&capture_fired);
        slot.arm(WatchKind::Capture, false, engine.clone(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("capture armed");

        slot.arm(WatchKind::Stop, true, engine.clone(), move |_| {
            let _ = tx.send(());
        })
        .expect("stop preempts the pending capture");

        engine.signal_ready();
        rx.await.expect("stop watch fired");
        assert_eq!(capture_fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_does_not_preempt_stop() {
        let engine = engine();
        let slot = WatchSlot::new();

        slot.arm(WatchKind::Stop, true, engine.clone(), |_| {})
            .expect("first stop armed");
        let err = slot
            .arm(WatchKind::Stop, true, engine.clone(), |_| {})
            .expect_err("second stop must be rejected");
        assert!(matches!(err, CameraError::Busy));
    }

    #[tokio::test]
    async fn test_cancel_pending_drops_action() {
        let engine = engine();
        let slot = WatchSlot::new();
        let fired = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fired);
        slot.arm(WatchKind::Capture, false, engine.clone(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("armed");

        slot.cancel_pending();
        engine.signal_ready();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!slot.is_armed());
    }

    #[tokio::test]
    async fn test_rearm_after_fire_is_independent() {
        let engine = engine();
        let slot = WatchSlot::new();

        let (tx1, rx1) = oneshot::channel();
        slot.arm(WatchKind::Capture, false, engine.clone(), move |_| {
            let _ = tx1.send(());
        })
        .expect("first arm");
        engine.signal_ready();
        rx1.await.expect("first fire");

        let (tx2, rx2) = oneshot::channel();
        slot.arm(WatchKind::Capture, false, engine.clone(), move |_| {
            let _ = tx2.send(());
        })
        .expect("slot free again after firing");
        engine.signal_ready();
        rx2.await.expect("second fire");
    }
}
