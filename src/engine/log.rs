use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

/// Per-session record of the engine's last failure detail.
///
/// Engines write into it at the point of failure; the session reads it back
/// only when translating a failed call into a typed error. Cloning shares
/// the underlying cell.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    last: Arc<Mutex<Option<String>>>,
}

impl LogContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an OS-level error for `op`, keeping the errno message.
    pub fn record_error(&self, op: &str, err: &io::Error) {
        tracing::error!("camera error [{}]: {}", op, err);
        *self.last.lock() = Some(format!("{op}: {err}"));
    }

    /// Record a logical failure with no OS error attached.
    pub fn record_fail(&self, op: &str) {
        tracing::warn!("camera fail [{}]", op);
        *self.last.lock() = Some(op.to_string());
    }

    /// Take the last record, clearing it so a later failure cannot surface
    /// a stale message.
    #[must_use]
    pub fn take(&self) -> Option<String> {
        self.last.lock().take()
    }
}
