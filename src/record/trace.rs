//! Per-session trace buffer.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

use crate::record::model::{TraceLevel, TraceLine};

/// Append-only log of trace lines for one in-flight request.
///
/// Appends may come from any thread the request's work lands on. Once the
/// owning session is sealed the buffer is frozen and later appends are
/// dropped.
#[derive(Debug, Default)]
pub struct TraceBuffer {
    inner: Mutex<TraceState>,
}

#[derive(Debug, Default)]
struct TraceState {
    lines: Vec<TraceLine>,
    frozen: bool,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line. Returns `false` if the buffer is already frozen.
    pub fn append(&self, at: DateTime<Utc>, level: TraceLevel, message: impl Into<String>) -> bool {
        let mut state = self.inner.lock().expect("trace buffer mutex poisoned");
        if state.frozen {
            return false;
        }
        state.lines.push(TraceLine {
            at,
            level,
            message: message.into(),
        });
        true
    }

    /// Freeze the buffer and take its lines in append order.
    pub fn freeze(&self) -> Vec<TraceLine> {
        let mut state = self.inner.lock().expect("trace buffer mutex poisoned");
        state.frozen = true;
        std::mem::take(&mut state.lines)
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.lock().expect("trace buffer mutex poisoned").frozen
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("trace buffer mutex poisoned").lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
