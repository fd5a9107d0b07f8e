//! Registry of in-flight capture sessions.
//!
//! Shared by the recorder (register on open, remove on seal), the tracing
//! capture layer (route log events to a session), and the reaper (seal
//! sessions that were never finished).

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::session::SessionShared;
use crate::record::{RecordId, TraceLevel};

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<RecordId, Arc<SessionShared>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, session: Arc<SessionShared>) {
        self.sessions.insert(session.id(), session);
    }

    pub(crate) fn remove(&self, id: &RecordId) -> Option<Arc<SessionShared>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub(crate) fn get(&self, id: &RecordId) -> Option<Arc<SessionShared>> {
        self.sessions.get(id).map(|r| r.value().clone())
    }

    /// Append a trace line to an in-flight session.
    /// Returns `false` if the session is unknown or already sealed.
    pub fn trace(&self, id: &RecordId, level: TraceLevel, message: impl Into<String>) -> bool {
        match self.get(id) {
            Some(session) => session.trace(level, message),
            None => false,
        }
    }

    /// Sessions open for longer than `max_age`.
    pub(crate) fn older_than(&self, max_age: Duration) -> Vec<Arc<SessionShared>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().age() >= max_age)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.sessions.contains_key(id)
    }
}
