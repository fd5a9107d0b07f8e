//! Capture session: the mutable staging area of one in-flight request.
//!
//! # State Machine
//! ```text
//! Open ──start_processing──▶ Processing ──complete_processing──▶ Completed(Success)
//!   │                            │
//!   └────────────fail────────────┴──────────────────────────────▶ Completed(Faulted)
//!
//! any state ──seal──▶ Record (exactly once)
//! ```
//!
//! The owning request holds the [`CaptureSession`]. Body taps hold a
//! [`BodySink`] and the recorder's registry holds the shared state so a stuck
//! session can still be sealed by the reaper. Whoever seals first wins; every
//! later mutation or seal attempt is a no-op.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::capture::body::BodyBuffer;
use crate::capture::filter::RequestView;
use crate::record::{
    CapturedFailure, HeaderTable, Record, RecordId, RecordSummary, Timeline, TraceBuffer,
    TraceLevel,
};

/// Request metadata handed over by the host pipeline at request entry.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub secure: bool,
    pub method: http::Method,
    pub host: String,
    pub path: String,
    pub query: Option<String>,
    pub remote_addr: Option<IpAddr>,
    pub headers: http::HeaderMap,
}

impl RequestDescriptor {
    /// Describe a request from its `http` head.
    pub fn from_parts(parts: &http::request::Parts, remote_addr: Option<IpAddr>) -> Self {
        let view = RequestView::from_parts(parts);
        Self {
            secure: parts.uri.scheme() == Some(&http::uri::Scheme::HTTPS),
            method: parts.method.clone(),
            host: view.host.to_string(),
            path: view.path.to_string(),
            query: view.query.map(str::to_string),
            remote_addr,
            headers: parts.headers.clone(),
        }
    }

    pub fn view(&self) -> RequestView<'_> {
        RequestView {
            method: self.method.as_str(),
            host: &self.host,
            path: &self.path,
            query: self.query.as_deref(),
            headers: &self.headers,
        }
    }
}

/// Response metadata handed over when the handler returns.
#[derive(Debug, Clone)]
pub struct ResponseDescriptor {
    pub status: http::StatusCode,
    pub headers: http::HeaderMap,
}

impl ResponseDescriptor {
    pub fn new(status: http::StatusCode) -> Self {
        Self {
            status,
            headers: http::HeaderMap::new(),
        }
    }

    pub fn from_parts(parts: &http::response::Parts) -> Self {
        Self {
            status: parts.status,
            headers: parts.headers.clone(),
        }
    }
}

/// Capture limits applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    pub request_body_bytes: usize,
    pub response_body_bytes: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            request_body_bytes: 1024 * 1024,
            response_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Open,
    Processing,
    Completed(Outcome),
}

/// How a session is being sealed.
#[derive(Debug, Clone)]
pub(crate) enum SealKind {
    /// The response finished transferring.
    Transferred,
    /// The request never finished; recorded as faulted and incomplete.
    Abandoned(CapturedFailure),
}

/// Wall-clock anchor plus a monotonic clock, so checkpoints never go backwards.
#[derive(Debug)]
struct SessionClock {
    wall: DateTime<Utc>,
    started: Instant,
}

impl SessionClock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or_default();
        self.wall + elapsed
    }
}

#[derive(Debug)]
struct RequestMeta {
    secure: bool,
    method: String,
    host: String,
    path: String,
    query: Option<String>,
    remote_addr: Option<IpAddr>,
    headers: HeaderTable,
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    sealed: bool,
    processing_started_at: Option<DateTime<Utc>>,
    processing_completed_at: Option<DateTime<Utc>>,
    transferring_started_at: Option<DateTime<Utc>>,
    status: Option<u16>,
    response_headers: HeaderTable,
    request_body: BodyBuffer,
    response_body: BodyBuffer,
    failure: Option<CapturedFailure>,
}

/// State shared between the owning handle, body taps, and the registry.
#[derive(Debug)]
pub(crate) struct SessionShared {
    id: RecordId,
    clock: SessionClock,
    request: RequestMeta,
    trace: TraceBuffer,
    state: Mutex<SessionState>,
}

impl SessionShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().expect("capture session mutex poisoned")
    }

    pub(crate) fn id(&self) -> RecordId {
        self.id
    }

    pub(crate) fn age(&self) -> Duration {
        self.clock.started.elapsed()
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub(crate) fn trace(&self, level: TraceLevel, message: impl Into<String>) -> bool {
        self.trace.append(self.clock.now(), level, message)
    }

    fn push_body(&self, side: BodySide, chunk: &[u8]) {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.sealed {
            return;
        }
        match side {
            BodySide::Request => state.request_body.push(chunk),
            BodySide::Response => {
                if state.transferring_started_at.is_none() {
                    let floor = state.processing_completed_at.unwrap_or(now);
                    state.transferring_started_at = Some(now.max(floor));
                }
                state.response_body.push(chunk);
            }
        }
    }

    /// Seal into a record. Returns `None` if someone else already sealed it.
    pub(crate) fn seal(&self, kind: SealKind) -> Option<Record> {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.sealed {
            return None;
        }
        state.sealed = true;
        let traces = self.trace.freeze();

        let received_at = self.clock.wall;
        let processing_started_at = state.processing_started_at.unwrap_or(now).max(received_at);
        let processing_completed_at = state
            .processing_completed_at
            .unwrap_or(now)
            .max(processing_started_at);

        let (transferring_started_at, transferring_completed_at) = match &kind {
            SealKind::Transferred => {
                let started = state
                    .transferring_started_at
                    .unwrap_or(now)
                    .max(processing_completed_at);
                (Some(started), Some(now.max(started)))
            }
            SealKind::Abandoned(_) => (state.transferring_started_at, None),
        };

        if let SealKind::Abandoned(failure) = kind {
            state.phase = SessionPhase::Completed(Outcome::Faulted);
            state.failure.get_or_insert(failure);
        }

        Some(Record {
            id: self.id,
            secure: self.request.secure,
            method: self.request.method.clone(),
            host: self.request.host.clone(),
            path: self.request.path.clone(),
            query: self.request.query.clone(),
            remote_addr: self.request.remote_addr,
            status: state.status,
            request_headers: self.request.headers.clone(),
            response_headers: std::mem::take(&mut state.response_headers),
            request_body: state.request_body.take(),
            response_body: state.response_body.take(),
            timeline: Timeline {
                received_at,
                processing_started_at,
                processing_completed_at,
                transferring_started_at,
                transferring_completed_at,
            },
            failure: state.failure.take(),
            traces,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodySide {
    Request,
    Response,
}

/// Write end of a body tap.
#[derive(Debug, Clone)]
pub struct BodySink {
    shared: Arc<SessionShared>,
    side: BodySide,
}

impl BodySink {
    pub fn push(&self, chunk: &[u8]) {
        self.shared.push_body(self.side, chunk);
    }
}

/// Owning handle of an in-flight capture.
///
/// Created by [`Recorder::on_request_start`](crate::recorder::Recorder::on_request_start)
/// and consumed when the request ends.
#[derive(Debug)]
pub struct CaptureSession {
    shared: Arc<SessionShared>,
}

impl CaptureSession {
    pub(crate) fn open(descriptor: &RequestDescriptor, limits: CaptureLimits) -> Self {
        let shared = SessionShared {
            id: RecordId::new(),
            clock: SessionClock::start(),
            request: RequestMeta {
                secure: descriptor.secure,
                method: descriptor.method.to_string(),
                host: descriptor.host.clone(),
                path: descriptor.path.clone(),
                query: descriptor.query.clone(),
                remote_addr: descriptor.remote_addr,
                headers: HeaderTable::from_header_map(&descriptor.headers),
            },
            trace: TraceBuffer::new(),
            state: Mutex::new(SessionState {
                phase: SessionPhase::Open,
                sealed: false,
                processing_started_at: None,
                processing_completed_at: None,
                transferring_started_at: None,
                status: None,
                response_headers: HeaderTable::new(),
                request_body: BodyBuffer::new(limits.request_body_bytes),
                response_body: BodyBuffer::new(limits.response_body_bytes),
                failure: None,
            }),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn id(&self) -> RecordId {
        self.shared.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().phase
    }

    pub fn is_sealed(&self) -> bool {
        self.shared.is_sealed()
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// Summary of the session as known at request entry.
    pub fn summary(&self) -> RecordSummary {
        let request = &self.shared.request;
        RecordSummary {
            id: self.shared.id,
            secure: request.secure,
            method: request.method.clone(),
            host: request.host.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            remote_addr: request.remote_addr,
            status: None,
            received_at: self.shared.clock.wall,
            duration_ms: None,
            is_completed: false,
            has_failure: false,
        }
    }

    /// The request reached the handler.
    pub fn start_processing(&self) {
        let now = self.shared.clock.now();
        let mut state = self.shared.lock();
        if state.sealed || state.phase != SessionPhase::Open {
            return;
        }
        state.phase = SessionPhase::Processing;
        state.processing_started_at = Some(now);
    }

    /// The handler returned a response.
    pub fn complete_processing(&self, response: &ResponseDescriptor) {
        let now = self.shared.clock.now();
        let mut state = self.shared.lock();
        if state.sealed {
            return;
        }
        let started = *state.processing_started_at.get_or_insert(now);
        state.processing_completed_at.get_or_insert(now.max(started));
        state.status = Some(response.status.as_u16());
        state.response_headers = HeaderTable::from_header_map(&response.headers);
        if !matches!(state.phase, SessionPhase::Completed(Outcome::Faulted)) {
            state.phase = SessionPhase::Completed(Outcome::Success);
        }
    }

    /// The handler failed. The first recorded failure is kept.
    pub fn fail(&self, failure: CapturedFailure) {
        let now = self.shared.clock.now();
        let mut state = self.shared.lock();
        if state.sealed {
            return;
        }
        let started = *state.processing_started_at.get_or_insert(now);
        state.processing_completed_at.get_or_insert(now.max(started));
        state.phase = SessionPhase::Completed(Outcome::Faulted);
        state.failure.get_or_insert(failure);
    }

    /// Record an `Err` as the session failure and hand the result back untouched.
    pub fn record_result<T, E>(&self, result: Result<T, E>) -> Result<T, E>
    where
        E: std::error::Error,
    {
        if let Err(err) = &result {
            self.fail(CapturedFailure::from_error(err));
        }
        result
    }

    pub fn trace(&self, level: TraceLevel, message: impl Into<String>) -> bool {
        self.shared.trace(level, message)
    }

    pub fn request_body_sink(&self) -> BodySink {
        BodySink {
            shared: self.shared.clone(),
            side: BodySide::Request,
        }
    }

    pub fn response_body_sink(&self) -> BodySink {
        BodySink {
            shared: self.shared.clone(),
            side: BodySide::Response,
        }
    }

    pub fn capture_request_body(&self, chunk: &[u8]) {
        self.shared.push_body(BodySide::Request, chunk);
    }

    pub fn capture_response_body(&self, chunk: &[u8]) {
        self.shared.push_body(BodySide::Response, chunk);
    }

    pub(crate) fn seal(&self, kind: SealKind) -> Option<Record> {
        self.shared.seal(kind)
    }
}
