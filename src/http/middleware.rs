//! Recording middleware: connects an axum application to the [`Recorder`].
//!
//! # Data Flow
//! ```text
//! request ─▶ prefix / exclusion check ─excluded─▶ next.run (untouched)
//!              │
//!              ▼
//!        on_request_start ─▶ request body tapped ─▶ next.run inside `recorded_request` span
//!                                                       │
//!                          panic ◀──────────────────────┤
//!        recorded (500), unwind resumed                 ▼
//!                                         complete_processing(status, headers)
//!                                                       │
//!                                 response body tapped ─▶ end of stream ─▶ finish
//!                                                       └─ dropped early ─▶ abort
//! ```
//!
//! # Design Decisions
//! - The session is sealed on the last response chunk, so the
//!   transferring-completed checkpoint is real and not the handler return
//! - A dropped future or body (client gone, timeout) still seals the session
//! - Panics are recorded and then resumed; the middleware never changes
//!   what the host pipeline observes
//! - Sessions are sealed inline and stored in the background; the response
//!   never waits on the record store

use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use futures_util::{FutureExt, StreamExt};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

use crate::capture::{CaptureSession, RequestDescriptor, RequestView, ResponseDescriptor};
use crate::observability::metrics;
use crate::record::CapturedFailure;
use crate::recorder::Recorder;

/// State of the recording middleware.
#[derive(Debug, Clone)]
pub struct RecordingState {
    recorder: Recorder,
    inspector_prefix: Arc<str>,
}

impl RecordingState {
    /// `inspector_prefix` is never recorded so viewers do not record themselves.
    pub fn new(recorder: Recorder, inspector_prefix: &str) -> Self {
        Self {
            recorder,
            inspector_prefix: Arc::from(inspector_prefix),
        }
    }

    fn is_inspector_path(&self, path: &str) -> bool {
        match path.strip_prefix(&*self.inspector_prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Attach a failure to a response so the recorder stores it with the record.
///
/// For handlers that turn an error into a response themselves.
pub fn with_failure(mut response: Response, failure: CapturedFailure) -> Response {
    response.extensions_mut().insert(failure);
    response
}

/// Record every request that is not excluded.
///
/// Install with `axum::middleware::from_fn_with_state(RecordingState, record_requests)`.
pub async fn record_requests(
    State(state): State<RecordingState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    if state.is_inspector_path(parts.uri.path()) {
        return next.run(Request::from_parts(parts, body)).await;
    }
    if state.recorder.is_excluded(&RequestView::from_parts(&parts)) {
        metrics::record_excluded();
        return next.run(Request::from_parts(parts, body)).await;
    }

    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let descriptor = RequestDescriptor::from_parts(&parts, remote_addr);
    let Some(session) = state.recorder.on_request_start(&descriptor) else {
        return next.run(Request::from_parts(parts, body)).await;
    };

    let record_id = session.id();
    let is_head = parts.method == Method::HEAD;
    parts.extensions.insert(record_id);
    let span = tracing::info_span!(
        "recorded_request",
        record_id = %record_id,
        method = %parts.method,
        path = %parts.uri.path(),
    );

    let body = tap_request_body(&session, body);
    session.start_processing();
    let mut guard = SessionGuard::new(state.recorder.clone(), session);

    let outcome = AssertUnwindSafe(next.run(Request::from_parts(parts, body)).instrument(span))
        .catch_unwind()
        .await;

    let response = match outcome {
        Ok(response) => response,
        Err(payload) => {
            if let Some(session) = guard.take() {
                let failure = CapturedFailure::from_panic(payload.as_ref());
                tracing::error!(record_id = %record_id, message = %failure.message, "Handler panicked");
                session.fail(failure);
                session.complete_processing(&ResponseDescriptor::new(StatusCode::INTERNAL_SERVER_ERROR));
                state.recorder.finish_detached(session);
            }
            std::panic::resume_unwind(payload);
        }
    };

    let (mut parts, body) = response.into_parts();
    let Some(session) = guard.session() else {
        return Response::from_parts(parts, body);
    };
    if let Some(failure) = parts.extensions.remove::<CapturedFailure>() {
        session.fail(failure);
    }
    session.complete_processing(&ResponseDescriptor::from_parts(&parts));

    if is_head || body.is_end_stream() {
        if let Some(session) = guard.take() {
            state.recorder.finish_detached(session);
        }
        return Response::from_parts(parts, body);
    }

    let expected_len = declared_len(&parts, &body);
    Response::from_parts(parts, tap_response_body(guard, body, expected_len))
}

fn tap_request_body(session: &CaptureSession, body: Body) -> Body {
    if body.is_end_stream() {
        return body;
    }
    let sink = session.request_body_sink();
    Body::from_stream(body.into_data_stream().map(move |chunk| {
        if let Ok(bytes) = &chunk {
            sink.push(bytes);
        }
        chunk
    }))
}

/// Forward the response body, copying chunks into the session and sealing it
/// once the last chunk went out.
///
/// With a known length the session is sealed as the final chunk is handed
/// over, since the server may drop a fully written body without polling it
/// to the end.
fn tap_response_body(guard: SessionGuard, body: Body, expected_len: Option<u64>) -> Body {
    let sink = match guard.session() {
        Some(session) => session.response_body_sink(),
        None => return body,
    };
    let stream = futures_util::stream::unfold(
        (body.into_data_stream(), guard, 0u64),
        move |(mut stream, mut guard, mut sent)| {
            let sink = sink.clone();
            async move {
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        sink.push(&chunk);
                        sent += chunk.len() as u64;
                        if expected_len == Some(sent) {
                            if let Some(session) = guard.take() {
                                guard.recorder.finish_detached(session);
                            }
                        }
                        Some((Ok(chunk), (stream, guard, sent)))
                    }
                    Some(Err(e)) => {
                        if let Some(session) = guard.take() {
                            tracing::warn!(record_id = %session.id(), error = %e, "Response body failed mid-stream");
                            guard.recorder.abort_detached(session, format!("response body error: {e}"));
                        }
                        Some((Err(e), (stream, guard, sent)))
                    }
                    None => {
                        if let Some(session) = guard.take() {
                            guard.recorder.finish_detached(session);
                        }
                        None
                    }
                }
            }
        },
    );
    Body::from_stream(stream)
}

fn declared_len(parts: &http::response::Parts, body: &Body) -> Option<u64> {
    body.size_hint().exact().or_else(|| {
        parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    })
}

/// Owns a session while the request is in flight; seals it as aborted if
/// dropped before someone takes it.
struct SessionGuard {
    recorder: Recorder,
    session: Option<CaptureSession>,
}

impl SessionGuard {
    fn new(recorder: Recorder, session: CaptureSession) -> Self {
        Self {
            recorder,
            session: Some(session),
        }
    }

    fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    fn take(&mut self) -> Option<CaptureSession> {
        self.session.take()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if session.is_sealed() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let _runtime = handle.enter();
                self.recorder
                    .abort_detached(session, "request dropped before the response completed");
            }
            Err(_) => {
                tracing::warn!(record_id = %session.id(), "No runtime to seal dropped session; left to the reaper");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspector_prefix_matching() {
        let recorder = Recorder::builder().build_in_memory();
        let state = RecordingState::new(recorder, "/_inspector");
        assert!(state.is_inspector_path("/_inspector"));
        assert!(state.is_inspector_path("/_inspector/api/records"));
        assert!(!state.is_inspector_path("/_inspectorx"));
        assert!(!state.is_inspector_path("/api/_inspector"));
    }
}
