//! Recorder: the ingress hook host pipelines call into.
//!
//! # Responsibilities
//! - Decide per request whether to record it (exclusion filter)
//! - Open capture sessions and announce them to live viewers
//! - Seal sessions into records, store them, announce completion
//! - Keep store failures away from the request path
//!
//! # Data Flow
//! ```text
//! on_request_start ─▶ filter ─excluded─▶ None
//!                       │
//!                       ▼
//!               CaptureSession ─register─▶ SessionRegistry ◀── reaper / capture layer
//!                       │ emit_begin
//!                       ▼
//! on_request_end / finish / abort ─seal─▶ Record ─insert─▶ RecordStorage
//!                                                  │
//!                                                  └─emit_end─▶ EventBroadcaster
//! ```
//!
//! # Design Decisions
//! - Settings live behind `ArcSwap` so config reloads never block requests
//! - Sealing is first-wins; owner, abort and reaper race safely
//! - The end event is emitted even when the insert failed
//! - The middleware seals inline but stores through a queue drained by one
//!   task, so a slow backend never holds a response and records land in
//!   seal order

pub mod reaper;
pub mod registry;

use arc_swap::ArcSwap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::broadcast::{EventBroadcaster, Subscription};
use crate::capture::session::{SealKind, SessionShared};
use crate::capture::{
    CaptureLimits, CaptureSession, ExclusionFilter, ExclusionRule, RequestDescriptor,
    RequestView, ResponseDescriptor,
};
use crate::config::schema::{InspectorConfig, RecorderConfig};
use crate::error::StorageResult;
use crate::observability::metrics;
use crate::query::QueryService;
use crate::record::{CapturedFailure, Record, TraceLevel};
use crate::storage::{InMemoryStorage, RecordStorage, RetentionPolicy, StorageFactory};

pub use reaper::SessionReaper;
pub use registry::SessionRegistry;

/// Runtime-swappable part of the recorder configuration.
#[derive(Debug, Clone, Default)]
pub struct RecorderSettings {
    pub filter: ExclusionFilter,
    pub limits: CaptureLimits,
}

impl RecorderSettings {
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            filter: ExclusionFilter::from_config(&config.excludes),
            limits: CaptureLimits {
                request_body_bytes: config.request_body_capture_limit_bytes,
                response_body_bytes: config.response_body_capture_limit_bytes,
            },
        }
    }
}

const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Sealed records waiting for the commit task.
const COMMIT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Inner {
    settings: ArcSwap<RecorderSettings>,
    storage: Arc<dyn RecordStorage>,
    broadcaster: EventBroadcaster,
    sessions: SessionRegistry,
    session_timeout: Duration,
    commits: OnceLock<mpsc::Sender<Record>>,
}

/// Request recorder. Cheap to clone; clones share all state.
#[derive(Debug, Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    /// Recorder over an existing store with default settings.
    pub fn new(storage: Arc<dyn RecordStorage>) -> Self {
        Self::assemble(
            RecorderSettings::default(),
            storage,
            EventBroadcaster::default(),
            SessionRegistry::new(),
            DEFAULT_SESSION_TIMEOUT,
        )
    }

    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::default()
    }

    fn assemble(
        settings: RecorderSettings,
        storage: Arc<dyn RecordStorage>,
        broadcaster: EventBroadcaster,
        sessions: SessionRegistry,
        session_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: ArcSwap::from_pointee(settings),
                storage,
                broadcaster,
                sessions,
                session_timeout,
                commits: OnceLock::new(),
            }),
        }
    }

    /// Evaluate the exclusion rules without opening anything.
    pub fn is_excluded(&self, request: &RequestView<'_>) -> bool {
        self.inner.settings.load().filter.should_exclude(request)
    }

    /// Request entry. Returns `None` when the request is excluded.
    pub fn on_request_start(&self, request: &RequestDescriptor) -> Option<CaptureSession> {
        let settings = self.inner.settings.load();
        if settings.filter.should_exclude(&request.view()) {
            metrics::record_excluded();
            tracing::trace!(method = %request.method, path = %request.path, "Request excluded from recording");
            return None;
        }

        let session = CaptureSession::open(request, settings.limits);
        self.inner.sessions.register(session.shared().clone());
        metrics::record_sessions_in_flight(self.inner.sessions.len());
        tracing::debug!(
            record_id = %session.id(),
            method = %request.method,
            path = %request.path,
            "Capture session opened"
        );
        self.inner.broadcaster.emit_begin(session.summary());
        Some(session)
    }

    /// Append a trace line. Returns `false` once the session is sealed.
    pub fn on_trace(
        &self,
        session: &CaptureSession,
        level: TraceLevel,
        message: impl Into<String>,
    ) -> bool {
        session.trace(level, message)
    }

    /// The handler returned and the response was fully sent.
    ///
    /// For hosts that stream responses, call `complete_processing` on the
    /// session when the handler returns and [`Recorder::finish`] after the
    /// last byte instead.
    pub async fn on_request_end(
        &self,
        session: CaptureSession,
        response: &ResponseDescriptor,
    ) -> Option<Arc<Record>> {
        session.complete_processing(response);
        self.finish(session).await
    }

    /// Seal after the response finished transferring.
    /// Returns `None` if the session was already sealed elsewhere.
    pub async fn finish(&self, session: CaptureSession) -> Option<Arc<Record>> {
        let record = session.seal(SealKind::Transferred)?;
        Some(self.commit(record).await)
    }

    /// Seal a session whose request never finished.
    pub async fn abort(
        &self,
        session: CaptureSession,
        reason: impl Into<String>,
    ) -> Option<Arc<Record>> {
        let record = session.seal(SealKind::Abandoned(CapturedFailure::aborted(reason)))?;
        tracing::debug!(record_id = %record.id, path = %record.path, "Capture session aborted");
        Some(self.commit(record).await)
    }

    /// Seal after the last byte went out and store in the background.
    ///
    /// The transfer checkpoint is taken here; the caller never waits on the
    /// store. Returns `false` if the session was already sealed elsewhere.
    /// Must be called from within a tokio runtime.
    pub fn finish_detached(&self, session: CaptureSession) -> bool {
        match session.seal(SealKind::Transferred) {
            Some(record) => {
                self.enqueue_commit(record);
                true
            }
            None => false,
        }
    }

    /// [`Recorder::abort`] without waiting on the store.
    pub fn abort_detached(&self, session: CaptureSession, reason: impl Into<String>) -> bool {
        match session.seal(SealKind::Abandoned(CapturedFailure::aborted(reason))) {
            Some(record) => {
                tracing::debug!(record_id = %record.id, path = %record.path, "Capture session aborted");
                self.enqueue_commit(record);
                true
            }
            None => false,
        }
    }

    /// Seal every session open longer than the session timeout.
    /// Returns the number of sessions this call sealed.
    pub async fn reap_expired(&self) -> usize {
        let timeout = self.inner.session_timeout;
        let mut reaped = 0;
        for shared in self.inner.sessions.older_than(timeout) {
            match self.seal_stale(&shared, timeout) {
                Some(record) => {
                    tracing::warn!(
                        record_id = %record.id,
                        path = %record.path,
                        timeout_secs = timeout.as_secs(),
                        "Sealing stale capture session"
                    );
                    self.commit(record).await;
                    reaped += 1;
                }
                None => {
                    self.inner.sessions.remove(&shared.id());
                }
            }
        }
        reaped
    }

    fn seal_stale(&self, shared: &SessionShared, timeout: Duration) -> Option<Record> {
        shared.seal(SealKind::Abandoned(CapturedFailure::timed_out(timeout)))
    }

    fn enqueue_commit(&self, record: Record) {
        let queue = self.inner.commits.get_or_init(|| self.spawn_committer());
        let (record, reason) = match queue.try_send(record) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(record)) => (record, "queue_full"),
            Err(mpsc::error::TrySendError::Closed(record)) => (record, "queue_closed"),
        };
        metrics::record_store_error(reason);
        tracing::warn!(record_id = %record.id, reason, "Record dropped before storage");
        self.inner.sessions.remove(&record.id);
        metrics::record_sessions_in_flight(self.inner.sessions.len());
        self.inner.broadcaster.emit_end(Arc::new(record));
    }

    fn spawn_committer(&self) -> mpsc::Sender<Record> {
        let (tx, mut rx) = mpsc::channel::<Record>(COMMIT_QUEUE_CAPACITY);
        // Weak, so the task ends once the last recorder handle is gone.
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                Recorder { inner }.commit(record).await;
            }
            tracing::debug!("Commit task stopped");
        });
        tx
    }

    async fn commit(&self, record: Record) -> Arc<Record> {
        self.inner.sessions.remove(&record.id);
        metrics::record_sessions_in_flight(self.inner.sessions.len());
        if let Some(duration) = record.timeline.total_duration() {
            metrics::record_request_duration(duration);
        }
        let outcome = if record.failure.is_some() {
            "faulted"
        } else {
            "success"
        };

        let record = Arc::new(record);
        match self.inner.storage.insert(record.clone()).await {
            Ok(inserted) => {
                metrics::record_captured(outcome);
                if !inserted.evicted.is_empty() {
                    metrics::record_evicted(inserted.evicted.len());
                    tracing::debug!(evicted = inserted.evicted.len(), "Evicted records past retention");
                }
                if let Ok(count) = self.inner.storage.len().await {
                    metrics::record_retained(count);
                }
            }
            Err(e) => {
                metrics::record_store_error("insert");
                tracing::warn!(record_id = %record.id, error = %e, "Failed to store record");
            }
        }

        self.inner.broadcaster.emit_end(record.clone());
        record
    }

    /// Swap exclusion rules and capture limits for requests opened from now on.
    pub fn apply_settings(&self, settings: RecorderSettings) {
        tracing::info!(
            rules = settings.filter.rules().len(),
            request_body_limit = settings.limits.request_body_bytes,
            response_body_limit = settings.limits.response_body_bytes,
            "Recorder settings applied"
        );
        self.inner.settings.store(Arc::new(settings));
    }

    pub fn settings(&self) -> Arc<RecorderSettings> {
        self.inner.settings.load_full()
    }

    pub fn storage(&self) -> &Arc<dyn RecordStorage> {
        &self.inner.storage
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.inner.broadcaster
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn session_timeout(&self) -> Duration {
        self.inner.session_timeout
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.broadcaster.subscribe()
    }

    pub fn query(&self) -> QueryService {
        QueryService::new(self.inner.storage.clone())
    }
}

/// Step-by-step construction of a [`Recorder`].
#[derive(Debug)]
pub struct RecorderBuilder {
    settings: RecorderSettings,
    storage: StorageFactory,
    retention: RetentionPolicy,
    subscriber_buffer: usize,
    sessions: Option<SessionRegistry>,
    session_timeout: Duration,
}

impl Default for RecorderBuilder {
    fn default() -> Self {
        Self {
            settings: RecorderSettings::default(),
            storage: StorageFactory::Memory,
            retention: RetentionPolicy::default(),
            subscriber_buffer: 256,
            sessions: None,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl RecorderBuilder {
    /// Builder preloaded from configuration.
    pub fn from_config(config: &InspectorConfig) -> Self {
        let recorder = &config.recorder;
        Self {
            settings: RecorderSettings::from_config(recorder),
            storage: StorageFactory::from(&config.storage),
            retention: RetentionPolicy {
                max_requests: recorder.retention_max_requests,
                max_body_bytes: recorder.retention_max_body_bytes,
            },
            subscriber_buffer: config.viewer.subscriber_buffer,
            sessions: None,
            session_timeout: Duration::from_secs(recorder.session_timeout_secs),
        }
    }

    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = policy;
        self
    }

    pub fn max_requests(mut self, max_requests: usize) -> Self {
        self.retention.max_requests = max_requests;
        self
    }

    pub fn exclude(mut self, rule: ExclusionRule) -> Self {
        self.settings.filter.push(rule);
        self
    }

    pub fn limits(mut self, limits: CaptureLimits) -> Self {
        self.settings.limits = limits;
        self
    }

    pub fn storage(mut self, factory: StorageFactory) -> Self {
        self.storage = factory;
        self
    }

    pub fn subscriber_buffer(mut self, buffer: usize) -> Self {
        self.subscriber_buffer = buffer;
        self
    }

    /// Share a registry created earlier, e.g. the one given to the logging layer.
    pub fn sessions(mut self, sessions: SessionRegistry) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub async fn build(self) -> StorageResult<Recorder> {
        tracing::info!(
            storage = ?self.storage,
            max_requests = self.retention.max_requests,
            max_body_bytes = ?self.retention.max_body_bytes,
            "Building recorder"
        );
        let storage = self.storage.build(self.retention).await?;
        Ok(Recorder::assemble(
            self.settings,
            storage,
            EventBroadcaster::new(self.subscriber_buffer),
            self.sessions.unwrap_or_default(),
            self.session_timeout,
        ))
    }

    /// Synchronous variant for the in-memory backend.
    pub fn build_in_memory(self) -> Recorder {
        Recorder::assemble(
            self.settings,
            Arc::new(InMemoryStorage::new(self.retention)),
            EventBroadcaster::new(self.subscriber_buffer),
            self.sessions.unwrap_or_default(),
            self.session_timeout,
        )
    }
}
