//! Record data model.
//!
//! A [`Record`] is the sealed, immutable snapshot of one recorded request.
//! Viewers mostly see the two derived shapes: [`RecordSummary`] for timelines
//! and [`RecordDetail`] for the detail pane. Body bytes are only ever served
//! through the dedicated body queries.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Opaque, process-unique identifier of a recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Case-insensitive, multi-valued header mapping.
///
/// Names are stored lowercase, which is also how `http::HeaderMap` normalizes
/// them, so a table built from a header map round-trips exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderTable(BTreeMap<String, Vec<String>>);

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture every value of every header. Non UTF-8 values are kept lossily.
    pub fn from_header_map(headers: &http::HeaderMap) -> Self {
        let mut table = Self::new();
        for (name, value) in headers.iter() {
            table.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        table
    }

    /// Add a value, keeping any values already present for the name.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// All values for `name`, matched case-insensitively.
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.0.get(&name.to_ascii_lowercase()).map(Vec::as_slice)
    }

    /// The first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (name, value) in iter {
            table.append(name.as_ref(), value);
        }
        table
    }
}

/// Severity of a trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&tracing::Level> for TraceLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => TraceLevel::Trace,
            tracing::Level::DEBUG => TraceLevel::Debug,
            tracing::Level::INFO => TraceLevel::Info,
            tracing::Level::WARN => TraceLevel::Warn,
            tracing::Level::ERROR => TraceLevel::Error,
        }
    }
}

/// One timestamped trace message attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceLine {
    pub at: DateTime<Utc>,
    pub level: TraceLevel,
    pub message: String,
}

/// Lifecycle checkpoints of a request.
///
/// Ordering: `received_at <= processing_started_at <= processing_completed_at
/// <= transferring_started_at <= transferring_completed_at`. The transfer
/// checkpoints are unset when the response never finished streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub received_at: DateTime<Utc>,
    pub processing_started_at: DateTime<Utc>,
    pub processing_completed_at: DateTime<Utc>,
    pub transferring_started_at: Option<DateTime<Utc>>,
    pub transferring_completed_at: Option<DateTime<Utc>>,
}

impl Timeline {
    /// Check the checkpoint ordering.
    pub fn is_monotonic(&self) -> bool {
        let mut points = vec![
            self.received_at,
            self.processing_started_at,
            self.processing_completed_at,
        ];
        points.extend(self.transferring_started_at);
        points.extend(self.transferring_completed_at);
        points.windows(2).all(|w| w[0] <= w[1])
    }

    /// Time from receipt to the last byte sent, if the transfer finished.
    pub fn total_duration(&self) -> Option<Duration> {
        self.transferring_completed_at
            .and_then(|done| (done - self.received_at).to_std().ok())
    }
}

/// Captured body bytes, capped at the configured limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedBody {
    /// The retained prefix of the body.
    pub data: Bytes,
    /// Bytes observed on the wire, including the dropped tail.
    pub total_len: u64,
    pub truncated: bool,
}

impl CapturedBody {
    /// Number of bytes dropped past the capture limit.
    pub fn truncated_bytes(&self) -> u64 {
        self.total_len.saturating_sub(self.data.len() as u64)
    }

    pub fn info(&self) -> BodyInfo {
        BodyInfo {
            captured_len: self.data.len() as u64,
            total_len: self.total_len,
            truncated: self.truncated,
        }
    }
}

/// Body metadata exposed with a record detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyInfo {
    pub captured_len: u64,
    pub total_len: u64,
    pub truncated: bool,
}

/// A failure observed while the request was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFailure {
    pub kind: String,
    pub message: String,
    /// `source()` chain of the error, outermost first.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

pub const FAILURE_KIND_PANIC: &str = "panic";
pub const FAILURE_KIND_ABORTED: &str = "aborted";
pub const FAILURE_KIND_TIMEOUT: &str = "timeout";

impl CapturedFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            sources: Vec::new(),
            backtrace: None,
        }
    }

    /// Describe an error value, walking its source chain.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let kind = std::any::type_name_of_val(err)
            .rsplit("::")
            .next()
            .unwrap_or("error")
            .to_string();
        let mut sources = Vec::new();
        let mut next = err.source();
        while let Some(source) = next {
            sources.push(source.to_string());
            next = source.source();
        }
        let backtrace = std::backtrace::Backtrace::capture();
        Self {
            kind,
            message: err.to_string(),
            sources,
            backtrace: match backtrace.status() {
                std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
                _ => None,
            },
        }
    }

    /// Describe a panic payload as returned by `catch_unwind`.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::new(FAILURE_KIND_PANIC, message)
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::new(FAILURE_KIND_ABORTED, reason)
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            FAILURE_KIND_TIMEOUT,
            format!("session not completed within {}s", after.as_secs()),
        )
    }
}

/// Immutable snapshot of one recorded request/response cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub secure: bool,
    pub method: String,
    pub host: String,
    pub path: String,
    pub query: Option<String>,
    pub remote_addr: Option<IpAddr>,
    /// Unset when no response was produced.
    pub status: Option<u16>,
    pub request_headers: HeaderTable,
    pub response_headers: HeaderTable,
    pub request_body: Option<CapturedBody>,
    pub response_body: Option<CapturedBody>,
    pub timeline: Timeline,
    pub failure: Option<CapturedFailure>,
    pub traces: Vec<TraceLine>,
}

impl Record {
    /// A record is completed once its response finished transferring.
    pub fn is_completed(&self) -> bool {
        self.timeline.transferring_completed_at.is_some()
    }

    /// Captured body bytes, used for retention pressure accounting.
    pub fn body_size(&self) -> u64 {
        [&self.request_body, &self.response_body]
            .into_iter()
            .flatten()
            .map(|body| body.data.len() as u64)
            .sum()
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id,
            secure: self.secure,
            method: self.method.clone(),
            host: self.host.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            remote_addr: self.remote_addr,
            status: self.status,
            received_at: self.timeline.received_at,
            duration_ms: self
                .timeline
                .total_duration()
                .map(|d| d.as_millis() as u64),
            is_completed: self.is_completed(),
            has_failure: self.failure.is_some(),
        }
    }

    pub fn detail(&self) -> RecordDetail {
        RecordDetail {
            id: self.id,
            secure: self.secure,
            method: self.method.clone(),
            host: self.host.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            remote_addr: self.remote_addr,
            status: self.status,
            is_completed: self.is_completed(),
            request_headers: self.request_headers.clone(),
            response_headers: self.response_headers.clone(),
            request_body: self.request_body.as_ref().map(CapturedBody::info),
            response_body: self.response_body.as_ref().map(CapturedBody::info),
            timeline: self.timeline.clone(),
            failure: self.failure.clone(),
            traces: self.traces.clone(),
        }
    }
}

/// Lightweight listing entry, also the payload of a begin event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: RecordId,
    pub secure: bool,
    pub method: String,
    pub host: String,
    pub path: String,
    pub query: Option<String>,
    pub remote_addr: Option<IpAddr>,
    pub status: Option<u16>,
    pub received_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub is_completed: bool,
    pub has_failure: bool,
}

/// Everything about a record except its body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDetail {
    pub id: RecordId,
    pub secure: bool,
    pub method: String,
    pub host: String,
    pub path: String,
    pub query: Option<String>,
    pub remote_addr: Option<IpAddr>,
    pub status: Option<u16>,
    pub is_completed: bool,
    pub request_headers: HeaderTable,
    pub response_headers: HeaderTable,
    pub request_body: Option<BodyInfo>,
    pub response_body: Option<BodyInfo>,
    pub timeline: Timeline,
    pub failure: Option<CapturedFailure>,
    pub traces: Vec<TraceLine>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderName, HeaderValue};

    #[test]
    fn test_header_table_preserves_multiple_values() {
        let mut headers = http::HeaderMap::new();
        headers.append("Accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-trace"),
            HeaderValue::from_static("abc"),
        );

        let table = HeaderTable::from_header_map(&headers);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get_all("ACCEPT").unwrap(),
            &["text/html".to_string(), "application/json".to_string()]
        );
        assert_eq!(table.get("X-Trace"), Some("abc"));
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn test_record_id_parse_roundtrip() {
        let id = RecordId::new();
        let parsed: RecordId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-an-id".parse::<RecordId>().is_err());
    }

    #[test]
    fn test_truncated_bytes() {
        let body = CapturedBody {
            data: Bytes::from_static(b"abcd"),
            total_len: 10,
            truncated: true,
        };
        assert_eq!(body.truncated_bytes(), 6);
        assert_eq!(body.info().captured_len, 4);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn test_failure_from_error_walks_sources() {
        let err = Outer(std::io::Error::other("disk gone"));
        let failure = CapturedFailure::from_error(&err);
        assert_eq!(failure.kind, "Outer");
        assert_eq!(failure.message, "outer failure");
        assert_eq!(failure.sources, vec!["disk gone".to_string()]);
    }

    #[test]
    fn test_failure_from_panic_payload() {
        let payload: Box<dyn Any + Send> = Box::new("attempt to divide by zero");
        let failure = CapturedFailure::from_panic(payload.as_ref());
        assert_eq!(failure.kind, FAILURE_KIND_PANIC);
        assert_eq!(failure.message, "attempt to divide by zero");
    }
}
