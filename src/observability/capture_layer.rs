//! Tracing layer that copies log events into the trace buffer of the request
//! they were emitted for.
//!
//! The recording middleware enters a `recorded_request` span carrying the
//! record id. When that span is created the layer resolves the id against the
//! session registry and stashes the session in the span's extensions. Any
//! event emitted inside the span, on whichever task or thread, is then
//! appended to that session until it is sealed.

use std::fmt::Write as _;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::capture::session::SessionShared;
use crate::record::{RecordId, TraceLevel};
use crate::recorder::SessionRegistry;

/// Name of the span the recording middleware opens per request.
pub const RECORDED_REQUEST_SPAN: &str = "recorded_request";

/// Span field holding the record id.
pub const RECORD_ID_FIELD: &str = "record_id";

struct SpanSession(Arc<SessionShared>);

pub struct TraceCaptureLayer {
    sessions: SessionRegistry,
}

impl TraceCaptureLayer {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self { sessions }
    }
}

impl<S> Layer<S> for TraceCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != RECORDED_REQUEST_SPAN {
            return;
        }
        let mut visitor = RecordIdVisitor::default();
        attrs.record(&mut visitor);
        let Some(record_id) = visitor.record_id else {
            return;
        };
        let Some(session) = self.sessions.get(&record_id) else {
            return;
        };
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanSession(session));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };
        for span in scope {
            let extensions = span.extensions();
            if let Some(SpanSession(session)) = extensions.get::<SpanSession>() {
                let mut visitor = MessageVisitor::default();
                event.record(&mut visitor);
                session.trace(TraceLevel::from(event.metadata().level()), visitor.finish());
                return;
            }
        }
    }
}

#[derive(Default)]
struct RecordIdVisitor {
    record_id: Option<RecordId>,
}

impl Visit for RecordIdVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == RECORD_ID_FIELD {
            self.record_id = format!("{value:?}").parse().ok();
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == RECORD_ID_FIELD {
            self.record_id = value.parse().ok();
        }
    }
}

/// Renders `message key=value ...`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }

    fn push_field(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }
}
