//! Live fan-out of request lifecycle events.
//!
//! # Data Flow
//! ```text
//! Recorder::on_request_start ──emit_begin──┐
//!                                          ├──▶ snapshot of subscribers (arc-swap)
//! Recorder::finish ───────────emit_end─────┘        │ try_send per subscriber
//!                                                   ▼
//!                                     bounded mpsc ──▶ websocket / any transport
//! ```
//!
//! Emission never waits: a full subscriber queue drops the event for that
//! subscriber only, and a closed one is unsubscribed. Each subscriber sees
//! events in emission order. Nothing is replayed, so a reconnecting viewer
//! resynchronizes through the query service.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::observability::metrics;
use crate::record::{Record, RecordId, RecordSummary};

/// Lifecycle notification pushed to viewers.
#[derive(Debug, Clone)]
pub enum InspectorEvent {
    RequestBegin(RecordSummary),
    RequestEnd(Arc<Record>),
}

impl InspectorEvent {
    pub fn id(&self) -> RecordId {
        match self {
            InspectorEvent::RequestBegin(summary) => summary.id,
            InspectorEvent::RequestEnd(record) => record.id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InspectorEvent::RequestBegin(_) => "RequestBegin",
            InspectorEvent::RequestEnd(_) => "RequestEnd",
        }
    }

    /// Transport payload. Both events carry a summary; viewers fetch details
    /// and bodies on demand.
    pub fn payload(&self) -> EventPayload {
        let summary = match self {
            InspectorEvent::RequestBegin(summary) => summary.clone(),
            InspectorEvent::RequestEnd(record) => record.summary(),
        };
        EventPayload {
            event: self.name(),
            data: summary,
        }
    }
}

/// Serialized form of an [`InspectorEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    pub event: &'static str,
    pub data: RecordSummary,
}

pub type SubscriberId = u64;

#[derive(Debug)]
struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<InspectorEvent>,
}

#[derive(Debug)]
struct Shared {
    subscribers: ArcSwap<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
    buffer: usize,
    dropped: AtomicU64,
}

impl Shared {
    fn remove(&self, id: SubscriberId) -> bool {
        let mut removed = false;
        self.subscribers.rcu(|current| {
            let next: Vec<_> = current.iter().filter(|s| s.id != id).cloned().collect();
            removed = next.len() != current.len();
            next
        });
        if removed {
            let count = self.subscribers.load().len();
            metrics::record_subscribers(count);
            tracing::debug!(subscriber = id, subscribers = count, "Subscriber removed");
        }
        removed
    }
}

/// Best-effort broadcaster of begin/end events.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    shared: Arc<Shared>,
}

impl EventBroadcaster {
    /// `buffer` bounds the number of undelivered events per subscriber.
    pub fn new(buffer: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: ArcSwap::from_pointee(Vec::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.shared.buffer);
        let subscriber = Arc::new(Subscriber { id, tx });
        self.shared.subscribers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(subscriber.clone());
            next
        });
        let count = self.subscriber_count();
        metrics::record_subscribers(count);
        tracing::debug!(subscriber = id, subscribers = count, "Subscriber added");
        Subscription {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Returns `false` if the subscriber was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.shared.remove(id)
    }

    pub fn emit_begin(&self, summary: RecordSummary) {
        self.emit(InspectorEvent::RequestBegin(summary));
    }

    pub fn emit_end(&self, record: Arc<Record>) {
        self.emit(InspectorEvent::RequestEnd(record));
    }

    fn emit(&self, event: InspectorEvent) {
        let snapshot = self.shared.subscribers.load();
        let mut closed = Vec::new();
        for subscriber in snapshot.iter() {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::record_event_dropped(event.name());
                    tracing::debug!(
                        subscriber = subscriber.id,
                        event = event.name(),
                        id = %event.id(),
                        "Subscriber queue full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
            }
        }
        drop(snapshot);
        for id in closed {
            self.shared.remove(id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.load().len()
    }

    /// Events dropped because a subscriber queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiving side of a subscription. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<InspectorEvent>,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<InspectorEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<InspectorEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.id);
        }
    }
}
