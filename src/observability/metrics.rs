//! Metrics collection and exposition.
//!
//! # Metrics
//! - `inspector_records_total` (counter): sealed records by outcome
//! - `inspector_requests_excluded_total` (counter): requests skipped by the filter
//! - `inspector_records_evicted_total` (counter): records dropped by retention
//! - `inspector_records_retained` (gauge): records currently stored
//! - `inspector_store_errors_total` (counter): failed storage operations
//! - `inspector_events_dropped_total` (counter): events lost to full subscriber queues
//! - `inspector_subscribers` (gauge): connected live viewers
//! - `inspector_sessions_in_flight` (gauge): open capture sessions
//! - `inspector_request_duration_seconds` (histogram): receipt to last byte
//!
//! Updates are no-ops until a recorder is installed with [`init_metrics`].

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

fn describe() {
    describe_counter!("inspector_records_total", "Sealed records by outcome");
    describe_counter!(
        "inspector_requests_excluded_total",
        "Requests skipped by the exclusion filter"
    );
    describe_counter!(
        "inspector_records_evicted_total",
        "Records evicted by the retention policy"
    );
    describe_gauge!("inspector_records_retained", "Records currently retained");
    describe_counter!("inspector_store_errors_total", "Failed storage operations");
    describe_counter!(
        "inspector_events_dropped_total",
        "Live events dropped for slow subscribers"
    );
    describe_gauge!("inspector_subscribers", "Connected live subscribers");
    describe_gauge!("inspector_sessions_in_flight", "Open capture sessions");
    describe_histogram!(
        "inspector_request_duration_seconds",
        "Time from request receipt to last response byte"
    );
}

pub fn record_captured(outcome: &'static str) {
    counter!("inspector_records_total", "outcome" => outcome).increment(1);
}

pub fn record_excluded() {
    counter!("inspector_requests_excluded_total").increment(1);
}

pub fn record_evicted(count: usize) {
    counter!("inspector_records_evicted_total").increment(count as u64);
}

pub fn record_retained(count: usize) {
    gauge!("inspector_records_retained").set(count as f64);
}

pub fn record_store_error(operation: &'static str) {
    counter!("inspector_store_errors_total", "operation" => operation).increment(1);
}

pub fn record_event_dropped(event: &'static str) {
    counter!("inspector_events_dropped_total", "event" => event).increment(1);
}

pub fn record_subscribers(count: usize) {
    gauge!("inspector_subscribers").set(count as f64);
}

pub fn record_sessions_in_flight(count: usize) {
    gauge!("inspector_sessions_in_flight").set(count as f64);
}

pub fn record_request_duration(duration: Duration) {
    histogram!("inspector_request_duration_seconds").record(duration.as_secs_f64());
}
