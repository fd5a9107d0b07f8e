//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → capture_layer.rs (events inside a recorded request → its trace buffer)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stderr log output
//!     → inspector viewers (trace lines of each record)
//!     → Prometheus scrape endpoint
//! ```

pub mod capture_layer;
pub mod logging;
pub mod metrics;

pub use capture_layer::{TraceCaptureLayer, RECORDED_REQUEST_SPAN};
