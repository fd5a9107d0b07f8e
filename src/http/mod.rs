//! HTTP integration subsystem.
//!
//! # Data Flow
//! ```text
//! client
//!     → server.rs (axum router, cross-cutting layers)
//!     → middleware.rs (record_requests: capture session per request)
//!     → host application handlers
//!
//! viewer
//!     → inspector.rs (query API, websocket push of lifecycle events)
//! ```

pub mod inspector;
pub mod middleware;
pub mod server;

pub use inspector::{inspector_router, InspectorError};
pub use middleware::{record_requests, with_failure, RecordingState};
pub use server::HttpServer;
