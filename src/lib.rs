//! In-process HTTP request recorder and live inspector.
//!
//! # Architecture Overview
//!
//! ```text
//!                ┌──────────────────────────────────────────────────────────────┐
//!   request ────▶│ http::middleware ──▶ recorder ──▶ capture::session           │
//!                │        │               │   ▲             │ seal              │
//!                │        ▼               │   │ trace lines ▼                   │
//!   response ◀───│   host handlers ───────┼───┘         storage (memory|file)   │
//!                │                        │ begin/end        │                  │
//!                │                        ▼                  ▼                  │
//!   viewer ◀─────│ http::inspector ◀── broadcast       query (list/detail/body) │
//!                └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cross-cutting: `config` (TOML, validation, hot reload), `observability`
//! (logging, per-request trace capture, metrics), `lifecycle` (signals, shutdown).

// Core
pub mod broadcast;
pub mod capture;
pub mod query;
pub mod record;
pub mod recorder;
pub mod storage;

// Integration
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

#[cfg(test)]
mod testing;

pub use config::schema::InspectorConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use recorder::{Recorder, RecorderBuilder, RecorderSettings};
