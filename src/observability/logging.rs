//! Structured logging.
//!
//! Two layers share one registry:
//! - fmt output to stderr, filtered by `RUST_LOG` or the configured log level
//! - trace capture into recorded requests, filtered by the configured capture level
//!
//! They are filtered independently so quiet console output does not starve
//! the inspector's per-request trace view.

use std::str::FromStr;
use tracing_subscriber::filter::{filter_fn, LevelFilter};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::schema::ObservabilityConfig;
use crate::observability::capture_layer::TraceCaptureLayer;
use crate::recorder::SessionRegistry;

/// Install the global subscriber.
pub fn init(config: &ObservabilityConfig, sessions: SessionRegistry) -> Result<(), TryInitError> {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "http_inspector={level},tower_http={level}",
            level = config.log_level
        )
        .into()
    });
    let capture_level = LevelFilter::from_str(&config.capture_level).unwrap_or(LevelFilter::DEBUG);
    // Spans always pass so the recorded_request span is seen at any capture level.
    let capture_filter = filter_fn(move |meta| meta.is_span() || *meta.level() <= capture_level);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(console_filter))
        .with(TraceCaptureLayer::new(sessions).with_filter(capture_filter))
        .try_init()
}
