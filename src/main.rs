//! http-inspector demo binary.
//!
//! Serves a small host application with request recording enabled and the
//! inspector mounted under `viewer.path_prefix`.

use axum::{
    body::Bytes,
    extract::Path,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use http_inspector::config::loader::load_config;
use http_inspector::config::watcher::ConfigWatcher;
use http_inspector::http::with_failure;
use http_inspector::lifecycle::signals::spawn_signal_handler;
use http_inspector::observability::{logging, metrics};
use http_inspector::record::CapturedFailure;
use http_inspector::recorder::{SessionReaper, SessionRegistry};
use http_inspector::{HttpServer, InspectorConfig, RecorderBuilder, RecorderSettings, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "http-inspector", version, about = "Demo server with request recording and a live inspector")]
struct Cli {
    /// TOML configuration file. Watched for changes to recorder settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => InspectorConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    let sessions = SessionRegistry::new();
    logging::init(&config.observability, sessions.clone())?;

    tracing::info!("http-inspector v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        storage = ?config.storage.backend,
        retention_max_requests = config.recorder.retention_max_requests,
        inspector_prefix = %config.viewer.path_prefix,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let recorder = RecorderBuilder::from_config(&config)
        .sessions(sessions)
        .build()
        .await?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    tokio::spawn(SessionReaper::new(recorder.clone()).run(shutdown.subscribe()));

    // The watcher stops when its handle is dropped, so it lives until main returns.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => {
                    let recorder = recorder.clone();
                    let mut stop = shutdown.subscribe();
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                update = updates.recv() => {
                                    let Some(update) = update else { break };
                                    recorder.apply_settings(RecorderSettings::from_config(&update.recorder));
                                }
                                _ = stop.recv() => break,
                            }
                        }
                    });
                    Some(handle)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        inspector = %format!("{}/api/records", config.viewer.path_prefix),
        "Listening for connections"
    );

    HttpServer::new(demo_app(), recorder, &config)
        .run(listener, shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_app() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/hello/{name}", get(hello))
        .route("/echo", post(echo))
        .route("/divide/{a}/{b}", get(divide))
        .route("/slow", get(slow))
        .route("/panic", get(explode))
}

async fn index() -> &'static str {
    "http-inspector demo: try /hello/you, POST /echo, /divide/6/0, /slow, /panic"
}

async fn hello(Path(name): Path<String>) -> String {
    tracing::info!(name = %name, "Greeting visitor");
    format!("hello, {name}")
}

async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    tracing::debug!(bytes = body.len(), "Echoing body");
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

#[derive(Debug, thiserror::Error)]
#[error("attempted to divide {0} by zero")]
struct DivideByZeroError(i64);

async fn divide(Path((a, b)): Path<(i64, i64)>) -> Response {
    let result = a.checked_div(b).ok_or(DivideByZeroError(a));
    match result {
        Ok(quotient) => {
            tracing::info!(a, b, quotient, "Divided");
            quotient.to_string().into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Division failed");
            with_failure(
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
                CapturedFailure::from_error(&e),
            )
        }
    }
}

async fn slow() -> &'static str {
    for step in 1..=3 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        tracing::debug!(step, "Still working");
    }
    "done"
}

async fn explode() -> &'static str {
    tracing::warn!("About to panic");
    panic!("demo handler panicked");
}
