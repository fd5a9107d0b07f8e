//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use http_inspector::http::with_failure;
use http_inspector::record::{CapturedFailure, RecordSummary};
use http_inspector::recorder::SessionRegistry;
use http_inspector::storage::{RecordStorage, StorageFactory};
use http_inspector::{HttpServer, InspectorConfig, Recorder, RecorderBuilder, Shutdown};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// A running server with recording enabled.
pub struct TestServer {
    pub addr: SocketAddr,
    pub recorder: Recorder,
    pub shutdown: Shutdown,
    pub client: reqwest::Client,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn inspector_url(&self, path: &str) -> String {
        self.url(&format!("/_inspector{path}"))
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/_inspector/ws", self.addr)
    }

    /// Summaries via the inspector API.
    pub async fn list(&self) -> Vec<RecordSummary> {
        self.client
            .get(self.inspector_url("/api/records"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Wait until the store holds at least `count` records.
    pub async fn wait_for_records(&self, count: usize) -> Vec<RecordSummary> {
        let recorder = self.recorder.clone();
        wait_until(|| {
            let recorder = recorder.clone();
            async move { recorder.storage().len().await.unwrap() >= count }
        })
        .await;
        self.list().await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a server on an ephemeral port.
pub async fn start_server(configure: impl FnOnce(&mut InspectorConfig)) -> TestServer {
    start_server_with_sessions(configure, SessionRegistry::new()).await
}

/// Start a server whose recorder shares `sessions`, e.g. with a logging layer.
pub async fn start_server_with_sessions(
    configure: impl FnOnce(&mut InspectorConfig),
    sessions: SessionRegistry,
) -> TestServer {
    start_server_with(configure, |builder| builder.sessions(sessions)).await
}

/// Start a server recording into a host-supplied store.
pub async fn start_server_with_storage(
    configure: impl FnOnce(&mut InspectorConfig),
    storage: Arc<dyn RecordStorage>,
) -> TestServer {
    start_server_with(configure, |builder| builder.storage(StorageFactory::Custom(storage))).await
}

async fn start_server_with(
    configure: impl FnOnce(&mut InspectorConfig),
    customize: impl FnOnce(RecorderBuilder) -> RecorderBuilder,
) -> TestServer {
    let mut config = InspectorConfig::default();
    configure(&mut config);

    let recorder = customize(RecorderBuilder::from_config(&config))
        .build()
        .await
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(host_app(), recorder.clone(), &config);
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    TestServer {
        addr,
        recorder,
        shutdown,
        client: reqwest::Client::new(),
    }
}

/// Poll `check` for up to two seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[derive(Debug, thiserror::Error)]
#[error("attempted to divide by zero")]
pub struct DivideByZeroError;

fn host_app() -> Router {
    Router::new()
        .route("/hello", get(|| async { "hello" }))
        .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
        .route("/echo", post(|body: Bytes| async move { body }))
        .route("/assets/app.js", get(|| async { "console.log('hi')" }))
        .route("/items/{name}", get(item))
        .route("/divide/{a}/{b}", get(divide))
        .route("/panic", get(explode))
        .route("/stream", get(stream))
}

async fn item(Path(name): Path<String>) -> String {
    tracing::info!(item = %name, "Looking up item");
    tracing::debug!("Cache miss");
    format!("item {name}")
}

async fn divide(Path((a, b)): Path<(u32, u32)>) -> Response {
    match a.checked_div(b).ok_or(DivideByZeroError) {
        Ok(q) => q.to_string().into_response(),
        Err(e) => with_failure(
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
            CapturedFailure::from_error(&e),
        ),
    }
}

async fn explode() -> &'static str {
    panic!("handler exploded");
}

async fn stream() -> axum::body::Body {
    let chunks = (0..4).map(|i| Ok::<_, std::io::Error>(Bytes::from(format!("chunk-{i};"))));
    axum::body::Body::from_stream(futures_util::stream::iter(chunks))
}
