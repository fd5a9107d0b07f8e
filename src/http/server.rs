//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap the host application with the recording middleware
//! - Mount the inspector routes under their prefix
//! - Wire cross-cutting layers (tracing, timeout, panic to 500)
//! - Serve with graceful shutdown

use axum::{middleware::from_fn_with_state, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::schema::InspectorConfig;
use crate::http::inspector::inspector_router;
use crate::http::middleware::{record_requests, RecordingState};
use crate::lifecycle::Shutdown;
use crate::recorder::Recorder;

/// Host application plus recorder and inspector.
pub struct HttpServer {
    router: Router,
    recorder: Recorder,
}

impl HttpServer {
    pub fn new(app: Router, recorder: Recorder, config: &InspectorConfig) -> Self {
        let router = Self::build_router(app, &recorder, config);
        Self { router, recorder }
    }

    /// Build the full router.
    ///
    /// Layer order, outermost first: trace, panic-to-500, timeout, recording.
    /// Recording sits innermost so it sees the handler's own panic and the
    /// real response before anything rewrites it.
    #[allow(deprecated)]
    pub fn build_router(app: Router, recorder: &Recorder, config: &InspectorConfig) -> Router {
        let prefix = config.viewer.path_prefix.as_str();
        let mut router = app;

        if config.recorder.enabled {
            let state = RecordingState::new(recorder.clone(), prefix);
            router = router.layer(from_fn_with_state(state, record_requests));
        }
        if config.viewer.enabled {
            router = router.nest(prefix, inspector_router(recorder));
        }

        router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve until `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.signalled())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new().route("/hello", get(|| async { "hello" }))
    }

    async fn wait_for_records(recorder: &Recorder, count: usize) {
        for _ in 0..100 {
            if recorder.storage().len().await.unwrap() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_inspector_routes_are_not_recorded() {
        let recorder = Recorder::builder().build_in_memory();
        let router = HttpServer::build_router(app(), &recorder, &InspectorConfig::default());

        let response = router
            .clone()
            .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let _ = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        wait_for_records(&recorder, 1).await;

        let response = router
            .oneshot(
                Request::get("/_inspector/api/records")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let _ = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();

        let listed = recorder.query().list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "/hello");
    }

    #[tokio::test]
    async fn test_recording_can_be_disabled() {
        let recorder = Recorder::builder().build_in_memory();
        let mut config = InspectorConfig::default();
        config.recorder.enabled = false;
        let router = HttpServer::build_router(app(), &recorder, &config);

        let response = router
            .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let _ = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(recorder.storage().len().await.unwrap(), 0);
    }
}
