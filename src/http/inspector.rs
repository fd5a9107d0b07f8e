//! Inspector endpoint: query API and live event push for viewers.
//!
//! # Routes (relative to the configured prefix)
//! ```text
//! GET    /api/records                      summaries, most recent first
//! DELETE /api/records                      drop every record
//! GET    /api/records/{id}                 detail without bodies
//! GET    /api/records/{id}/request-body    captured bytes
//! GET    /api/records/{id}/response-body   captured bytes
//! GET    /ws                               websocket, one JSON frame per event
//! ```
//!
//! Unknown, malformed and evicted ids all answer 404. Events are not replayed:
//! a viewer that (re)connects lists records first, then applies pushed events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use thiserror::Error;

use crate::broadcast::{EventBroadcaster, Subscription};
use crate::error::StorageError;
use crate::query::QueryService;
use crate::record::{RecordDetail, RecordId, RecordSummary};
use crate::recorder::Recorder;

#[derive(Debug, Clone)]
struct InspectorState {
    query: QueryService,
    broadcaster: EventBroadcaster,
}

/// Errors surfaced to viewers.
#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("record not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for InspectorError {
    fn into_response(self) -> Response {
        let status = match &self {
            InspectorError::NotFound => StatusCode::NOT_FOUND,
            InspectorError::Storage(e) => {
                tracing::warn!(error = %e, "Inspector query failed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Router for the inspector routes. Nest it under the configured prefix.
pub fn inspector_router(recorder: &Recorder) -> Router {
    let state = InspectorState {
        query: recorder.query(),
        broadcaster: recorder.broadcaster().clone(),
    };
    Router::new()
        .route("/api/records", get(list_records).delete(clear_records))
        .route("/api/records/{id}", get(get_record))
        .route("/api/records/{id}/request-body", get(get_request_body))
        .route("/api/records/{id}/response-body", get(get_response_body))
        .route("/ws", get(live_events))
        .with_state(state)
}

fn parse_id(raw: &str) -> Result<RecordId, InspectorError> {
    raw.parse().map_err(|_| InspectorError::NotFound)
}

async fn list_records(
    State(state): State<InspectorState>,
) -> Result<Json<Vec<RecordSummary>>, InspectorError> {
    Ok(Json(state.query.list().await?))
}

async fn clear_records(State(state): State<InspectorState>) -> Result<StatusCode, InspectorError> {
    state.query.clear().await?;
    tracing::info!("Inspector records cleared");
    Ok(StatusCode::NO_CONTENT)
}

async fn get_record(
    State(state): State<InspectorState>,
    Path(id): Path<String>,
) -> Result<Json<RecordDetail>, InspectorError> {
    let id = parse_id(&id)?;
    state
        .query
        .get_detail(&id)
        .await?
        .map(Json)
        .ok_or(InspectorError::NotFound)
}

async fn get_request_body(
    State(state): State<InspectorState>,
    Path(id): Path<String>,
) -> Result<Response, InspectorError> {
    let id = parse_id(&id)?;
    let body = state.query.get_request_body(&id).await?;
    body_response(body)
}

async fn get_response_body(
    State(state): State<InspectorState>,
    Path(id): Path<String>,
) -> Result<Response, InspectorError> {
    let id = parse_id(&id)?;
    let body = state.query.get_response_body(&id).await?;
    body_response(body)
}

fn body_response(body: Option<Bytes>) -> Result<Response, InspectorError> {
    let body = body.ok_or(InspectorError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response())
}

async fn live_events(ws: WebSocketUpgrade, State(state): State<InspectorState>) -> Response {
    // Subscribe before the upgrade completes so no event falls in between.
    let subscription = state.broadcaster.subscribe();
    ws.on_upgrade(move |socket| push_events(socket, subscription))
}

async fn push_events(mut socket: WebSocket, mut subscription: Subscription) {
    tracing::debug!(subscriber = subscription.id(), "Viewer connected");
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let frame = match serde_json::to_string(&event.payload()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize inspector event");
                        continue;
                    }
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::debug!(subscriber = subscription.id(), "Viewer disconnected");
}
