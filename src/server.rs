use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, RequestExt, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::slot::{ImageSlot, SlotError};
use crate::trigger::TriggerCoordinator;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub trigger: Arc<TriggerCoordinator>,
    pub slot: Arc<ImageSlot>,
    pub started_at: Instant,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState, max_upload_mb: u64) -> Router {
    Router::new()
        .route("/trigger", post(trigger_handler))
        .route("/poll", get(poll_handler))
        .route("/upload", post(upload_handler))
        .route("/images/latest", get(image_handler))
        .route("/api/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max((max_upload_mb * 1024 * 1024) as usize))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Serve the router on the given address. Blocks until the server exits.
pub async fn start_server(
    state: AppState,
    bind: &str,
    port: u16,
    max_upload_mb: u64,
) -> anyhow::Result<()> {
    let app = build_router(state, max_upload_mb);

    let addr = format!("{}:{}", bind, port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Request logging middleware
// ---------------------------------------------------------------------------

async fn log_requests(request: axum::extract::Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let response = next.run(request).await;
    info!(%method, %uri, status = %response.status(), "Handled request");
    response
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Viewer requests a capture. Never fails; repeated requests before the
/// device polls collapse into one pending capture.
async fn trigger_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let timestamp = state.trigger.fire().await;
    info!("Capture trigger fired");
    Json(json!({"success": true, "timestamp": timestamp}))
}

/// Device asks whether it should capture. Consumes the pending flag; the
/// returned timestamp is the most recent trigger regardless of consumption.
async fn poll_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let run = state.trigger.consume_if_pending().await;
    let snapshot = state.trigger.peek().await;
    Json(json!({"run": run, "lastTriggered": snapshot.last_triggered_at}))
}

/// Device submits the captured photo. Accepts the original multipart contract
/// (field `image`) and falls back to a raw body with a Content-Type header.
async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::extract::Request,
) -> Response {
    let extracted = match extract_image(headers, body).await {
        Ok(extracted) => extracted,
        Err(response) => return response,
    };
    let (bytes, content_type) = extracted;

    match state.slot.replace(bytes, content_type).await {
        Ok(timestamp) => {
            info!("Image stored");
            Json(json!({"success": true, "timestamp": timestamp})).into_response()
        }
        Err(e @ SlotError::EmptyPayload) => {
            warn!("Upload rejected: {}", e);
            error_response(StatusCode::BAD_REQUEST, &e)
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

/// Viewer fetches the latest photo, bytes and content type exactly as stored.
async fn image_handler(State(state): State<AppState>) -> Response {
    match state.slot.read().await {
        Ok(record) => (
            [(header::CONTENT_TYPE, record.content_type.clone())],
            record.bytes.clone(),
        )
            .into_response(),
        Err(e @ SlotError::NotFound) => error_response(StatusCode::NOT_FOUND, &e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

/// Diagnostic projection over the trigger and the slot. Read-only; mutates
/// neither.
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let trigger = state.trigger.peek().await;
    let stored_at = state.slot.stored_at().await;
    Json(json!({
        "trigger": {
            "pending": trigger.pending,
            "lastTriggered": trigger.last_triggered_at,
        },
        "image": {
            "present": stored_at.is_some(),
            "storedAt": stored_at,
        },
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Upload body extraction
// ---------------------------------------------------------------------------

/// Pull image bytes and content type out of the request: multipart `image`
/// field when the request is a form upload, raw body otherwise.
async fn extract_image(
    headers: HeaderMap,
    request: axum::extract::Request,
) -> Result<(Vec<u8>, String), Response> {
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| error_message(StatusCode::BAD_REQUEST, &e.to_string()))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| error_message(StatusCode::BAD_REQUEST, &e.to_string()))?
        {
            if field.name() != Some("image") {
                continue;
            }
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| error_message(StatusCode::BAD_REQUEST, &e.to_string()))?;
            return Ok((bytes.to_vec(), content_type));
        }

        warn!("Upload had no 'image' field");
        return Err(error_message(StatusCode::BAD_REQUEST, "no image uploaded"));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    // `with_limited_body` applies the DefaultBodyLimit layer's cap, which a
    // raw body read would otherwise bypass.
    let request = request.with_limited_body();
    let bytes: Bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| error_message(StatusCode::PAYLOAD_TOO_LARGE, &e.to_string()))?;
    Ok((bytes.to_vec(), content_type))
}

fn error_response(status: StatusCode, error: &SlotError) -> Response {
    error_message(status, &error.to_string())
}

fn error_message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"success": false, "error": message}))).into_response()
}
