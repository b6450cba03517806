use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::channels::whatsapp::{decode_webhook, SeenMessages, WebhookMessage};
use crate::flows::dispatch::Dispatcher;

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    pub dispatcher: Arc<Dispatcher>,
    pub verify_token: Arc<str>,
    pub seen: Arc<Mutex<SeenMessages>>,
}

impl WebhookState {
    pub fn new(dispatcher: Arc<Dispatcher>, verify_token: &str) -> Self {
        Self {
            dispatcher,
            verify_token: Arc::from(verify_token),
            seen: Arc::new(Mutex::new(SeenMessages::new())),
        }
    }
}

/// Request limits applied to every route.
#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: 64 * 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub fn build_router(state: WebhookState, limits: ServerLimits) -> Router {
    Router::new()
        .route("/webhook", get(handle_verify).post(handle_webhook))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .fallback(handle_fallback)
        .layer(RequestBodyLimitLayer::new(limits.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            limits.request_timeout,
        ))
        .with_state(state)
}

// ── Response helpers ─────────────────────────────────────────────

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok_json(value: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

fn err_json(status: StatusCode, message: &str) -> ApiResponse {
    (status, Json(serde_json::json!({ "error": message })))
}

async fn handle_fallback() -> ApiResponse {
    err_json(StatusCode::NOT_FOUND, "Unknown endpoint")
}

// ── Subscribe handshake ─────────────────────────────────────────

#[derive(Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn handle_verify(
    State(state): State<WebhookState>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let token_ok = !state.verify_token.is_empty()
        && query.verify_token.as_deref() == Some(&*state.verify_token);
    match (query.mode.as_deref(), query.challenge) {
        (Some("subscribe"), Some(challenge)) if token_ok => {
            tracing::info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            tracing::warn!("webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

// ── Inbound messages ────────────────────────────────────────────

async fn handle_webhook(State(state): State<WebhookState>, body: Bytes) -> ApiResponse {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("webhook body is not JSON: {e}");
            return err_json(StatusCode::BAD_REQUEST, "Invalid JSON body");
        }
    };

    let messages = decode_webhook(&payload);
    if messages.is_empty() {
        return ok_json(serde_json::json!({ "status": "ok", "dispatched": 0 }));
    }

    // Detached: a timed-out or dropped request must not cut a dispatch short.
    let dispatched = match tokio::spawn(dispatch_batch(state, messages)).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("webhook dispatch task failed: {e}");
            0
        }
    };
    ok_json(serde_json::json!({ "status": "ok", "dispatched": dispatched }))
}

/// Dispatch decoded messages in payload order. Returns how many succeeded.
///
/// An id is marked seen only here, right before its dispatch starts.
async fn dispatch_batch(state: WebhookState, messages: Vec<WebhookMessage>) -> usize {
    let mut dispatched = 0usize;
    for msg in messages {
        if !msg.id.is_empty() {
            let fresh = state
                .seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(&msg.id);
            if !fresh {
                tracing::debug!("duplicate webhook message {}, skipping", msg.id);
                continue;
            }
        }
        // Failures are logged, never surfaced: a non-200 makes the platform redeliver.
        match state.dispatcher.dispatch(&msg.from, &msg.message).await {
            Ok(_) => dispatched += 1,
            Err(e) => tracing::error!("dispatch of message {} failed: {e:#}", msg.id),
        }
    }
    dispatched
}

// ── Health & metrics ────────────────────────────────────────────

async fn handle_health(State(state): State<WebhookState>) -> ApiResponse {
    let catalog = state.dispatcher.catalog();
    ok_json(serde_json::json!({
        "status": "ok",
        "gateway": state.dispatcher.gateway().name(),
        "networks": catalog.networks().len(),
        "airtime_options": catalog.airtime_options().len(),
    }))
}

async fn handle_metrics(State(state): State<WebhookState>) -> Response {
    match state.dispatcher.metrics().render() {
        Ok(text) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(text))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            tracing::error!("failed to render metrics: {e:#}");
            err_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to render metrics").into_response()
        }
    }
}
