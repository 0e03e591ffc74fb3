//! Webhook HTTP Ingress
//!
//! Thin axum layer over the engine. Its one non-negotiable job is handing
//! the engine the request body byte-exact: the signature covers the raw
//! bytes, so any re-parse or re-encode upstream would break verification.
//!
//! Status mapping drives the provider's retry logic:
//!
//! - `200` for processed deliveries, including intentional no-ops
//!   (stale, ignored); acknowledging them prevents pointless retries
//! - `202` for duplicates of an already-admitted event
//! - `400`/`401` for deliveries that can never succeed as sent
//! - `503` for infrastructure failures worth redelivering

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::metrics::global_metrics;
use crate::webhook::engine::{DeliveryOutcome, WebhookEngine};
use crate::webhook::error::{SignatureError, WebhookError};

/// Shared state for the ingress routes.
pub struct WebhookState {
    /// The processing engine
    pub engine: WebhookEngine,
}

impl WebhookState {
    /// Wrap an engine for serving.
    pub fn new(engine: WebhookEngine) -> Self {
        Self { engine }
    }
}

/// Acknowledgement body returned for processed deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    /// Always true when the delivery was accepted
    pub received: bool,
    /// How the delivery was classified
    pub outcome: String,
}

/// Error body returned for rejected deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRejection {
    /// What went wrong
    pub error: String,
}

/// Health check response for simple liveness probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status (always "healthy" if responding)
    pub status: String,
}

/// Build the ingress router.
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks/payments", post(webhook_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /webhooks/payments
pub async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let signature = match headers
        .get(state.engine.signature_header())
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value.to_string(),
        None => {
            global_metrics().record_rejection("missing_signature");
            return rejection(StatusCode::BAD_REQUEST, &WebhookError::MissingSignatureHeader);
        }
    };

    match state.engine.ingest(&body, &signature).await {
        Ok(outcome) => {
            global_metrics().record_delivery(outcome, started.elapsed());
            let status = if outcome.is_duplicate() {
                StatusCode::ACCEPTED
            } else {
                StatusCode::OK
            };
            (
                status,
                Json(WebhookAck {
                    received: true,
                    outcome: outcome.as_str().to_string(),
                }),
            )
                .into_response()
        }
        Err(err) => {
            global_metrics().record_rejection(err.category());
            if err.is_retryable() {
                warn!(error = %err, "webhook delivery failed, provider will retry");
            }
            rejection(status_for(&err), &err)
        }
    }
}

/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// GET /metrics
pub async fn metrics_handler() -> String {
    global_metrics().to_prometheus_format()
}

fn rejection(status: StatusCode, err: &WebhookError) -> Response {
    (
        status,
        Json(WebhookRejection {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// HTTP status for each failure class.
fn status_for(err: &WebhookError) -> StatusCode {
    match err {
        WebhookError::MissingSignatureHeader | WebhookError::EmptyBody => StatusCode::BAD_REQUEST,
        WebhookError::Signature(SignatureError::Malformed) => StatusCode::BAD_REQUEST,
        WebhookError::Signature(_) => StatusCode::UNAUTHORIZED,
        WebhookError::Decode(_) => StatusCode::BAD_REQUEST,
        WebhookError::Ledger(_)
        | WebhookError::Store(_)
        | WebhookError::TenantUnknown(_)
        | WebhookError::Timeout(_)
        | WebhookError::ContentionExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
