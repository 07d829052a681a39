//! Web server module.
//!
//! Serves the Prometheus exposition of the scraper's registry plus
//! liveness/readiness checks.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::metrics::{MetricSink, ScrapeOutcome};

/// Default exposition path.
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sink: MetricSink,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scrapes: Option<u64>,
}

/// Create the router with all routes.
///
/// `metrics_path` must start with `/`.
pub fn create_router(state: AppState, metrics_path: &str) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(app_state)
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.sink.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Liveness check.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        scrapes: None,
    })
}

/// Readiness check: ready once one cycle has succeeded.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    let succeeded = state.sink.scrape_count(ScrapeOutcome::Ok);

    if succeeded > 0 {
        Json(HealthResponse {
            status: "ok".to_string(),
            scrapes: Some(succeeded),
        })
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "no successful scrape yet".to_string(),
                scrapes: Some(0),
            }),
        )
            .into_response()
    }
}
