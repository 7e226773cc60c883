//! Admin/health surface (C8)
//!
//! A second listener, entirely separate from the proxy listener, exposing
//! health, metrics, and a manual cache-reset knob.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::backend_state::BackendState;
use crate::metrics::Metrics;
use crate::template::TemplateWatcher;

/// Shared state for the admin listener.
pub struct AdminState {
    start_time: DateTime<Utc>,
    metrics: Arc<Metrics>,
    templates: Arc<TemplateWatcher>,
    backend_state: Arc<BackendState>,
}

impl AdminState {
    /// Build admin state, capturing the current time as process start.
    #[must_use]
    pub fn new(
        metrics: Arc<Metrics>,
        templates: Arc<TemplateWatcher>,
        backend_state: Arc<BackendState>,
    ) -> Self {
        Self {
            start_time: Utc::now(),
            metrics,
            templates,
            backend_state,
        }
    }
}

/// Build the admin router: `GET /health`, `GET /metrics`, and
/// `POST /admin/reset`. Unlike the proxy listener, `CompressionLayer` is
/// safe to apply here — none of these responses are streamed.
#[must_use]
pub fn create_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/admin/reset", post(reset))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: i64,
    start_time: String,
}

async fn health(State(state): State<Arc<AdminState>>) -> Response {
    let uptime_seconds = (Utc::now() - state.start_time).num_seconds().max(0);
    Json(HealthResponse {
        status: "ok",
        uptime_seconds,
        start_time: state.start_time.to_rfc3339(),
    })
    .into_response()
}

async fn metrics(State(state): State<Arc<AdminState>>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// Manual reset of the backend-state belief. Offered because the proxy
/// cannot detect an externally restarted backend on its own; clears the
/// tracked resident prefix and re-flags every template for warmup.
async fn reset(State(state): State<Arc<AdminState>>) -> Response {
    state.backend_state.reset();
    state.templates.mark_all_needs_warmup();
    info!("backend-state tracker reset via /admin/reset");
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok_status() {
        let state = Arc::new(AdminState::new(
            Arc::new(Metrics::new()),
            Arc::new(TemplateWatcher::new()),
            Arc::new(BackendState::new()),
        ));
        let response = health(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reset_clears_backend_state() {
        let backend_state = Arc::new(BackendState::new());
        backend_state.update("@code");

        let state = Arc::new(AdminState::new(
            Arc::new(Metrics::new()),
            Arc::new(TemplateWatcher::new()),
            Arc::clone(&backend_state),
        ));
        let response = reset(State(state)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(backend_state.last_prefix(), "");
    }
}
