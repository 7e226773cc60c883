//! Chat-completion interceptor and generic reverse proxy (C7)

mod chat;
mod forward;

use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use reqwest::Client;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::admission::AdmissionController;
use crate::backend_state::BackendState;
use crate::kv_cache::KvCacheClient;
use crate::metrics::Metrics;
use crate::template::TemplateWatcher;

/// Shared state for every proxy-listener handler.
pub struct AppState {
    /// Base URL of the backend being proxied.
    pub backend_url: String,
    /// Shared HTTP client used to forward every request to the backend.
    pub http_client: Client,
    /// Configured prefix -> template mapping, checked in this order for
    /// first-match-wins detection.
    pub prefix_order: Vec<String>,
    pub(crate) templates: Arc<TemplateWatcher>,
    pub(crate) backend_state: Arc<BackendState>,
    pub(crate) admission: Arc<AdmissionController>,
    pub(crate) kv_cache: Arc<KvCacheClient>,
    pub(crate) metrics: Arc<Metrics>,
    /// In-flight request tracker for graceful-shutdown drain: each handler
    /// holds one permit for its duration.
    pub(crate) inflight: Arc<tokio::sync::Semaphore>,
}

/// Build the proxy listener's router: the intercepted chat-completions path
/// plus a generic passthrough for everything else (including the KV-cache
/// endpoints themselves, when accessed directly rather than through C4).
///
/// `CompressionLayer` is deliberately not applied here: it would buffer the
/// streamed chat-completion body and defeat the streaming invariant.
#[must_use]
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .fallback(forward::generic_proxy)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
