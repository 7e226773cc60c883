//! Generic reverse-proxy fallback
//!
//! Every path other than the chat-completion interceptor — including the
//! KV-cache endpoints themselves when hit directly — is forwarded verbatim.
//! This does not pass through the admission gate; those endpoints are not
//! inference requests.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::AppState;

/// Forward `req` to the backend unchanged and stream the response back.
///
/// # Streaming invariant
///
/// This function inspects only the response's status and headers before
/// building the outgoing response. It never reads the response body — doing
/// so would force buffering and defeat streaming for server-sent events.
pub async fn generic_proxy(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let _inflight_permit = state.inflight.acquire().await;

    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let headers = req.headers().clone();
    let body = req.into_body();

    let url = format!("{}{}", state.backend_url, path_and_query);
    let mut builder = state.http_client.request(method, url);
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }
    let builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));

    match builder.send().await {
        Ok(response) => stream_response(response),
        Err(e) => {
            warn!(error = %e, "generic proxy: backend unreachable");
            (StatusCode::BAD_GATEWAY, "Backend server unavailable").into_response()
        }
    }
}

fn stream_response(response: reqwest::Response) -> Response {
    let status = response.status();
    let headers = response.headers().clone();

    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        builder = builder.header(name.clone(), value.clone());
    }

    let body = Body::from_stream(response.bytes_stream());
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

