//! Chat-completion interceptor
//!
//! Prefix detection, template injection, cache reconciliation, and streamed
//! forwarding for `POST /v1/chat/completions`.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::{info, warn};

use crate::admission::AdmissionController;
use crate::error::{Error, Result};
use crate::kv_cache::filename_for_prefix;

use super::AppState;

/// Releases the admission controller's user-query slot on drop, so the
/// release fires on every exit path (success, early `?`, or panic) rather
/// than only on the happy path.
struct UserSlotGuard<'a> {
    admission: &'a AdmissionController,
}

impl Drop for UserSlotGuard<'_> {
    fn drop(&mut self) {
        self.admission.release_user();
    }
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    match handle(&state, &uri, &headers, body, request_id).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

#[tracing::instrument(skip(state, headers, body), fields(%request_id))]
async fn handle(
    state: &Arc<AppState>,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
    request_id: uuid::Uuid,
) -> Result<Response> {
    let _inflight_permit = state.inflight.acquire().await;

    // Step 1: cancel any concurrent warmup before touching the backend.
    state.admission.acquire_user();
    let _guard = UserSlotGuard {
        admission: &state.admission,
    };

    // Step 2: fully buffer and parse; unknown fields must round-trip.
    let mut payload: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::RequestMalformed(format!("invalid JSON body: {e}")))?;

    let messages = payload
        .get_mut("messages")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| Error::RequestMalformed("`messages` missing or not an array".into()))?;

    // Step 3: last message with role "user" is the candidate.
    let candidate_idx = messages
        .iter()
        .enumerate()
        .rev()
        .find(|(_, m)| m.get("role").and_then(Value::as_str) == Some("user"))
        .map(|(i, _)| i);

    let prefix = match candidate_idx {
        Some(idx) => {
            let content = messages[idx]
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::RequestMalformed("last user message content is not a string".into())
                })?
                .to_string();

            // Step 4: first-match-wins prefix detection.
            let matched = state
                .prefix_order
                .iter()
                .find(|p| content.starts_with(format!("{p} ").as_str()))
                .cloned();

            if let Some(prefix) = matched {
                let stripped_len = prefix.len() + 1;
                let user_message = &content[stripped_len..];

                // Step 5: template expansion.
                let expanded = state
                    .templates
                    .process(&prefix, user_message)
                    .map_err(|e| Error::TemplateProcessError(e.to_string()))?;
                messages[idx]["content"] = Value::String(expanded);
                prefix
            } else {
                String::new()
            }
        }
        None => String::new(),
    };

    // Step 6: cache reconciliation against the backend.
    reconcile_cache(state, &prefix).await;

    // Step 7: forward, preserving method/headers/query, re-serializing body.
    let forwarded_body = serde_json::to_vec(&payload)?;
    info!(request_id = %request_id, prefix = %prefix, bytes = forwarded_body.len(), "forwarding chat completion");

    let url = format!(
        "{}{}",
        state.backend_url,
        uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/v1/chat/completions")
    );

    let mut request = state.http_client.post(url);
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST || name == axum::http::header::CONTENT_LENGTH {
            continue;
        }
        request = request.header(name.clone(), value.clone());
    }
    request = request
        .header(axum::http::header::CONTENT_LENGTH, forwarded_body.len().to_string())
        .body(forwarded_body);

    let response = request
        .send()
        .await
        .map_err(|e| Error::BackendUnreachable(e.to_string()))?;

    // Step 8: update state once the backend has accepted the request,
    // before the response body has finished streaming.
    let status = response.status();
    state.backend_state.update(&prefix);
    state.metrics.record_request("/v1/chat/completions", status.as_u16());

    // Step 9: stream the response verbatim. The response-modification hook
    // above only inspected `status`; the body is never read here, only
    // handed to a stream so each backend chunk reaches the client as its
    // own write (preserving SSE incremental delivery).
    Ok(stream_response(response))
}

async fn reconcile_cache(state: &Arc<AppState>, prefix: &str) {
    // should_save and should_restore are independent: switching between two
    // distinct non-empty templates requires both, so these must not be
    // `else if`'d together.
    if state.backend_state.should_save(prefix) {
        let outgoing = state.backend_state.last_prefix();
        let filename = filename_for_prefix(&outgoing);
        if let Err(e) = state.kv_cache.save(&outgoing, &filename).await {
            warn!(prefix = %outgoing, error = %e, "cache save failed, proceeding");
        } else {
            state.metrics.record_kv_cache_save(&outgoing);
        }
    }

    if state.backend_state.should_restore(prefix) {
        let filename = filename_for_prefix(prefix);
        match state.kv_cache.restore(prefix, &filename).await {
            Ok(outcome) => state
                .metrics
                .record_kv_cache_restore(prefix, outcome.as_label()),
            Err(e) => {
                warn!(prefix, error = %e, "cache restore failed, proceeding");
                state.metrics.record_kv_cache_restore(prefix, "error");
            }
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
