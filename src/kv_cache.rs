//! KV-cache client (C4)
//!
//! Thin wrapper over the backend's per-slot save/restore endpoints. Never
//! retries: retry policy belongs to the caller (the warmup scheduler and
//! the chat interceptor both already treat these failures as non-fatal).

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::{Error, Result};

const WARMUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of a restore attempt, also used as the `/metrics` status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The snapshot was found and restored.
    Success,
    /// Nothing has ever been saved for this prefix (expected on first use).
    NotFound,
}

impl RestoreOutcome {
    /// Label used in the `bioproxy_kv_cache_restores_total` metric.
    #[must_use]
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
        }
    }
}

/// Client for the backend's `POST /slots/0?action=save|restore` endpoints.
pub struct KvCacheClient {
    client: Client,
    backend_url: String,
}

impl KvCacheClient {
    /// Build a client targeting `backend_url`, with a single shared
    /// connection pool and no retry behavior baked in.
    ///
    /// # Panics
    ///
    /// Panics if the underlying TLS/connector configuration is invalid,
    /// which would indicate a build-time misconfiguration rather than a
    /// runtime condition.
    #[must_use]
    pub fn new(backend_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(WARMUP_TIMEOUT)
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .expect("static reqwest client configuration must build");

        Self {
            client,
            backend_url: backend_url.into(),
        }
    }

    /// Restore the snapshot named `filename` into slot 0.
    ///
    /// Returns `Ok(RestoreOutcome::NotFound)` on a 404 — expected on the
    /// first warmup of a prefix, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendStatusError`] on any other non-2xx, or
    /// [`Error::BackendUnreachable`] on a network/transport failure.
    pub async fn restore(&self, prefix: &str, filename: &str) -> Result<RestoreOutcome> {
        let response = self
            .slot_action("restore", filename)
            .await
            .map_err(|e| Error::BackendUnreachable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                debug!(prefix, filename, "kv-cache restore succeeded");
                Ok(RestoreOutcome::Success)
            }
            StatusCode::NOT_FOUND => Ok(RestoreOutcome::NotFound),
            status => Err(Error::BackendStatusError {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Save the current slot-0 contents as `filename`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendStatusError`] on any non-2xx response or
    /// [`Error::BackendUnreachable`] on a network/transport failure.
    pub async fn save(&self, prefix: &str, filename: &str) -> Result<()> {
        let response = self
            .slot_action("save", filename)
            .await
            .map_err(|e| Error::BackendUnreachable(e.to_string()))?;

        if response.status().is_success() {
            debug!(prefix, filename, "kv-cache save succeeded");
            Ok(())
        } else {
            Err(Error::BackendStatusError {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn slot_action(
        &self,
        action: &str,
        filename: &str,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(format!("{}/slots/0?action={action}", self.backend_url))
            .json(&serde_json::json!({ "filename": filename }))
            .send()
            .await
    }
}

/// Derive the KV-cache filename from a prefix by stripping its sentinel
/// character and appending `.bin` (e.g. `@code` -> `code.bin`).
#[must_use]
pub fn filename_for_prefix(prefix: &str) -> String {
    let stripped = prefix.strip_prefix(|c: char| !c.is_alphanumeric()).unwrap_or(prefix);
    format!("{stripped}.bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filename_strips_leading_sentinel() {
        assert_eq!(filename_for_prefix("@code"), "code.bin");
        assert_eq!(filename_for_prefix("@debug"), "debug.bin");
    }

    #[test]
    fn filename_with_no_sentinel_is_used_as_is() {
        assert_eq!(filename_for_prefix("code"), "code.bin");
    }

    #[test]
    fn restore_outcome_labels_match_metric_vocabulary() {
        assert_eq!(RestoreOutcome::Success.as_label(), "success");
        assert_eq!(RestoreOutcome::NotFound.as_label(), "not_found");
    }

    #[tokio::test]
    async fn restore_reports_not_found_on_404() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/slots/0"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = KvCacheClient::new(server.uri());
        let outcome = client.restore("@code", "code.bin").await.unwrap();
        assert_eq!(outcome, RestoreOutcome::NotFound);
    }

    #[tokio::test]
    async fn restore_succeeds_on_200() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/slots/0"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = KvCacheClient::new(server.uri());
        let outcome = client.restore("@code", "code.bin").await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Success);
    }

    #[tokio::test]
    async fn save_errors_on_non_2xx() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/slots/0"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = KvCacheClient::new(server.uri());
        let err = client.save("@code", "code.bin").await.unwrap_err();
        assert!(matches!(err, Error::BackendStatusError { status: 500, .. }));
    }
}
