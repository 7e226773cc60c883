//! Warmup scheduler (C6)
//!
//! A cancellable background loop that periodically asks the template
//! watcher which templates changed and re-warms each one's slot-0 snapshot,
//! serialized against user traffic through the admission controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::backend_state::BackendState;
use crate::kv_cache::{filename_for_prefix, KvCacheClient};
use crate::metrics::Metrics;
use crate::template::TemplateWatcher;

/// Drives periodic re-warming of changed templates.
pub struct WarmupScheduler {
    interval: Duration,
    backend_url: String,
    http_client: reqwest::Client,
    templates: Arc<TemplateWatcher>,
    backend_state: Arc<BackendState>,
    admission: Arc<AdmissionController>,
    kv_cache: Arc<KvCacheClient>,
    metrics: Arc<Metrics>,
    lifecycle: parking_lot::Mutex<Option<WarmupLifecycle>>,
}

struct WarmupLifecycle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl WarmupScheduler {
    /// Build a scheduler. The HTTP client used for warmup completion
    /// requests is independent of [`KvCacheClient`]'s, with the same
    /// generous fixed timeout (warmup is not latency-sensitive the way
    /// user traffic is).
    #[must_use]
    pub fn new(
        interval: Duration,
        backend_url: impl Into<String>,
        templates: Arc<TemplateWatcher>,
        backend_state: Arc<BackendState>,
        admission: Arc<AdmissionController>,
        kv_cache: Arc<KvCacheClient>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .expect("static reqwest client configuration must build");

        Self {
            interval,
            backend_url: backend_url.into(),
            http_client,
            templates,
            backend_state,
            admission,
            kv_cache,
            metrics,
            lifecycle: parking_lot::Mutex::new(None),
        }
    }

    /// Start the background worker: one immediate check, then one check
    /// every `interval` until [`Self::stop`] is called.
    pub fn start(self: &Arc<Self>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let join = Arc::clone(self).spawn(shutdown_rx);
        *self.lifecycle.lock() = Some(WarmupLifecycle { shutdown_tx, join });
    }

    /// Stop the worker and wait for it to finish its current tick.
    /// Idempotent: a call with no worker running (never started, or already
    /// stopped) is a no-op.
    pub async fn stop(&self) {
        let lifecycle = self.lifecycle.lock().take();
        let Some(lifecycle) = lifecycle else {
            return;
        };

        let _ = lifecycle.shutdown_tx.send(());
        if let Err(e) = lifecycle.join.await {
            warn!(error = %e, "warmup scheduler task panicked");
        }
    }

    /// Spawn the worker task: one immediate check, then one check every
    /// `interval` until `shutdown_rx` fires.
    fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_once().await;

            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("warmup scheduler stopping");
                        break;
                    }
                }
            }
        })
    }

    async fn run_once(&self) {
        self.metrics.record_warmup_check();
        for prefix in self.templates.check_for_changes() {
            self.warmup(&prefix).await;
        }
    }

    /// Run one warmup attempt for `prefix`, following the ten-step
    /// procedure: admit, reconcile cache, expand, issue a cancellable
    /// minimal completion, then release admission on every exit path.
    async fn warmup(&self, prefix: &str) {
        let cancel = CancellationToken::new();
        if !self.admission.acquire_warmup(prefix, cancel.clone()) {
            debug!(prefix, "warmup skipped, slot 0 busy; retrying next tick");
            return;
        }

        let started = Instant::now();
        self.reconcile_cache(prefix).await;

        let expanded = match self.templates.process(prefix, "") {
            Ok(text) => text,
            Err(e) => {
                warn!(prefix, error = %e, "warmup template expansion failed");
                self.metrics.record_warmup_error(prefix, "template_error");
                self.admission.release_warmup();
                return;
            }
        };

        let body = serde_json::json!({
            "messages": [{"role": "user", "content": expanded}],
            "max_tokens": 1,
            "stream": false,
        });
        let request = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.backend_url))
            .json(&body)
            .send();

        tokio::select! {
            () = cancel.cancelled() => {
                debug!(prefix, "warmup cancelled by a pre-empting user request");
                self.metrics.record_warmup_cancellation(prefix);
            }
            result = request => {
                self.handle_completion_result(prefix, started, result);
            }
        }

        self.admission.release_warmup();
    }

    async fn reconcile_cache(&self, prefix: &str) {
        if self.backend_state.should_save(prefix) {
            let outgoing = self.backend_state.last_prefix();
            let filename = filename_for_prefix(&outgoing);
            if let Err(e) = self.kv_cache.save(&outgoing, &filename).await {
                warn!(prefix = %outgoing, error = %e, "warmup: kv-cache save failed, continuing");
                self.metrics.record_warmup_error(&outgoing, "save_failed");
            } else {
                self.metrics.record_kv_cache_save(&outgoing);
            }
        }

        if self.backend_state.should_restore(prefix) {
            let filename = filename_for_prefix(prefix);
            match self.kv_cache.restore(prefix, &filename).await {
                Ok(outcome) => self
                    .metrics
                    .record_kv_cache_restore(prefix, outcome.as_label()),
                Err(e) => {
                    warn!(prefix, error = %e, "warmup: kv-cache restore failed, continuing");
                    self.metrics.record_kv_cache_restore(prefix, "error");
                }
            }
        }
    }

    fn handle_completion_result(
        &self,
        prefix: &str,
        started: Instant,
        result: std::result::Result<reqwest::Response, reqwest::Error>,
    ) {
        match result {
            Ok(response) if response.status().is_success() => {
                self.backend_state.update(prefix);
                self.templates.mark_warmed(prefix);
                self.metrics.record_warmup_execution(prefix);
                self.metrics
                    .record_warmup_duration(prefix, started.elapsed().as_secs_f64());
            }
            Ok(response) => {
                warn!(prefix, status = %response.status(), "warmup completion request failed");
                self.metrics.record_warmup_error(prefix, "completion_failed");
            }
            Err(e) => {
                warn!(prefix, error = %e, "warmup completion request failed");
                self.metrics.record_warmup_error(prefix, "completion_failed");
            }
        }
    }
}
