//! Composition root
//!
//! Wires configuration into the shared singletons (C1-C6), builds both
//! listeners, and drives startup/shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::admin::{self, AdminState};
use crate::admission::AdmissionController;
use crate::backend_state::BackendState;
use crate::config::Config;
use crate::kv_cache::KvCacheClient;
use crate::metrics::Metrics;
use crate::proxy::{self, AppState};
use crate::template::TemplateWatcher;
use crate::warmup::WarmupScheduler;
use crate::{Error, Result};

/// Maximum number of concurrently in-flight proxy requests tracked for the
/// graceful-shutdown drain.
const INFLIGHT_PERMITS: usize = 10_000;

/// The running bioproxy process: owns both listeners and the background
/// warmup worker.
pub struct App {
    config: Config,
}

impl App {
    /// Build an app from a loaded configuration. Registers every configured
    /// prefix's template file; a missing template file is fatal at startup
    /// rather than discovered on first request.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured template file cannot be read.
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self { config })
    }

    /// Run the proxy and admin listeners until a shutdown signal arrives,
    /// then drain in-flight proxy requests before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if either listener fails to bind, or if a listener
    /// exits with an I/O error.
    pub async fn run(self) -> Result<()> {
        let config = self.config;

        // The warmup worker is stopped and joined (via `WarmupScheduler::stop`)
        // *before* the listeners are told to stop accepting connections, so
        // this only needs to fan out to the two listeners.
        let (listener_shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let metrics = Arc::new(Metrics::new());
        let backend_state = Arc::new(BackendState::new());
        let admission = Arc::new(AdmissionController::new());
        let kv_cache = Arc::new(KvCacheClient::new(config.backend_url.clone()));

        let templates = Arc::new(TemplateWatcher::new());
        let mut prefix_order: Vec<String> = config.prefixes.keys().cloned().collect();
        prefix_order.sort();
        for prefix in &prefix_order {
            let path = &config.prefixes[prefix];
            templates.add(prefix, path)?;
            info!(prefix = %prefix, path = %path, "registered prompt template");
        }

        let warmup = Arc::new(WarmupScheduler::new(
            config.warmup_check_interval(),
            config.backend_url.clone(),
            Arc::clone(&templates),
            Arc::clone(&backend_state),
            Arc::clone(&admission),
            Arc::clone(&kv_cache),
            Arc::clone(&metrics),
        ));
        warmup.start();

        let inflight = Arc::new(tokio::sync::Semaphore::new(INFLIGHT_PERMITS));
        let proxy_http_client = reqwest::Client::builder()
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Config(format!("failed to build proxy HTTP client: {e}")))?;

        let proxy_state = Arc::new(AppState {
            backend_url: config.backend_url.clone(),
            http_client: proxy_http_client,
            prefix_order,
            templates: Arc::clone(&templates),
            backend_state: Arc::clone(&backend_state),
            admission: Arc::clone(&admission),
            kv_cache: Arc::clone(&kv_cache),
            metrics: Arc::clone(&metrics),
            inflight: Arc::clone(&inflight),
        });
        let proxy_router = proxy::create_router(proxy_state);

        let admin_state = Arc::new(AdminState::new(
            Arc::clone(&metrics),
            Arc::clone(&templates),
            Arc::clone(&backend_state),
        ));
        let admin_router = admin::create_router(admin_state);

        let proxy_addr = SocketAddr::new(
            config
                .proxy_host
                .parse()
                .map_err(|e| Error::Config(format!("invalid proxy_host: {e}")))?,
            config.proxy_port,
        );
        let admin_addr = SocketAddr::new(
            config
                .admin_host
                .parse()
                .map_err(|e| Error::Config(format!("invalid admin_host: {e}")))?,
            config.admin_port,
        );

        let proxy_listener = TcpListener::bind(proxy_addr).await?;
        let admin_listener = TcpListener::bind(admin_addr).await?;

        info!("============================================================");
        info!("BIOPROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %config.proxy_host, port = config.proxy_port, "Proxy listener bound");
        info!(host = %config.admin_host, port = config.admin_port, "Admin listener bound");
        info!(backend = %config.backend_url, "Backend target");
        info!(
            templates = templates_len(&config),
            interval_secs = config.warmup_check_interval,
            "Warmup scheduler running"
        );
        info!("============================================================");

        let proxy_shutdown = listener_shutdown_tx.subscribe();
        let admin_shutdown = listener_shutdown_tx.subscribe();

        let proxy_serve = axum::serve(proxy_listener, proxy_router)
            .with_graceful_shutdown(wait_for_shutdown(proxy_shutdown));
        let admin_serve = axum::serve(admin_listener, admin_router)
            .with_graceful_shutdown(wait_for_shutdown(admin_shutdown));

        // Order: wait for the OS signal, stop and join the warmup worker,
        // only then tell the listeners to stop accepting connections. The
        // listeners themselves keep serving traffic the whole time this
        // runs, concurrently with `proxy_serve`/`admin_serve` below.
        let orchestrate_shutdown = async {
            wait_for_os_signal().await;
            info!("shutdown signal received");

            info!("Shutting down warmup scheduler...");
            warmup.stop().await;

            info!("Stopping listeners...");
            let _ = listener_shutdown_tx.send(());
        };

        let (proxy_result, admin_result, ()) =
            tokio::join!(proxy_serve, admin_serve, orchestrate_shutdown);
        proxy_result.map_err(|e| Error::Internal(e.to_string()))?;
        admin_result.map_err(|e| Error::Internal(e.to_string()))?;

        info!("Draining in-flight proxy requests...");
        let drain_timeout = std::time::Duration::from_secs(30);
        match tokio::time::timeout(drain_timeout, inflight.acquire_many(INFLIGHT_PERMITS as u32))
            .await
        {
            Ok(Ok(_permits)) => info!("All in-flight requests completed"),
            Ok(Err(_)) => warn!("inflight semaphore closed unexpectedly during drain"),
            Err(_) => {
                let remaining =
                    (INFLIGHT_PERMITS as u32).saturating_sub(inflight.available_permits() as u32);
                warn!(remaining_requests = remaining, "drain timeout reached, proceeding with shutdown");
            }
        }

        Ok(())
    }
}

fn templates_len(config: &Config) -> usize {
    config.prefixes.len()
}

async fn wait_for_shutdown(mut rx: tokio::sync::broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_os_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
