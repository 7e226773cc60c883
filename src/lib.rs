//! bioproxy
//!
//! A reverse proxy that sits in front of an OpenAI-compatible chat-completion
//! backend exposing a per-slot KV-cache save/restore API. It pre-warms the
//! backend's cache with fully-expanded prompt templates so that a matching
//! snapshot is already resident in slot 0 when a real user request with the
//! same prefix arrives, cutting first-token latency for stable system
//! prompts.
//!
//! # Components
//!
//! - [`admission`]: three-state mutual-exclusion gate over backend slot 0
//! - [`backend_state`]: tracks which template is currently resident
//! - [`template`]: non-recursive template expansion with change detection
//! - [`kv_cache`]: thin client for the backend's slot save/restore endpoints
//! - [`warmup`]: periodic background loop that keeps templates warm
//! - [`proxy`]: the chat-completion interceptor and generic reverse proxy
//! - [`admin`]: health and metrics surface on a separate listener
//! - [`app`]: composition root wiring the above into a running server

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod admission;
pub mod app;
pub mod backend_state;
pub mod cli;
pub mod config;
pub mod error;
pub mod kv_cache;
pub mod metrics;
pub mod proxy;
pub mod template;
pub mod warmup;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Set up the global `tracing` subscriber from a level filter and an
/// optional output format ("json" for structured logs, anything else for
/// human-readable text).
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
