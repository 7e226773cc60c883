//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// bioproxy - KV-cache-aware reverse proxy for LLM chat-completion backends
#[derive(Parser, Debug)]
#[command(name = "bioproxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (JSON)
    #[arg(short, long, env = "BIOPROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Proxy listener port
    #[arg(short, long, env = "BIOPROXY_PORT")]
    pub port: Option<u16>,

    /// Proxy listener host
    #[arg(long, env = "BIOPROXY_HOST")]
    pub host: Option<String>,

    /// Admin/health listener host
    #[arg(long, env = "BIOPROXY_ADMIN_HOST")]
    pub admin_host: Option<String>,

    /// Admin/health listener port
    #[arg(long, env = "BIOPROXY_ADMIN_PORT")]
    pub admin_port: Option<u16>,

    /// Backend base URL (the LLM inference server)
    #[arg(long, env = "BIOPROXY_BACKEND")]
    pub backend: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "BIOPROXY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "BIOPROXY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
