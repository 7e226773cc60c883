//! bioproxy - KV-cache-aware reverse proxy for LLM chat-completion backends

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use bioproxy::{app::App, cli::Cli, config::Config, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.proxy_port = port;
            }
            if let Some(ref host) = cli.host {
                config.proxy_host = host.clone();
            }
            if let Some(ref admin_host) = cli.admin_host {
                config.admin_host = admin_host.clone();
            }
            if let Some(admin_port) = cli.admin_port {
                config.admin_port = admin_port;
            }
            if let Some(ref backend) = cli.backend {
                config.backend_url = backend.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        proxy_port = config.proxy_port,
        admin_port = config.admin_port,
        backend = %config.backend_url,
        prefixes = config.prefixes.len(),
        "Starting bioproxy"
    );

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize bioproxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = app.run().await {
        error!("bioproxy error: {e}");
        return ExitCode::FAILURE;
    }

    info!("bioproxy shutdown complete");
    ExitCode::SUCCESS
}
