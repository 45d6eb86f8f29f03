mod cli;
mod config_loader;

use anyhow::Context;
use clap::Parser;
use hlgate_common::utils::logging::init_logging;
use hlgate_gateway::Gateway;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse CLI
    let args = cli::Cli::parse();

    // 2. Load Config
    let config = config_loader::load_gateway_config(&args)?;

    // 3. Setup Logging
    let _log_guard = init_logging(&config.logging)?;
    if let Some(path) = &args.config {
        info!("Loaded config from {:?}", path);
    }
    config.validate()?;

    // 4. Bind
    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // 5. Serve until a signal arrives
    let gateway = Gateway::new(config)?;
    gateway.serve(listener, shutdown_signal()).await
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
