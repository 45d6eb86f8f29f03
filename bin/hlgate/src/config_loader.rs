use anyhow::{Context, Result};
use hlgate_gateway::GatewayConfig;
use std::net::SocketAddr;

use crate::cli::Cli;

/// Config file and `HLGATE__*` environment, then command-line overrides
pub fn load_gateway_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, cli)?;
    Ok(config)
}

pub fn apply_overrides(config: &mut GatewayConfig, cli: &Cli) -> Result<()> {
    if let Some(url) = &cli.rpc_url {
        config.upstream.url = url.clone();
    }
    if let Some(listen) = &cli.listen {
        config.server.listen_address = listen.clone();
    }
    if let Some(port) = cli.port {
        let mut addr: SocketAddr = config
            .server
            .listen_address
            .parse()
            .with_context(|| format!("Invalid listen address: {}", config.server.listen_address))?;
        addr.set_port(port);
        config.server.listen_address = addr.to_string();
    }
    if let Some(interval) = cli.poll_interval_ms {
        config.poller.poll_interval_ms = interval;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    Ok(())
}
