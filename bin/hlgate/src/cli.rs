use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hlgate")]
#[command(about = "WebSocket subscription gateway for an EVM JSON-RPC node", long_about = None)]
pub struct Cli {
    /// Path to the configuration file (TOML, YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Upstream JSON-RPC endpoint
    #[arg(long, env = "RPC_URL", value_name = "URL")]
    pub rpc_url: Option<String>,

    /// Listen address, e.g. 0.0.0.0:8080
    #[arg(long, env = "LISTEN_ADDRESS", value_name = "ADDR")]
    pub listen: Option<String>,

    /// Port to listen on; replaces the port of the listen address
    #[arg(short, long, env = "WS_PORT")]
    pub port: Option<u16>,

    /// Block poll interval in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// json, pretty or compact
    #[arg(long, value_name = "FORMAT")]
    pub log_format: Option<String>,
}
