use hlgate_common::utils::config::load_config;
use hlgate_common::utils::logging::LoggingConfig;
use hlgate_common::{GatewayError, Result};
use hlgate_pubsub::PollerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `HLGATE__SERVER__LISTEN_ADDRESS`
pub const ENV_PREFIX: &str = "HLGATE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    /// Overall timeout for one upstream call
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// How long in-flight connections get to drain on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Largest inbound WebSocket message, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            shutdown_grace_secs: default_shutdown_grace(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// Per-connection limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_requests: usize,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_queue_capacity(),
            max_in_flight_requests: default_max_in_flight(),
            ping_interval_secs: default_ping_interval(),
            write_timeout_secs: default_write_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_sync_check_interval")]
    pub sync_check_interval_ms: u64,
    #[serde(default = "default_sync_check_timeout")]
    pub sync_check_timeout_ms: u64,
    #[serde(default = "default_sync_threshold")]
    pub sync_threshold_secs: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            sync_check_interval_ms: default_sync_check_interval(),
            sync_check_timeout_ms: default_sync_check_timeout(),
            sync_threshold_secs: default_sync_threshold(),
        }
    }
}

// Default values
fn default_upstream_url() -> String { "http://127.0.0.1:3001/evm".to_string() }
fn default_upstream_timeout() -> u64 { 30 }
fn default_listen_address() -> String { "0.0.0.0:8080".to_string() }
fn default_shutdown_grace() -> u64 { 10 }
fn default_max_message_size() -> usize { 1024 * 1024 }
fn default_queue_capacity() -> usize { 512 }
fn default_max_in_flight() -> usize { 64 }
fn default_ping_interval() -> u64 { 30 }
fn default_write_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 60 }
fn default_poll_interval() -> u64 { 100 }
fn default_sync_check_interval() -> u64 { 1000 }
fn default_sync_check_timeout() -> u64 { 750 }
fn default_sync_threshold() -> u64 { 10 }

impl GatewayConfig {
    /// Defaults, then the optional file, then `HLGATE__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        load_config(path, ENV_PREFIX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream.url.trim().is_empty() {
            return Err(GatewayError::Config("upstream.url must not be empty".to_string()));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(GatewayError::Config("upstream.timeout_secs must be positive".to_string()));
        }
        self.listen_addr()?;

        if self.session.outbound_queue_capacity == 0 {
            return Err(GatewayError::Config(
                "session.outbound_queue_capacity must be positive".to_string(),
            ));
        }
        if self.session.max_in_flight_requests == 0 {
            return Err(GatewayError::Config(
                "session.max_in_flight_requests must be positive".to_string(),
            ));
        }
        if self.session.ping_interval_secs == 0 || self.session.idle_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "session ping and idle intervals must be positive".to_string(),
            ));
        }

        if self.poller.poll_interval_ms == 0 {
            return Err(GatewayError::Config("poller.poll_interval_ms must be positive".to_string()));
        }
        if self.poller.sync_check_interval_ms == 0 {
            return Err(GatewayError::Config(
                "poller.sync_check_interval_ms must be positive".to_string(),
            ));
        }
        if self.poller.sync_check_timeout_ms >= self.poller.sync_check_interval_ms {
            return Err(GatewayError::Config(format!(
                "poller.sync_check_timeout_ms ({}) must be shorter than poller.sync_check_interval_ms ({})",
                self.poller.sync_check_timeout_ms, self.poller.sync_check_interval_ms
            )));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server.listen_address.parse().map_err(|e| {
            GatewayError::Config(format!(
                "invalid server.listen_address {:?}: {}",
                self.server.listen_address, e
            ))
        })
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poller.poll_interval_ms),
            sync_check_interval: Duration::from_millis(self.poller.sync_check_interval_ms),
            sync_check_timeout: Duration::from_millis(self.poller.sync_check_timeout_ms),
            sync_threshold: Duration::from_secs(self.poller.sync_threshold_secs),
        }
    }
}
