use thiserror::Error;

/// Common error types for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration errors: unreadable sources, bad values, failed validation
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}
