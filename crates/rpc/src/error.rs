use std::time::Duration;
use thiserror::Error;

/// Errors talking to the upstream node
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Upstream call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream returned no result for {0}")]
    EmptyResult(&'static str),
}

impl UpstreamError {
    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Transport(_) => "transport",
            UpstreamError::Decode(_) => "decode",
            UpstreamError::Rpc { .. } => "rpc",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::EmptyResult(_) => "empty_result",
        }
    }
}

pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;
