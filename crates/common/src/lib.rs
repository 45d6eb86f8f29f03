//! Shared plumbing for the hlgate workspace: error taxonomy, configuration
//! loading, logging setup and the Prometheus metrics registry.

pub mod error;
pub mod utils;

pub use error::{GatewayError, Result};
