//! JSON-RPC 2.0 wire types, chain data models and the upstream node client.

pub mod client;
pub mod error;
pub mod models;
pub mod types;

pub use client::{HttpUpstream, UpstreamRpc};
pub use error::{UpstreamError, UpstreamResult};
pub use models::{BlockHeader, BlockReceipts, GasPriceInfo, Log, SyncStatus};
pub use types::{ErrorObject, Request, Response};
