pub mod config;
pub mod http;
pub mod observability;
pub mod router;
pub mod service;
pub mod websocket;

pub use config::GatewayConfig;
pub use router::RequestRouter;
pub use service::{build_router, AppState, Gateway};
