use anyhow::Context;
use axum::{routing::get, Router};
use hlgate_common::utils::metrics::MetricsCollector;
use hlgate_common::utils::metrics_server::create_metrics_router;
use hlgate_pubsub::{ConnectionHub, EventPoller, SubscriptionRegistry};
use hlgate_rpc::{HttpUpstream, UpstreamRpc};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::http::rpc_handler;
use crate::observability::{connections_handler, health_handler, stats_handler};
use crate::router::RequestRouter;
use crate::websocket::{ws_handler, ConnectionSettings};

/// Shared state handed to every HTTP and WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ConnectionHub>,
    pub router: Arc<RequestRouter>,
    pub upstream: Arc<dyn UpstreamRpc>,
    pub settings: Arc<ConnectionSettings>,
    /// Flips to `true` when the gateway starts shutting down
    pub shutdown: watch::Receiver<bool>,
}

/// All HTTP routes: `/` (WebSocket upgrade or JSON-RPC POST), `/health`,
/// `/connections`, `/stats` and `/metrics`
pub fn build_router(state: AppState, metrics: MetricsCollector) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(ws_handler).post(rpc_handler))
        .route("/health", get(health_handler))
        .route("/connections", get(connections_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
        .merge(create_metrics_router(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub struct Gateway {
    config: GatewayConfig,
    upstream: Arc<dyn UpstreamRpc>,
    registry: Arc<SubscriptionRegistry>,
    metrics: MetricsCollector,
}

impl Gateway {
    /// Gateway talking to the configured upstream over HTTP
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let upstream = HttpUpstream::new(config.upstream.url.clone(), config.upstream_timeout())
            .context("Failed to build upstream client")?;
        Ok(Self::with_upstream(config, Arc::new(upstream)))
    }

    pub fn with_upstream(config: GatewayConfig, upstream: Arc<dyn UpstreamRpc>) -> Self {
        Self {
            config,
            upstream,
            registry: Arc::new(SubscriptionRegistry::new()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Serve on `listener` until `shutdown` resolves, then drain.
    ///
    /// Pollers and connection readers are stopped, every outbound queue is
    /// closed so writers flush and send close frames, and the server gets
    /// the configured grace period to finish before it is aborted.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let hub = ConnectionHub::spawn(self.registry.clone());
        let state = AppState {
            hub: hub.clone(),
            router: Arc::new(RequestRouter::new(self.registry.clone(), self.upstream.clone())),
            upstream: self.upstream.clone(),
            settings: Arc::new(ConnectionSettings::from(&self.config)),
            shutdown: shutdown_rx.clone(),
        };

        let poller = Arc::new(EventPoller::new(
            self.upstream.clone(),
            hub.clone(),
            self.config.poller_config(),
        ));
        let poller_tasks = poller.spawn(shutdown_rx);

        let app = build_router(state, self.metrics.clone());
        let addr = listener.local_addr().context("Failed to read listener address")?;
        info!("Listening on {}", addr);
        info!("Endpoints: / (WebSocket, JSON-RPC POST), /metrics, /health, /connections, /stats");
        info!("Upstream RPC: {}", self.config.upstream.url);

        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async {
                    let _ = drain_rx.await;
                })
                .await
        });

        tokio::select! {
            _ = shutdown => info!("Shutting down gracefully"),
            result = &mut server => {
                let _ = shutdown_tx.send(true);
                return result
                    .context("Server task failed")?
                    .context("Server error");
            }
        }

        let _ = shutdown_tx.send(true);
        hub.close_all().await;
        let _ = drain_tx.send(());

        let grace = self.config.shutdown_grace();
        match timeout(grace, &mut server).await {
            Ok(result) => result.context("Server task failed")?.context("Server error")?,
            Err(_) => {
                warn!("Connections still open after {:?}, forcing close", grace);
                server.abort();
            }
        }

        for task in poller_tasks {
            let _ = task.await;
        }
        info!("Gateway stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use hlgate_rpc::{BlockHeader, Log, UpstreamError, UpstreamResult};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct DownUpstream;

    #[async_trait]
    impl UpstreamRpc for DownUpstream {
        async fn block_number(&self) -> UpstreamResult<String> {
            Err(UpstreamError::EmptyResult("eth_blockNumber"))
        }
        async fn full_block(&self, _number: &str) -> UpstreamResult<Option<BlockHeader>> {
            Ok(None)
        }
        async fn block_logs(&self, _number: &str) -> UpstreamResult<Vec<Log>> {
            Ok(Vec::new())
        }
        async fn gas_price(&self) -> UpstreamResult<String> {
            Err(UpstreamError::EmptyResult("eth_gasPrice"))
        }
        async fn big_block_gas_price(&self) -> UpstreamResult<Option<String>> {
            Ok(None)
        }
        async fn block_receipts(&self, _number: &str) -> UpstreamResult<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn call_raw(&self, _body: String) -> UpstreamResult<String> {
            Err(UpstreamError::EmptyResult("call_raw"))
        }
    }

    fn app() -> (Router, watch::Sender<bool>) {
        let config = GatewayConfig::default();
        let registry = Arc::new(SubscriptionRegistry::new());
        let upstream: Arc<dyn UpstreamRpc> = Arc::new(DownUpstream);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState {
            hub: ConnectionHub::spawn(registry.clone()),
            router: Arc::new(RequestRouter::new(registry, upstream.clone())),
            upstream,
            settings: Arc::new(ConnectionSettings::from(&config)),
            shutdown: shutdown_rx,
        };
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let router = build_router(state, MetricsCollector::new()).layer(MockConnectInfo(peer));
        (router, shutdown_tx)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_plain_get_requires_websocket() {
        let (app, _shutdown) = app();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({"error": "WebSocket connection required"}));
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let (app, _shutdown) = app();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!({"status": "ok", "activeClients": 0}));

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["websocket"]["totalConnections"], 0);
        for kind in ["newHeads", "logs", "gasPrice", "blockReceipts", "syncing"] {
            assert_eq!(stats["subscriptions"][kind], 0);
        }
    }

    #[tokio::test]
    async fn test_http_relay_errors() {
        let (app, _shutdown) = app();

        let response = app
            .clone()
            .oneshot(Request::builder().method("POST").uri("/").body(Body::from("{oops")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"]["code"], -32700);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(Body::from(r#"{"jsonrpc":"2.0","method":"eth_chainId","id":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32603);
        assert_eq!(body["id"], 1);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(Body::from(r#"[{"jsonrpc":"2.0","method":"eth_chainId","id":1}]"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_rejects_invalid_config() {
        let mut config = GatewayConfig::default();
        config.session.outbound_queue_capacity = 0;
        assert!(Gateway::new(config).is_err());
    }
}
