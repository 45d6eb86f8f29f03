//! JSON-RPC request routing for WebSocket clients.
//!
//! `eth_subscribe` and `eth_unsubscribe` are served from the subscription
//! registry; every other method is relayed to the upstream node unchanged.
//! Protocol errors always come back as JSON-RPC error objects.

use futures::future::join_all;
use hlgate_common::utils::metrics::WS_RPC_REQUESTS_TOTAL;
use hlgate_pubsub::{SubscriptionKind, SubscriptionRegistry};
use hlgate_rpc::types::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, PARSE_ERROR,
};
use hlgate_rpc::{Request, Response, UpstreamRpc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Result of handling one request
enum Reply {
    /// Built by the gateway
    Local(Response),
    /// Upstream response body, passed through verbatim
    Relayed(String),
}

impl Reply {
    fn into_text(self) -> String {
        match self {
            Reply::Local(response) => response.to_json_string(),
            Reply::Relayed(body) => body,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Reply::Local(response) => serde_json::to_value(&response).unwrap_or(Value::Null),
            Reply::Relayed(body) => serde_json::from_str(&body).unwrap_or_else(|e| {
                error!("Upstream returned invalid JSON in batch: {}", e);
                serde_json::to_value(Response::error(
                    Value::Null,
                    INTERNAL_ERROR,
                    "Invalid upstream response",
                ))
                .unwrap_or(Value::Null)
            }),
        }
    }
}

pub struct RequestRouter {
    registry: Arc<SubscriptionRegistry>,
    upstream: Arc<dyn UpstreamRpc>,
}

impl RequestRouter {
    pub fn new(registry: Arc<SubscriptionRegistry>, upstream: Arc<dyn UpstreamRpc>) -> Self {
        Self { registry, upstream }
    }

    /// Handle one inbound text frame from `client_id`; returns the reply frame
    pub async fn handle_message(&self, client_id: &str, text: &str) -> String {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!("Unparseable message from {}: {}", client_id, e);
                return Response::error(Value::Null, PARSE_ERROR, "Failed to parse JSON-RPC request")
                    .to_json_string();
            }
        };

        match value {
            Value::Array(items) => self.handle_batch(client_id, items).await,
            value => self.handle_single(client_id, value, Some(text)).await.into_text(),
        }
    }

    async fn handle_batch(&self, client_id: &str, items: Vec<Value>) -> String {
        if items.is_empty() {
            return Response::error(Value::Null, INVALID_REQUEST, "Empty batch").to_json_string();
        }

        let replies = join_all(
            items
                .into_iter()
                .map(|item| self.handle_single(client_id, item, None)),
        )
        .await;

        let values: Vec<Value> = replies.into_iter().map(Reply::into_value).collect();
        serde_json::to_string(&values).unwrap_or_default()
    }

    /// `raw` is the original text when the request arrived on its own, and is
    /// relayed as-is in that case
    async fn handle_single(&self, client_id: &str, value: Value, raw: Option<&str>) -> Reply {
        let id = value.get("id").cloned().unwrap_or(Value::Null);

        let request: Request = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(_) => {
                return Reply::Local(Response::error(id, INVALID_REQUEST, "Invalid request"));
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Reply::Local(Response::error(request.id, INVALID_REQUEST, "Invalid JSON-RPC version"));
        }
        if request.method.is_empty() {
            return Reply::Local(Response::error(request.id, INVALID_REQUEST, "Method is required"));
        }

        WS_RPC_REQUESTS_TOTAL.with_label_values(&[request.method.as_str()]).inc();

        match request.method.as_str() {
            "eth_subscribe" => Reply::Local(self.subscribe(client_id, request).await),
            "eth_unsubscribe" => Reply::Local(self.unsubscribe(client_id, request).await),
            _ => self.relay(request, raw).await,
        }
    }

    async fn subscribe(&self, client_id: &str, request: Request) -> Response {
        let params = match request.params {
            Some(Value::Array(params)) if !params.is_empty() => params,
            _ => {
                return Response::error(request.id, INVALID_PARAMS, "Invalid subscription parameters");
            }
        };

        let Some(kind_name) = params[0].as_str() else {
            return Response::error(request.id, INVALID_PARAMS, "Subscription type must be a string");
        };

        let Some(kind) = SubscriptionKind::from_str(kind_name) else {
            let supported: Vec<&str> = SubscriptionKind::ALL.iter().map(|k| k.as_str()).collect();
            return Response::error(
                request.id,
                INVALID_PARAMS,
                format!("Unsupported subscription type. Supported: {}", supported.join(", ")),
            );
        };

        let filter = match kind {
            SubscriptionKind::Logs => params.get(1).cloned(),
            _ => None,
        };

        let subscription_id = self.registry.subscribe(client_id, kind, filter).await;
        Response::success(request.id, Value::String(subscription_id))
    }

    async fn unsubscribe(&self, client_id: &str, request: Request) -> Response {
        let subscription_id = match request.params.as_ref().and_then(|p| p.get(0)).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                return Response::error(request.id, INVALID_PARAMS, "Invalid unsubscribe parameters");
            }
        };

        let removed = self.registry.unsubscribe(client_id, &subscription_id).await;
        Response::success(request.id, Value::Bool(removed))
    }

    async fn relay(&self, request: Request, raw: Option<&str>) -> Reply {
        let body = match raw {
            Some(raw) => raw.to_string(),
            None => match serde_json::to_string(&request) {
                Ok(body) => body,
                Err(e) => {
                    return Reply::Local(Response::error(request.id, INTERNAL_ERROR, e.to_string()));
                }
            },
        };

        match self.upstream.call_raw(body).await {
            Ok(body) => Reply::Relayed(body),
            Err(e) => {
                error!("Failed to forward {}: {}", request.method, e);
                Reply::Local(Response::error(request.id, INTERNAL_ERROR, "Failed to forward request"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hlgate_rpc::{BlockHeader, Log, UpstreamError, UpstreamResult};
    use serde_json::json;

    /// Echoes `{"result": <method>, "id": <id>}` for every relayed call
    struct EchoUpstream {
        fail: bool,
    }

    #[async_trait]
    impl UpstreamRpc for EchoUpstream {
        async fn block_number(&self) -> UpstreamResult<String> {
            Ok("0x1".to_string())
        }
        async fn full_block(&self, _number: &str) -> UpstreamResult<Option<BlockHeader>> {
            Ok(None)
        }
        async fn block_logs(&self, _number: &str) -> UpstreamResult<Vec<Log>> {
            Ok(Vec::new())
        }
        async fn gas_price(&self) -> UpstreamResult<String> {
            Ok("0x1".to_string())
        }
        async fn big_block_gas_price(&self) -> UpstreamResult<Option<String>> {
            Ok(None)
        }
        async fn block_receipts(&self, _number: &str) -> UpstreamResult<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn call_raw(&self, body: String) -> UpstreamResult<String> {
            if self.fail {
                return Err(UpstreamError::EmptyResult("call_raw"));
            }
            let request: Value = serde_json::from_str(&body)?;
            Ok(json!({"jsonrpc": "2.0", "result": request["method"], "id": request["id"]}).to_string())
        }
    }

    fn router(fail: bool) -> (RequestRouter, Arc<SubscriptionRegistry>) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let router = RequestRouter::new(registry.clone(), Arc::new(EchoUpstream { fail }));
        (router, registry)
    }

    async fn call(router: &RequestRouter, client: &str, request: Value) -> Value {
        let reply = router.handle_message(client, &request.to_string()).await;
        serde_json::from_str(&reply).unwrap()
    }

    #[tokio::test]
    async fn test_parse_error() {
        let (router, _) = router(false);
        let reply: Value = serde_json::from_str(&router.handle_message("c", "{not json").await).unwrap();
        assert_eq!(reply["error"]["code"], PARSE_ERROR);
        assert!(reply["id"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_version_and_missing_method() {
        let (router, _) = router(false);

        let reply = call(&router, "c", json!({"jsonrpc": "1.0", "method": "eth_chainId", "id": 3})).await;
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
        assert_eq!(reply["id"], 3);

        let reply = call(&router, "c", json!({"jsonrpc": "2.0", "id": 4})).await;
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
        assert_eq!(reply["error"]["message"], "Method is required");

        let reply = call(&router, "c", json!(42)).await;
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);

        let reply = call(&router, "c", json!({"jsonrpc": "2.0", "method": 7, "id": 5})).await;
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
        assert_eq!(reply["id"], 5);
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let (router, registry) = router(false);

        let reply = call(
            &router,
            "c",
            json!({"jsonrpc": "2.0", "method": "eth_subscribe", "params": ["logs", {"address": "0x1"}], "id": 1}),
        )
        .await;
        let sub_id = reply["result"].as_str().unwrap().to_string();
        assert_eq!(sub_id.len(), 34);

        let logs = registry.subscriptions_by_kind(SubscriptionKind::Logs).await;
        assert_eq!(logs[0].params, Some(json!({"address": "0x1"})));

        let unsubscribe = json!({"jsonrpc": "2.0", "method": "eth_unsubscribe", "params": [sub_id], "id": 2});
        assert_eq!(call(&router, "c", unsubscribe.clone()).await["result"], true);
        assert_eq!(call(&router, "c", unsubscribe).await["result"], false);
    }

    #[tokio::test]
    async fn test_unsubscribe_other_clients_subscription() {
        let (router, registry) = router(false);
        let owned = registry.subscribe("owner", SubscriptionKind::NewHeads, None).await;

        let reply = call(
            &router,
            "intruder",
            json!({"jsonrpc": "2.0", "method": "eth_unsubscribe", "params": [owned], "id": 1}),
        )
        .await;
        assert_eq!(reply["result"], false);
        assert_eq!(registry.client_subscriptions("owner").await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_param_errors() {
        let (router, _) = router(false);

        for params in [json!([]), json!("newHeads"), Value::Null] {
            let reply = call(
                &router,
                "c",
                json!({"jsonrpc": "2.0", "method": "eth_subscribe", "params": params, "id": 1}),
            )
            .await;
            assert_eq!(reply["error"]["code"], INVALID_PARAMS);
            assert_eq!(reply["error"]["message"], "Invalid subscription parameters");
        }

        let reply = call(
            &router,
            "c",
            json!({"jsonrpc": "2.0", "method": "eth_subscribe", "params": [1], "id": 1}),
        )
        .await;
        assert_eq!(reply["error"]["message"], "Subscription type must be a string");

        let reply = call(
            &router,
            "c",
            json!({"jsonrpc": "2.0", "method": "eth_subscribe", "params": ["newPendingTransactions"], "id": 1}),
        )
        .await;
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);
        assert!(reply["error"]["message"].as_str().unwrap().contains("blockReceipts"));

        let reply = call(
            &router,
            "c",
            json!({"jsonrpc": "2.0", "method": "eth_unsubscribe", "params": [], "id": 1}),
        )
        .await;
        assert_eq!(reply["error"]["message"], "Invalid unsubscribe parameters");
    }

    #[tokio::test]
    async fn test_relay_passes_body_through() {
        let (router, _) = router(false);
        let reply = call(&router, "c", json!({"jsonrpc": "2.0", "method": "eth_chainId", "id": 9})).await;
        assert_eq!(reply["result"], "eth_chainId");
        assert_eq!(reply["id"], 9);
    }

    #[tokio::test]
    async fn test_relay_failure_is_internal_error() {
        let (router, _) = router(true);
        let reply = call(&router, "c", json!({"jsonrpc": "2.0", "method": "eth_chainId", "id": 9})).await;
        assert_eq!(reply["error"]["code"], INTERNAL_ERROR);
        assert_eq!(reply["id"], 9);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let (router, registry) = router(false);
        let reply = call(
            &router,
            "c",
            json!([
                {"jsonrpc": "2.0", "method": "eth_chainId", "id": 1},
                {"jsonrpc": "2.0", "method": "eth_subscribe", "params": ["newHeads"], "id": 2},
                {"jsonrpc": "1.0", "method": "eth_chainId", "id": 3}
            ]),
        )
        .await;

        let replies = reply.as_array().unwrap();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["result"], "eth_chainId");
        assert_eq!(replies[1]["id"], 2);
        assert!(replies[1]["result"].as_str().unwrap().starts_with("0x"));
        assert_eq!(replies[2]["error"]["code"], INVALID_REQUEST);
        assert_eq!(registry.client_subscriptions("c").await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (router, _) = router(false);
        let reply = call(&router, "c", json!([])).await;
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
    }
}
