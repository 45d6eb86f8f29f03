//! Upstream node client.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{UpstreamError, UpstreamResult};
use crate::models::{BlockHeader, Log};
use crate::types::{Request, Response};

/// Calls the gateway makes against the upstream node.
///
/// Block numbers are passed as the `0x` hex strings the node reported.
#[async_trait]
pub trait UpstreamRpc: Send + Sync {
    /// Latest block number
    async fn block_number(&self) -> UpstreamResult<String>;

    /// Header of the given block; `None` when the node does not have it yet
    async fn full_block(&self, number: &str) -> UpstreamResult<Option<BlockHeader>>;

    /// Every log emitted in the given block
    async fn block_logs(&self, number: &str) -> UpstreamResult<Vec<Log>>;

    async fn gas_price(&self) -> UpstreamResult<String>;

    /// Gas price for big blocks; `None` when the node does not report one
    async fn big_block_gas_price(&self) -> UpstreamResult<Option<String>>;

    async fn block_receipts(&self, number: &str) -> UpstreamResult<Vec<Value>>;

    /// Forward a raw JSON-RPC body and return the raw response body
    async fn call_raw(&self, body: String) -> UpstreamResult<String>;
}

/// JSON-RPC over HTTP POST
pub struct HttpUpstream {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(url: impl Into<String>, timeout: Duration) -> UpstreamResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_transport(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(err)
        }
    }

    /// Issue one call and return its `result`, which may be `null`
    async fn call(&self, method: &str, params: Value) -> UpstreamResult<Value> {
        let request = Request::new(method, params);
        debug!("Upstream call {}", method);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let body = response.bytes().await.map_err(|e| self.map_transport(e))?;
        let response: Response = serde_json::from_slice(&body)?;

        if let Some(error) = response.error {
            return Err(UpstreamError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn call_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> UpstreamResult<Option<T>> {
        let result = self.call(method, params).await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }
}

#[async_trait]
impl UpstreamRpc for HttpUpstream {
    async fn block_number(&self) -> UpstreamResult<String> {
        self.call_typed("eth_blockNumber", json!([]))
            .await?
            .ok_or(UpstreamError::EmptyResult("eth_blockNumber"))
    }

    async fn full_block(&self, number: &str) -> UpstreamResult<Option<BlockHeader>> {
        self.call_typed("eth_getBlockByNumber", json!([number, false])).await
    }

    async fn block_logs(&self, number: &str) -> UpstreamResult<Vec<Log>> {
        let filter = json!({ "fromBlock": number, "toBlock": number });
        Ok(self.call_typed("eth_getLogs", json!([filter])).await?.unwrap_or_default())
    }

    async fn gas_price(&self) -> UpstreamResult<String> {
        self.call_typed("eth_gasPrice", json!([]))
            .await?
            .ok_or(UpstreamError::EmptyResult("eth_gasPrice"))
    }

    async fn big_block_gas_price(&self) -> UpstreamResult<Option<String>> {
        self.call_typed("eth_bigBlockGasPrice", json!([])).await
    }

    async fn block_receipts(&self, number: &str) -> UpstreamResult<Vec<Value>> {
        Ok(self
            .call_typed("eth_getBlockReceipts", json!([number]))
            .await?
            .unwrap_or_default())
    }

    async fn call_raw(&self, body: String) -> UpstreamResult<String> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        response.text().await.map_err(|e| self.map_transport(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};

    async fn mock_node(Json(req): Json<Value>) -> Json<Value> {
        let id = req["id"].clone();
        let result = match req["method"].as_str().unwrap_or_default() {
            "eth_blockNumber" => json!("0x10"),
            "eth_getBlockByNumber" => {
                if req["params"][0] == "0x10" && req["params"][1] == false {
                    json!({"number": "0x10", "hash": "0xabc", "timestamp": "0x64"})
                } else {
                    Value::Null
                }
            }
            "eth_getLogs" => {
                assert_eq!(req["params"][0]["fromBlock"], req["params"][0]["toBlock"]);
                json!([{"address": "0x1", "topics": ["0xaa"], "data": "0x"}])
            }
            "eth_gasPrice" => json!("0x3b9aca00"),
            "eth_bigBlockGasPrice" => Value::Null,
            "eth_getBlockReceipts" => json!([{"status": "0x1"}]),
            _ => {
                return Json(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32601, "message": "method not found"},
                    "id": id
                }))
            }
        };
        Json(json!({"jsonrpc": "2.0", "result": result, "id": id}))
    }

    async fn spawn_mock() -> HttpUpstream {
        let app = Router::new().route("/", post(mock_node));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        HttpUpstream::new(format!("http://{}/", addr), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_typed_calls() {
        let upstream = spawn_mock().await;

        assert_eq!(upstream.block_number().await.unwrap(), "0x10");

        let header = upstream.full_block("0x10").await.unwrap().unwrap();
        assert_eq!(header.hash, "0xabc");
        assert_eq!(header.timestamp_secs(), Some(100));

        let logs = upstream.block_logs("0x10").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].topics, vec!["0xaa".to_string()]);

        assert_eq!(upstream.gas_price().await.unwrap(), "0x3b9aca00");
        assert_eq!(upstream.block_receipts("0x10").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_null_results() {
        let upstream = spawn_mock().await;

        assert!(upstream.full_block("0x11").await.unwrap().is_none());
        assert!(upstream.big_block_gas_price().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let upstream = spawn_mock().await;

        let err = upstream.call("eth_unknown", json!([])).await.unwrap_err();
        match err {
            UpstreamError::Rpc { code, .. } => assert_eq!(code, -32601),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_call_raw_returns_body_unchanged() {
        let upstream = spawn_mock().await;

        let body = r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":42}"#;
        let raw = upstream.call_raw(body.to_string()).await.unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["result"], "0x10");
        assert_eq!(value["id"], 42);
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = HttpUpstream::new(format!("http://{}/", addr), Duration::from_secs(2)).unwrap();
        assert!(upstream.block_number().await.is_err());
    }
}
