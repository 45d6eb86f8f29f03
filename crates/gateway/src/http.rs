//! Plain HTTP JSON-RPC relay on `POST /`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hlgate_common::utils::metrics::{RPC_ERRORS_TOTAL, RPC_REQUESTS_TOTAL, RPC_REQUEST_DURATION};
use hlgate_rpc::types::{INTERNAL_ERROR, INVALID_REQUEST, JSONRPC_VERSION, PARSE_ERROR};
use hlgate_rpc::Request;
use serde_json::Value;
use std::time::Instant;
use tracing::error;

use crate::service::AppState;

fn json_body(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn rpc_error(error_type: &str, id: Value, code: i32, message: &str) -> Response {
    RPC_ERRORS_TOTAL.with_label_values(&[error_type]).inc();
    (StatusCode::OK, Json(hlgate_rpc::Response::error(id, code, message))).into_response()
}

pub async fn rpc_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let start = Instant::now();

    if body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'[') {
        return relay_batch(&state, body, start).await;
    }

    let request: Request = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => {
            return rpc_error("parse_error", Value::Null, PARSE_ERROR, "Failed to parse JSON-RPC request");
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        return rpc_error("invalid_version", request.id, INVALID_REQUEST, "Invalid JSON-RPC version");
    }
    if request.method.is_empty() {
        return rpc_error("missing_method", request.id, INVALID_REQUEST, "Method is required");
    }

    RPC_REQUESTS_TOTAL.with_label_values(&[request.method.as_str()]).inc();

    let raw = String::from_utf8_lossy(&body).into_owned();
    match state.upstream.call_raw(raw).await {
        Ok(response) => {
            RPC_REQUEST_DURATION
                .with_label_values(&[request.method.as_str()])
                .observe(start.elapsed().as_secs_f64());
            json_body(StatusCode::OK, response)
        }
        Err(e) => {
            error!("Failed to forward request: {}", e);
            rpc_error(
                "upstream_error",
                request.id,
                INTERNAL_ERROR,
                "Failed to forward request to upstream",
            )
        }
    }
}

async fn relay_batch(state: &AppState, body: Bytes, start: Instant) -> Response {
    if let Ok(requests) = serde_json::from_slice::<Vec<Request>>(&body) {
        for request in requests.iter().filter(|r| !r.method.is_empty()) {
            RPC_REQUESTS_TOTAL.with_label_values(&[request.method.as_str()]).inc();
        }
    }

    let raw = String::from_utf8_lossy(&body).into_owned();
    match state.upstream.call_raw(raw).await {
        Ok(response) => {
            RPC_REQUEST_DURATION
                .with_label_values(&["batch"])
                .observe(start.elapsed().as_secs_f64());
            json_body(StatusCode::OK, response)
        }
        Err(e) => {
            RPC_ERRORS_TOTAL.with_label_values(&["batch_upstream_error"]).inc();
            error!("Failed to forward batch request: {}", e);
            let errors = vec![hlgate_rpc::Response::error(
                Value::Null,
                INTERNAL_ERROR,
                "Failed to forward batch request",
            )];
            (StatusCode::INTERNAL_SERVER_ERROR, Json(errors)).into_response()
        }
    }
}
