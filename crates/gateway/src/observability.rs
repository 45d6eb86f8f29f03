//! Read-only status endpoints.

use axum::{extract::State, Json};
use hlgate_pubsub::SubscriptionKind;
use serde_json::{json, Map, Value};

use crate::service::AppState;

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "activeClients": state.hub.client_count().await,
    }))
}

/// `GET /connections`
pub async fn connections_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "stats": state.hub.stats().await,
        "clients": state.hub.all_clients_info().await,
    }))
}

/// `GET /stats`
pub async fn stats_handler(State(state): State<AppState>) -> Json<Value> {
    let stats = state.hub.stats().await;
    let registry = state.hub.registry();

    let mut subscriptions = Map::new();
    for kind in SubscriptionKind::ALL {
        subscriptions.insert(kind.as_str().to_string(), json!(registry.count_by_kind(kind).await));
    }

    Json(json!({
        "websocket": {
            "activeConnections": stats.active_clients,
            "totalConnections": stats.total_connections,
            "totalDisconnections": stats.total_disconnections,
        },
        "subscriptions": subscriptions,
    }))
}
