//! WebSocket connection handling.
//!
//! Each connection gets a [`ClientSession`] registered with the hub, a
//! writer task draining the session's outbound queue, and a reader loop
//! that dispatches every text frame to the router as its own task.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use hlgate_common::utils::metrics::WS_MESSAGES_RECEIVED;
use hlgate_pubsub::ClientSession;
use hlgate_rpc::types::PARSE_ERROR;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::service::AppState;

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub queue_capacity: usize,
    pub max_in_flight: usize,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_message_size: usize,
}

impl From<&GatewayConfig> for ConnectionSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            queue_capacity: config.session.outbound_queue_capacity,
            max_in_flight: config.session.max_in_flight_requests,
            ping_interval: Duration::from_secs(config.session.ping_interval_secs),
            write_timeout: Duration::from_secs(config.session.write_timeout_secs),
            idle_timeout: Duration::from_secs(config.session.idle_timeout_secs),
            max_message_size: config.server.max_message_size,
        }
    }
}

/// Client address, preferring proxy headers over the socket peer
pub fn remote_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if let Some(ip) = header_value("x-real-ip") {
        return ip;
    }
    if let Some(forwarded) = header_value("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    peer.ip().to_string()
}

/// `GET /`: upgrade to WebSocket, or 400 for plain HTTP
pub async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let Some(ws) = ws else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "WebSocket connection required"})),
        )
            .into_response();
    };

    let remote = remote_address(&headers, peer);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    ws.max_message_size(state.settings.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, remote, user_agent))
}

async fn handle_socket(socket: WebSocket, state: AppState, remote: String, user_agent: String) {
    let settings = state.settings.clone();
    let (session, outbound) = ClientSession::new(remote, user_agent, settings.queue_capacity);
    state.hub.register(session.clone()).await;

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(sink, outbound, settings.clone()));

    read_pump(stream, &session, &state).await;

    // no handler is running any more; closes the queue, so the writer
    // flushes and sends a close frame
    state.hub.unregister(session.id()).await;
    if timeout(settings.write_timeout, writer).await.is_err() {
        debug!("Writer for {} did not finish in time", session.id());
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    settings: Arc<ConnectionSettings>,
) {
    let mut ping = interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(text) = message else {
                    let _ = timeout(settings.write_timeout, sink.send(Message::Close(None))).await;
                    break;
                };
                match timeout(settings.write_timeout, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("WebSocket write failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!("WebSocket write timed out");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if !matches!(timeout(settings.write_timeout, sink.send(Message::Ping(Vec::new()))).await, Ok(Ok(()))) {
                    debug!("WebSocket ping failed");
                    break;
                }
            }
        }
    }
}

/// Read frames until the client goes away, then wait for in-flight handlers.
///
/// Handlers may still register subscriptions, so the session is only
/// unregistered once every handler has finished or been cancelled.
async fn read_pump(mut stream: SplitStream<WebSocket>, session: &Arc<ClientSession>, state: &AppState) {
    let settings = &state.settings;
    let in_flight = Arc::new(Semaphore::new(settings.max_in_flight));
    let mut handlers = JoinSet::new();
    let mut shutdown = state.shutdown.clone();

    let idle = sleep(settings.idle_timeout);
    tokio::pin!(idle);

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            Some(_) = handlers.join_next(), if !handlers.is_empty() => continue,
            _ = &mut idle => {
                info!("Client {} idle for {:?}, closing", session.id(), settings.idle_timeout);
                break;
            }
            _ = shutdown.changed() => break,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!("WebSocket read error for {}: {}", session.id(), e);
                break;
            }
            None => break,
        };
        idle.as_mut().reset(Instant::now() + settings.idle_timeout);

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    session.record_received();
                    WS_MESSAGES_RECEIVED.inc();
                    let reply = hlgate_rpc::Response::error(Value::Null, PARSE_ERROR, "Failed to parse JSON-RPC request");
                    session.try_enqueue(reply.to_json_string());
                    continue;
                }
            },
            Message::Close(_) => break,
            // pongs are answered by the protocol layer
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        session.record_received();
        WS_MESSAGES_RECEIVED.inc();

        let permit = match in_flight.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let router = state.router.clone();
        let session = session.clone();
        handlers.spawn(async move {
            let reply = router.handle_message(session.id(), &text).await;
            session.try_enqueue(reply);
            drop(permit);
        });
    }

    let drained = timeout(settings.write_timeout, async {
        while handlers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!("Cancelling {} pending requests for {}", handlers.len(), session.id());
        handlers.abort_all();
        while handlers.join_next().await.is_some() {}
    }
}
