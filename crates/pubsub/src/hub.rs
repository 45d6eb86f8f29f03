//! Connection hub: the live-client set and the notification fan-out path.
//!
//! Register and unregister are serialized through a single control loop.
//! Fan-out reads a subscription snapshot from the registry, then looks up
//! sessions one at a time; the registry lock is never held while the client
//! map is locked.

use hlgate_common::utils::metrics::{
    WS_ACTIVE_CONNECTIONS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_NOTIFICATIONS_SENT,
};
use hlgate_rpc::{BlockHeader, BlockReceipts, GasPriceInfo, Log, SyncStatus};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::registry::{Subscription, SubscriptionKind, SubscriptionRegistry};
use crate::session::{ClientInfo, ClientSession};

const CONTROL_QUEUE_SIZE: usize = 1000;

/// Connection statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub active_clients: usize,
    pub total_connections: u64,
    pub total_disconnections: u64,
}

enum HubCommand {
    Register(Arc<ClientSession>, oneshot::Sender<()>),
    Unregister(String, oneshot::Sender<()>),
}

/// State shared between the hub handle and its control loop
struct HubState {
    clients: RwLock<HashMap<String, Arc<ClientSession>>>,
    registry: Arc<SubscriptionRegistry>,
    total_connections: AtomicU64,
    total_disconnections: AtomicU64,
}

impl HubState {
    async fn handle(&self, command: HubCommand) {
        match command {
            HubCommand::Register(session, ack) => {
                let id = session.id().to_string();
                let remote = session.remote_addr().to_string();
                self.clients.write().await.insert(id.clone(), session);

                self.total_connections.fetch_add(1, Ordering::Relaxed);
                WS_ACTIVE_CONNECTIONS.inc();
                WS_CONNECTIONS_TOTAL.inc();
                info!("Client {} connected from {}", id, remote);

                let _ = ack.send(());
            }
            HubCommand::Unregister(id, ack) => {
                let removed = self.clients.write().await.remove(&id);

                if let Some(session) = removed {
                    self.total_disconnections.fetch_add(1, Ordering::Relaxed);
                    WS_ACTIVE_CONNECTIONS.dec();
                    WS_DISCONNECTIONS_TOTAL.inc();

                    self.registry.unsubscribe_all(&id).await;
                    session.close();
                    info!("Client {} disconnected", id);
                }

                let _ = ack.send(());
            }
        }
    }
}

/// Single authority over connected clients
pub struct ConnectionHub {
    state: Arc<HubState>,
    control: mpsc::Sender<HubCommand>,
}

impl ConnectionHub {
    /// Create the hub and spawn its control loop on the current runtime.
    ///
    /// The loop exits once the hub is dropped.
    pub fn spawn(registry: Arc<SubscriptionRegistry>) -> Arc<Self> {
        let state = Arc::new(HubState {
            clients: RwLock::new(HashMap::new()),
            registry,
            total_connections: AtomicU64::new(0),
            total_disconnections: AtomicU64::new(0),
        });
        let (control, mut commands) = mpsc::channel(CONTROL_QUEUE_SIZE);

        let loop_state = state.clone();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                loop_state.handle(command).await;
            }
            debug!("Hub control loop stopped");
        });

        Arc::new(Self { state, control })
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.state.registry
    }

    /// Add a session to the live set; returns once it is visible
    pub async fn register(&self, session: Arc<ClientSession>) {
        let (ack, done) = oneshot::channel();
        if self.control.send(HubCommand::Register(session, ack)).await.is_err() {
            error!("Hub control loop is not running");
            return;
        }
        let _ = done.await;
    }

    /// Remove a session, drop its subscriptions and close its queue.
    /// Unknown ids are ignored.
    pub async fn unregister(&self, client_id: &str) {
        let (ack, done) = oneshot::channel();
        if self
            .control
            .send(HubCommand::Unregister(client_id.to_string(), ack))
            .await
            .is_err()
        {
            error!("Hub control loop is not running");
            return;
        }
        let _ = done.await;
    }

    /// Queue a message for one client without blocking.
    ///
    /// Returns false when the client is unknown or its queue is full.
    pub async fn send_to_client(&self, client_id: &str, message: String) -> bool {
        let session = self.state.clients.read().await.get(client_id).cloned();
        match session {
            Some(session) => session.try_enqueue(message),
            None => false,
        }
    }

    pub async fn broadcast_new_head(&self, header: &BlockHeader) -> usize {
        self.broadcast(SubscriptionKind::NewHeads, header, |_| true).await
    }

    /// Deliver a log to every `logs` subscription whose filter accepts it
    pub async fn broadcast_log(&self, log: &Log) -> usize {
        self.broadcast(SubscriptionKind::Logs, log, |sub| sub.filter.matches(log))
            .await
    }

    pub async fn broadcast_gas_price(&self, info: &GasPriceInfo) -> usize {
        self.broadcast(SubscriptionKind::GasPrice, info, |_| true).await
    }

    pub async fn broadcast_block_receipts(&self, receipts: &BlockReceipts) -> usize {
        self.broadcast(SubscriptionKind::BlockReceipts, receipts, |_| true)
            .await
    }

    /// Publishes `false` when in sync and the status object otherwise
    pub async fn broadcast_syncing(&self, status: &SyncStatus) -> usize {
        self.broadcast(SubscriptionKind::Syncing, &status.to_payload(), |_| true)
            .await
    }

    /// Fan out `payload` to the subscriptions of `kind` accepted by `accept`.
    /// Returns the number of notifications queued.
    async fn broadcast<T, F>(&self, kind: SubscriptionKind, payload: &T, accept: F) -> usize
    where
        T: Serialize + ?Sized,
        F: Fn(&Subscription) -> bool,
    {
        let subscriptions = self.state.registry.subscriptions_by_kind(kind).await;
        if subscriptions.is_empty() {
            return 0;
        }

        let result = match serde_json::to_string(payload) {
            Ok(result) => result,
            Err(e) => {
                warn!("Failed to serialize {} payload: {}", kind, e);
                return 0;
            }
        };

        let mut delivered = 0;
        for sub in subscriptions.iter().filter(|sub| accept(sub)) {
            let message = notification(&sub.id, &result);
            if self.send_to_client(&sub.client_id, message).await {
                WS_NOTIFICATIONS_SENT.with_label_values(&[kind.as_str()]).inc();
                delivered += 1;
            }
        }

        if delivered > 0 {
            debug!("Broadcast {} to {} subscribers", kind, delivered);
        }
        delivered
    }

    pub async fn client_count(&self) -> usize {
        self.state.clients.read().await.len()
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            active_clients: self.client_count().await,
            total_connections: self.state.total_connections.load(Ordering::Relaxed),
            total_disconnections: self.state.total_disconnections.load(Ordering::Relaxed),
        }
    }

    pub async fn client_info(&self, client_id: &str) -> Option<ClientInfo> {
        let session = self.state.clients.read().await.get(client_id).cloned()?;
        let subscriptions = self.state.registry.client_subscriptions(client_id).await;
        Some(session.info(subscriptions))
    }

    pub async fn all_clients_info(&self) -> Vec<ClientInfo> {
        let sessions: Vec<Arc<ClientSession>> =
            self.state.clients.read().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            let subscriptions = self.state.registry.client_subscriptions(session.id()).await;
            infos.push(session.info(subscriptions));
        }
        infos
    }

    /// Close every session's outbound queue so writers flush and exit
    pub async fn close_all(&self) {
        let clients = self.state.clients.read().await;
        for session in clients.values() {
            session.close();
        }
        info!("Closed {} client queues", clients.len());
    }
}

/// Build an `eth_subscription` envelope around an already serialized result
pub fn notification(subscription_id: &str, result: &str) -> String {
    format!(
        r#"{{"jsonrpc":"2.0","method":"eth_subscription","params":{{"subscription":{},"result":{}}}}}"#,
        Value::String(subscription_id.to_string()),
        result
    )
}
