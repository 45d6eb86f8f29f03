//! Subscription registry.

use hlgate_common::utils::metrics::{
    WS_ACTIVE_SUBSCRIPTIONS, WS_SUBSCRIPTIONS_CREATED, WS_SUBSCRIPTIONS_REMOVED,
};
use rand::{rngs::OsRng, RngCore};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::filter::SubscriptionFilter;

/// Event stream a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    NewHeads,
    Logs,
    GasPrice,
    BlockReceipts,
    Syncing,
}

impl SubscriptionKind {
    pub const ALL: [SubscriptionKind; 5] = [
        SubscriptionKind::NewHeads,
        SubscriptionKind::Logs,
        SubscriptionKind::GasPrice,
        SubscriptionKind::BlockReceipts,
        SubscriptionKind::Syncing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::NewHeads => "newHeads",
            SubscriptionKind::Logs => "logs",
            SubscriptionKind::GasPrice => "gasPrice",
            SubscriptionKind::BlockReceipts => "blockReceipts",
            SubscriptionKind::Syncing => "syncing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "newHeads" => Some(SubscriptionKind::NewHeads),
            "logs" => Some(SubscriptionKind::Logs),
            "gasPrice" => Some(SubscriptionKind::GasPrice),
            "blockReceipts" => Some(SubscriptionKind::BlockReceipts),
            "syncing" => Some(SubscriptionKind::Syncing),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client's standing request for one event stream. Immutable once created.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub kind: SubscriptionKind,
    /// Filter parameters exactly as the client sent them
    pub params: Option<Value>,
    pub filter: SubscriptionFilter,
    pub client_id: String,
}

#[derive(Default)]
struct RegistryInner {
    subscriptions: HashMap<String, Arc<Subscription>>,
    by_client: HashMap<String, Vec<String>>,
}

/// Owns every live subscription and the per-client index.
///
/// Both maps sit behind one lock so they are always updated together.
/// Listing methods copy out under the read lock.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
}

/// `0x` followed by 32 lowercase hex characters
pub fn generate_subscription_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a subscription and return its id.
    ///
    /// Filter parameters are only interpreted for `logs`; a malformed filter
    /// is accepted and stored as one that matches nothing.
    pub async fn subscribe(&self, client_id: &str, kind: SubscriptionKind, params: Option<Value>) -> String {
        let filter = match kind {
            SubscriptionKind::Logs => SubscriptionFilter::from_params(params.as_ref()),
            _ => SubscriptionFilter::All,
        };

        let mut inner = self.inner.write().await;
        let mut id = generate_subscription_id();
        while inner.subscriptions.contains_key(&id) {
            id = generate_subscription_id();
        }

        let subscription = Subscription {
            id: id.clone(),
            kind,
            params,
            filter,
            client_id: client_id.to_string(),
        };
        inner.subscriptions.insert(id.clone(), Arc::new(subscription));
        inner
            .by_client
            .entry(client_id.to_string())
            .or_default()
            .push(id.clone());
        drop(inner);

        WS_ACTIVE_SUBSCRIPTIONS.with_label_values(&[kind.as_str()]).inc();
        WS_SUBSCRIPTIONS_CREATED.with_label_values(&[kind.as_str()]).inc();

        info!("Client {} subscribed to {} (sub_id: {})", client_id, kind, id);
        id
    }

    /// Remove a subscription. Only its owner may remove it.
    pub async fn unsubscribe(&self, client_id: &str, subscription_id: &str) -> bool {
        let mut inner = self.inner.write().await;

        let kind = match inner.subscriptions.get(subscription_id) {
            Some(sub) if sub.client_id == client_id => sub.kind,
            _ => return false,
        };

        inner.subscriptions.remove(subscription_id);
        if let Some(ids) = inner.by_client.get_mut(client_id) {
            ids.retain(|id| id != subscription_id);
            if ids.is_empty() {
                inner.by_client.remove(client_id);
            }
        }
        drop(inner);

        WS_ACTIVE_SUBSCRIPTIONS.with_label_values(&[kind.as_str()]).dec();
        WS_SUBSCRIPTIONS_REMOVED.with_label_values(&[kind.as_str()]).inc();

        info!("Client {} unsubscribed from {} (sub_id: {})", client_id, kind, subscription_id);
        true
    }

    /// Remove every subscription owned by `client_id`; returns how many were removed
    pub async fn unsubscribe_all(&self, client_id: &str) -> usize {
        let mut inner = self.inner.write().await;

        let ids = inner.by_client.remove(client_id).unwrap_or_default();
        let removed: Vec<SubscriptionKind> = ids
            .iter()
            .filter_map(|id| inner.subscriptions.remove(id))
            .map(|sub| sub.kind)
            .collect();
        drop(inner);

        for kind in &removed {
            WS_ACTIVE_SUBSCRIPTIONS.with_label_values(&[kind.as_str()]).dec();
            WS_SUBSCRIPTIONS_REMOVED.with_label_values(&[kind.as_str()]).inc();
        }

        if !removed.is_empty() {
            info!("Removed {} subscriptions for client {}", removed.len(), client_id);
        }
        removed.len()
    }

    /// Snapshot of every subscription of `kind`
    pub async fn subscriptions_by_kind(&self, kind: SubscriptionKind) -> Vec<Arc<Subscription>> {
        self.inner
            .read()
            .await
            .subscriptions
            .values()
            .filter(|sub| sub.kind == kind)
            .cloned()
            .collect()
    }

    /// Snapshot of the ids owned by `client_id`, in creation order
    pub async fn client_subscriptions(&self, client_id: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .by_client
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn count_by_kind(&self, kind: SubscriptionKind) -> usize {
        self.inner
            .read()
            .await
            .subscriptions
            .values()
            .filter(|sub| sub.kind == kind)
            .count()
    }

    pub async fn has_subscribers(&self, kind: SubscriptionKind) -> bool {
        self.inner
            .read()
            .await
            .subscriptions
            .values()
            .any(|sub| sub.kind == kind)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.subscriptions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
