//! One connected WebSocket client.

use chrono::{DateTime, Utc};
use hlgate_common::utils::metrics::{WS_MESSAGES_DROPPED, WS_MESSAGES_SENT};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Connection metadata plus the sending half of the outbound queue.
///
/// The network writer owns the receiving half. Closing the session drops
/// the sender, which ends the writer once the queue is drained.
pub struct ClientSession {
    id: String,
    remote_addr: String,
    user_agent: String,
    connected_at: DateTime<Utc>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

/// Point-in-time copy of a session for observability
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub ip: String,
    pub user_agent: String,
    pub connected_at: String,
    pub subscriptions: Vec<String>,
    pub messages_sent: u64,
    pub messages_received: u64,
}

impl ClientSession {
    /// Create a session with an outbound queue of `capacity` messages
    pub fn new(
        remote_addr: impl Into<String>,
        user_agent: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            id: Uuid::new_v4().to_string(),
            remote_addr: remote_addr.into(),
            user_agent: user_agent.into(),
            connected_at: Utc::now(),
            outbound: Mutex::new(Some(tx)),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        };
        (Arc::new(session), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        // the guarded value is a plain Option, a poisoned lock is still usable
        self.outbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a message without waiting.
    ///
    /// Returns false when the queue is full or closed; the message is dropped.
    pub fn try_enqueue(&self, message: String) -> bool {
        let outbound = self.outbound();
        let Some(tx) = outbound.as_ref() else {
            return false;
        };

        match tx.try_send(message) {
            Ok(()) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                WS_MESSAGES_SENT.inc();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                WS_MESSAGES_DROPPED.inc();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Close the outbound queue. Already queued messages are still delivered.
    pub fn close(&self) {
        self.outbound().take();
    }

    pub fn is_closed(&self) -> bool {
        self.outbound().as_ref().map_or(true, |tx| tx.is_closed())
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn info(&self, subscriptions: Vec<String>) -> ClientInfo {
        ClientInfo {
            id: self.id.clone(),
            ip: self.remote_addr.clone(),
            user_agent: self.user_agent.clone(),
            connected_at: self.connected_at.to_rfc3339(),
            subscriptions,
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_delivery() {
        let (session, mut rx) = ClientSession::new("127.0.0.1", "test", 8);

        assert!(session.try_enqueue("one".to_string()));
        assert!(session.try_enqueue("two".to_string()));

        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
        assert_eq!(session.messages_sent(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (session, mut rx) = ClientSession::new("127.0.0.1", "test", 2);

        assert!(session.try_enqueue("a".to_string()));
        assert!(session.try_enqueue("b".to_string()));
        assert!(!session.try_enqueue("c".to_string()));
        assert_eq!(session.messages_sent(), 2);

        assert_eq!(rx.recv().await.unwrap(), "a");
        assert!(session.try_enqueue("d".to_string()));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (session, mut rx) = ClientSession::new("127.0.0.1", "test", 4);
        session.try_enqueue("last".to_string());
        session.close();

        assert!(session.is_closed());
        assert!(!session.try_enqueue("late".to_string()));
        assert_eq!(rx.recv().await.unwrap(), "last");
        assert!(rx.recv().await.is_none());

        // closing twice is harmless
        session.close();
    }

    #[tokio::test]
    async fn test_info_snapshot() {
        let (session, _rx) = ClientSession::new("10.0.0.1", "agent/1.0", 4);
        session.record_received();
        session.record_received();

        let info = session.info(vec!["0xabc".to_string()]);
        assert_eq!(info.id, session.id());
        assert_eq!(info.ip, "10.0.0.1");
        assert_eq!(info.user_agent, "agent/1.0");
        assert_eq!(info.messages_received, 2);
        assert_eq!(info.subscriptions, vec!["0xabc".to_string()]);

        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("connectedAt").is_some());
        assert!(value.get("messagesReceived").is_some());
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = ClientSession::new("", "", 1);
        let (b, _rb) = ClientSession::new("", "", 1);
        assert_ne!(a.id(), b.id());
    }
}
