//! Transport abstraction for the pub/sub channel.
//!
//! The transport handles connection and delivery. It hands every inbound
//! payload to the [`Inbox`] given at join time; the engine drains that inbox
//! from its mutation context. Delivery may be at-least-once and reordered.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SyncError;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// One payload received on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the payload arrived on (uppercase hex content hash).
    pub topic: String,
    /// Encoded message.
    pub payload: Vec<u8>,
    /// Historical backlog delivered on join.
    pub replay: bool,
}

/// Where a transport delivers inbound payloads.
pub type Inbox = mpsc::Sender<Delivery>;

/// Pub/sub transport.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to `topic`, delivering its traffic into `inbox`.
    async fn join(&self, topic: &str, inbox: Inbox) -> Result<()>;

    /// Unsubscribe from `topic`.
    async fn leave(&self, topic: &str) -> Result<()>;

    /// Publish an encoded payload to `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// An in-memory broker for tests and single-process setups.
///
/// Keeps per-topic history and replays it to new subscribers, the way a
/// persistent channel backlog would.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct Topic {
        subscribers: HashMap<String, Inbox>,
        history: Vec<Vec<u8>>,
    }

    /// Shared state for a set of in-memory clients.
    ///
    /// Topic history is never trimmed: every payload published lives as
    /// long as the broker, so a broker is meant to last one session or test.
    #[derive(Default)]
    pub struct MemoryBroker {
        topics: RwLock<HashMap<String, Topic>>,
    }

    impl MemoryBroker {
        /// Create a new broker.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a client connected to this broker.
        pub fn connect(self: &Arc<Self>, client: impl Into<String>) -> MemoryTransport {
            MemoryTransport {
                client: client.into(),
                broker: Arc::clone(self),
                offline: AtomicBool::new(false),
            }
        }

        /// Number of payloads published on `topic`.
        pub async fn history_len(&self, topic: &str) -> usize {
            self.topics
                .read()
                .await
                .get(topic)
                .map(|t| t.history.len())
                .unwrap_or(0)
        }

        /// Number of clients subscribed to `topic`.
        pub async fn subscriber_count(&self, topic: &str) -> usize {
            self.topics
                .read()
                .await
                .get(topic)
                .map(|t| t.subscribers.len())
                .unwrap_or(0)
        }
    }

    /// One client of a [`MemoryBroker`].
    pub struct MemoryTransport {
        client: String,
        broker: Arc<MemoryBroker>,
        offline: AtomicBool,
    }

    impl MemoryTransport {
        /// Simulate losing (or regaining) the connection.
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn client(&self) -> &str {
            &self.client
        }

        fn check_online(&self) -> Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(SyncError::TransportError("not connected".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn join(&self, topic: &str, inbox: Inbox) -> Result<()> {
            self.check_online()?;

            let backlog = {
                let mut topics = self.broker.topics.write().await;
                let entry = topics.entry(topic.to_string()).or_default();
                entry.subscribers.insert(self.client.clone(), inbox.clone());
                entry.history.clone()
            };

            // The joiner is usually the inbox's only consumer, so the backlog
            // must not be pushed from inside its own call.
            let topic = topic.to_string();
            tokio::spawn(async move {
                for payload in backlog {
                    let delivery = Delivery {
                        topic: topic.clone(),
                        payload,
                        replay: true,
                    };
                    if inbox.send(delivery).await.is_err() {
                        break;
                    }
                }
            });
            Ok(())
        }

        async fn leave(&self, topic: &str) -> Result<()> {
            self.check_online()?;
            let mut topics = self.broker.topics.write().await;
            if let Some(entry) = topics.get_mut(topic) {
                entry.subscribers.remove(&self.client);
            }
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            self.check_online()?;

            let targets: Vec<Inbox> = {
                let mut topics = self.broker.topics.write().await;
                let entry = topics.entry(topic.to_string()).or_default();
                entry.history.push(payload.clone());
                entry
                    .subscribers
                    .iter()
                    .filter(|(client, _)| *client != &self.client)
                    .map(|(_, inbox)| inbox.clone())
                    .collect()
            };

            for inbox in targets {
                let delivery = Delivery {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    replay: false,
                };
                // Ignore errors (subscriber may have gone away)
                let _ = inbox.send(delivery).await;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBroker;
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_other_subscribers_only() {
        let broker = MemoryBroker::new();
        let a = broker.connect("a");
        let b = broker.connect("b");

        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        a.join("T", tx_a).await.unwrap();
        b.join("T", tx_b).await.unwrap();

        a.publish("T", b"hello".to_vec()).await.unwrap();

        let got = rx_b.recv().await.unwrap();
        assert_eq!(got.payload, b"hello");
        assert!(!got.replay);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_replays_backlog() {
        let broker = MemoryBroker::new();
        let a = broker.connect("a");
        a.publish("T", b"one".to_vec()).await.unwrap();
        a.publish("T", b"two".to_vec()).await.unwrap();

        let b = broker.connect("b");
        let (tx, mut rx) = mpsc::channel(16);
        b.join("T", tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(second.payload, b"two");
        assert!(first.replay && second.replay);
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let broker = MemoryBroker::new();
        let a = broker.connect("a");
        let b = broker.connect("b");
        let (tx, mut rx) = mpsc::channel(16);
        b.join("T", tx).await.unwrap();
        b.leave("T").await.unwrap();

        a.publish("T", b"late".to_vec()).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.subscriber_count("T").await, 0);
    }

    #[tokio::test]
    async fn test_offline_client_fails() {
        let broker = MemoryBroker::new();
        let a = broker.connect("a");
        a.set_offline(true);
        assert!(a.publish("T", vec![]).await.is_err());
        let (tx, _rx) = mpsc::channel(1);
        assert!(a.join("T", tx).await.is_err());
        assert_eq!(broker.history_len("T").await, 0);
    }
}
