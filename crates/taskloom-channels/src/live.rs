//! Live hub — in-process topic multiplexer for connected clients.
//!
//! One broadcast channel per topic. The transport that feeds sockets from
//! these streams is someone else's problem: the engine only knows
//! "publish to topic X" and "is this user connected". Publishing to a
//! topic nobody subscribes to is a no-op.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use async_trait::async_trait;
use taskloom_core::error::Result;
use taskloom_core::traits::{LiveChannel, Topic};

/// An event as seen by a topic subscriber.
#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub event: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Per-topic broadcast capacity. A slow subscriber that lags this far
/// behind starts losing events — live delivery is best-effort by contract.
const TOPIC_CAPACITY: usize = 64;

pub struct LiveHub {
    topics: RwLock<HashMap<String, broadcast::Sender<LiveEvent>>>,
    /// Connection counts per user; a user with several tabs disconnects
    /// only when the last one goes.
    connected: RwLock<HashMap<String, usize>>,
}

impl LiveHub {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            connected: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic, creating it on first use.
    pub fn subscribe(&self, topic: &Topic) -> BroadcastStream<LiveEvent> {
        let mut topics = self.topics.write().unwrap();
        let tx = topics
            .entry(topic.key())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        BroadcastStream::new(tx.subscribe())
    }

    /// Register a new connection for a user.
    pub fn user_connected(&self, user_id: &str) {
        let mut connected = self.connected.write().unwrap();
        *connected.entry(user_id.to_string()).or_insert(0) += 1;
        tracing::debug!("live: {user_id} connected");
    }

    /// Drop one connection for a user.
    pub fn user_disconnected(&self, user_id: &str) {
        let mut connected = self.connected.write().unwrap();
        if let Some(count) = connected.get_mut(user_id) {
            *count -= 1;
            if *count == 0 {
                connected.remove(user_id);
                tracing::debug!("live: {user_id} disconnected");
            }
        }
    }

    /// Number of currently connected users.
    pub fn connected_users(&self) -> usize {
        self.connected.read().unwrap().len()
    }
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveChannel for LiveHub {
    async fn publish(
        &self,
        topic: &Topic,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let topics = self.topics.read().unwrap();
        if let Some(tx) = topics.get(&topic.key()) {
            // A send error only means nobody is listening right now.
            let _ = tx.send(LiveEvent {
                event: event.to_string(),
                payload: payload.clone(),
                at: Utc::now(),
            });
        }
        Ok(())
    }

    fn is_user_connected(&self, user_id: &str) -> bool {
        self.connected.read().unwrap().contains_key(user_id)
    }

    async fn shutdown(&self) {
        self.topics.write().unwrap().clear();
        self.connected.write().unwrap().clear();
        tracing::info!("live hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let hub = LiveHub::new();
        let topic = Topic::User("u1".into());
        let mut stream = hub.subscribe(&topic);

        hub.publish(&topic, "task_assigned", &serde_json::json!({"taskId": "t1"}))
            .await
            .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.event, "task_assigned");
        assert_eq!(event.payload["taskId"], serde_json::json!("t1"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let hub = LiveHub::new();
        hub.publish(&Topic::Admins, "task_request", &serde_json::json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_counting() {
        let hub = LiveHub::new();
        assert!(!hub.is_user_connected("u1"));

        // Two tabs: still connected after closing one.
        hub.user_connected("u1");
        hub.user_connected("u1");
        assert!(hub.is_user_connected("u1"));
        hub.user_disconnected("u1");
        assert!(hub.is_user_connected("u1"));
        hub.user_disconnected("u1");
        assert!(!hub.is_user_connected("u1"));
    }

    #[tokio::test]
    async fn test_shutdown_clears_state() {
        let hub = LiveHub::new();
        hub.user_connected("u1");
        hub.subscribe(&Topic::Task("t1".into()));
        hub.shutdown().await;
        assert!(!hub.is_user_connected("u1"));
        assert_eq!(hub.connected_users(), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = LiveHub::new();
        let mut t1 = hub.subscribe(&Topic::Task("t1".into()));
        let mut t2 = hub.subscribe(&Topic::Task("t2".into()));

        hub.publish(&Topic::Task("t1".into()), "comment_added", &serde_json::json!({}))
            .await
            .unwrap();

        assert!(t1.next().await.is_some());
        // t2 must not see t1's event.
        let nothing = tokio::time::timeout(std::time::Duration::from_millis(20), t2.next()).await;
        assert!(nothing.is_err());
    }
}
