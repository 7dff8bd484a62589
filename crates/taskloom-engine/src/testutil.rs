//! In-memory channel stubs shared by the engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use taskloom_core::error::Result;
use taskloom_core::traits::{LiveChannel, PushChannel, PushOutcome, Topic};
use taskloom_core::types::{PushPayload, PushSubscription};

/// Records publishes and tracks connected users.
pub struct StubLive {
    connected: Mutex<HashSet<String>>,
    published: Mutex<Vec<(String, String)>>,
}

impl StubLive {
    pub fn new() -> Self {
        Self {
            connected: Mutex::new(HashSet::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn connect(&self, user_id: &str) {
        self.connected.lock().unwrap().insert(user_id.to_string());
    }

    /// (topic key, event name) pairs, in publish order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl LiveChannel for StubLive {
    async fn publish(
        &self,
        topic: &Topic,
        event: &str,
        _payload: &serde_json::Value,
    ) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.key(), event.to_string()));
        Ok(())
    }

    fn is_user_connected(&self, user_id: &str) -> bool {
        self.connected.lock().unwrap().contains(user_id)
    }

    async fn shutdown(&self) {
        self.connected.lock().unwrap().clear();
    }
}

/// Scriptable push channel: endpoints default to `Delivered` unless an
/// outcome is configured.
pub struct StubPush {
    outcomes: Mutex<HashMap<String, PushOutcome>>,
    sent: Mutex<Vec<String>>,
}

impl StubPush {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_with_gone(&self, endpoint: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), PushOutcome::Gone);
    }

    /// Endpoints attempted, sorted for deterministic assertions.
    pub fn sent_endpoints(&self) -> Vec<String> {
        let mut sent = self.sent.lock().unwrap().clone();
        sent.sort();
        sent
    }
}

#[async_trait]
impl PushChannel for StubPush {
    async fn send(&self, subscription: &PushSubscription, _payload: &PushPayload) -> PushOutcome {
        self.sent
            .lock()
            .unwrap()
            .push(subscription.endpoint.clone());
        self.outcomes
            .lock()
            .unwrap()
            .get(&subscription.endpoint)
            .cloned()
            .unwrap_or(PushOutcome::Delivered)
    }
}
