//! Internal event bus — the boundary between task mutation and delivery.
//!
//! Services emit plain data events; the dispatcher resolves targeting and
//! hands payloads to the fan-out engine. Neither side holds a reference to
//! the other, which keeps the fan-out engine, the live channel, and the
//! task services free of circular construction.

use std::sync::Arc;

use tokio::sync::mpsc;

use taskloom_core::error::Result;
use taskloom_core::traits::{LiveChannel, Store, Topic};
use taskloom_core::types::ROLE_ADMIN;

use crate::fanout::FanoutEngine;
use crate::router::{route, DomainEvent};

/// Cloneable sending half of the bus.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventBus {
    /// Create a bus and its receiving half for the dispatcher.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget: emitting never fails the caller's operation.
    pub fn emit(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("event bus closed, dropping event");
        }
    }
}

/// Drain the bus until every sender is dropped. Each event is handled in
/// isolation: a failed fan-out is logged and never aborts the loop — the
/// task mutation that produced the event has already succeeded.
pub async fn spawn_dispatcher(
    mut rx: mpsc::UnboundedReceiver<DomainEvent>,
    store: Arc<dyn Store>,
    live: Arc<dyn LiveChannel>,
    fanout: Arc<FanoutEngine>,
) {
    tracing::info!("event dispatcher started");
    while let Some(event) = rx.recv().await {
        if let Err(e) = dispatch_event(&event, store.as_ref(), live.as_ref(), &fanout).await {
            tracing::warn!("event '{}' dispatch failed: {e}", event.name());
        }
    }
    tracing::info!("event dispatcher stopped (bus closed)");
}

async fn dispatch_event(
    event: &DomainEvent,
    store: &dyn Store,
    live: &dyn LiveChannel,
    fanout: &FanoutEngine,
) -> Result<()> {
    let admins = if event.needs_admins() {
        store.users_with_role(ROLE_ADMIN).await?
    } else {
        Vec::new()
    };
    let payloads = route(event, &admins);

    // Mirror the occurrence onto the shared topics. Nobody listening is a
    // normal state, not an error.
    let context = event.context();
    let task_topic = Topic::Task(event.task().id.clone());
    if let Err(e) = live.publish(&task_topic, event.name(), &context).await {
        tracing::debug!("task topic publish skipped: {e}");
    }
    if event.needs_admins() {
        if let Err(e) = live.publish(&Topic::Admins, event.name(), &context).await {
            tracing::debug!("admin topic publish skipped: {e}");
        }
    }

    for result in fanout.deliver_all(&payloads).await {
        if let Err(e) = result {
            tracing::warn!("notification delivery failed: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{StubLive, StubPush};
    use taskloom_core::config::PushConfig;
    use taskloom_core::types::{Task, TaskStatus, User};
    use taskloom_store::MemoryStore;

    #[tokio::test]
    async fn test_request_event_reaches_admins() {
        let store = Arc::new(MemoryStore::new());
        let live = Arc::new(StubLive::new());
        let push = Arc::new(StubPush::new());
        store.upsert_user(&User::new("root", "admin")).await.unwrap();
        store.upsert_user(&User::new("bob", "member")).await.unwrap();

        let fanout = Arc::new(FanoutEngine::new(
            store.clone(),
            live.clone(),
            push,
            &PushConfig::default(),
        ));
        let (bus, rx) = EventBus::channel();
        let handle = tokio::spawn(spawn_dispatcher(
            rx,
            store.clone(),
            live.clone(),
            fanout,
        ));

        let mut task = Task::new("Ship it", "carol");
        task.status = TaskStatus::PendingApproval;
        task.requesters = vec!["bob".into()];
        bus.emit(DomainEvent::AssignmentRequested {
            task: task.clone(),
            requester: "bob".into(),
        });
        drop(bus);
        handle.await.unwrap();

        let admin_inbox = store.notifications_for("root", false).await.unwrap();
        assert_eq!(admin_inbox.len(), 1);
        assert_eq!(admin_inbox[0].kind.as_str(), "task_request");

        // The occurrence was mirrored on the task topic and the admin topic.
        let topics: Vec<String> = live.published().into_iter().map(|(t, _)| t).collect();
        assert!(topics.contains(&format!("task:{}", task.id)));
        assert!(topics.contains(&"admins".to_string()));
    }

    #[tokio::test]
    async fn test_dispatcher_keeps_draining_after_empty_events() {
        // An event that targets nobody produces zero payloads; the loop
        // keeps going and later events still deliver.
        let store = Arc::new(MemoryStore::new());
        let live = Arc::new(StubLive::new());
        let fanout = Arc::new(FanoutEngine::new(
            store.clone(),
            live.clone(),
            Arc::new(StubPush::new()),
            &PushConfig::default(),
        ));
        let (bus, rx) = EventBus::channel();
        let handle = tokio::spawn(spawn_dispatcher(rx, store.clone(), live.clone(), fanout));

        let task = Task::new("Ship it", "carol");
        // carol adding herself targets nobody.
        bus.emit(DomainEvent::ParticipantAdded {
            task: task.clone(),
            user: "carol".into(),
            actor: taskloom_core::types::Actor::new("carol", "member"),
        });
        bus.emit(DomainEvent::Overdue { task: task.clone() });
        drop(bus);
        handle.await.unwrap();

        let inbox = store.notifications_for("carol", false).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind.as_str(), "task_overdue");
    }
}
