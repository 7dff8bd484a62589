//! Capability traits for the external collaborators.
//!
//! The engine consumes these contracts, it does not implement transport or
//! storage details. Each collaborator is injected at construction with an
//! explicit lifecycle — no module-level singletons.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    Notification, NotificationType, PushPayload, PushSubscription, Task, User, Workflow,
};

/// Logical live-channel topics. Transport-agnostic: the hub decides what a
/// topic key maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-user private topic.
    User(String),
    /// Per-task topic.
    Task(String),
    /// Shared admin topic.
    Admins,
}

impl Topic {
    pub fn key(&self) -> String {
        match self {
            Topic::User(id) => format!("user:{id}"),
            Topic::Task(id) => format!("task:{id}"),
            Topic::Admins => "admins".to_string(),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Durable storage for tasks, workflows, notifications, and push
/// subscriptions. Supports the indexed queries the scans and the dedup
/// window need, plus an atomic conditional update for tasks.
#[async_trait]
pub trait Store: Send + Sync {
    // ─── Tasks ────────────────────────────────────────────
    async fn create_task(&self, task: &Task) -> Result<()>;
    async fn task(&self, id: &str) -> Result<Option<Task>>;
    /// Version-checked write: fails with `ConcurrentModification` when the
    /// stored version no longer matches `task.version`. Returns the stored
    /// record with its version bumped.
    async fn update_task(&self, task: &Task) -> Result<Task>;
    async fn delete_task(&self, id: &str) -> Result<()>;
    /// Tasks with a deadline before `now`, excluding done/late.
    async fn overdue_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;
    /// Tasks with a deadline inside `[from, until]`, excluding done/late.
    async fn tasks_due_within(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Task>>;

    // ─── Workflows ────────────────────────────────────────
    async fn create_workflow(&self, workflow: &Workflow) -> Result<()>;
    async fn workflow(&self, id: &str) -> Result<Option<Workflow>>;

    // ─── Notifications ────────────────────────────────────
    async fn create_notification(&self, notification: &Notification) -> Result<()>;
    async fn update_notification(&self, notification: &Notification) -> Result<()>;
    async fn notifications_for(&self, user_id: &str, unread_only: bool)
        -> Result<Vec<Notification>>;
    async fn mark_read(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64>;
    /// Dedup lookup for the detection scans: does a notification of this
    /// (user, kind, task) tuple exist at or after `since`?
    async fn notification_exists_since(
        &self,
        user_id: &str,
        kind: NotificationType,
        task_id: &str,
        since: DateTime<Utc>,
    ) -> Result<bool>;

    // ─── Push subscriptions ───────────────────────────────
    async fn upsert_push_subscription(&self, subscription: &PushSubscription) -> Result<()>;
    async fn active_push_subscriptions(&self, user_id: &str) -> Result<Vec<PushSubscription>>;
    /// Soft delete: the endpoint stays on record but is skipped from now on.
    async fn deactivate_push_subscription(&self, endpoint: &str) -> Result<()>;

    // ─── Users ────────────────────────────────────────────
    async fn upsert_user(&self, user: &User) -> Result<()>;
    async fn users_with_role(&self, role: &str) -> Result<Vec<String>>;
}

/// Real-time connection multiplexer. Publishing to a topic nobody is
/// subscribed to is a no-op, not an error — offline is a normal state.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    async fn publish(&self, topic: &Topic, event: &str, payload: &serde_json::Value)
        -> Result<()>;
    fn is_user_connected(&self, user_id: &str) -> bool;
    async fn shutdown(&self);
}

/// Outcome of a single push delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The push service no longer knows this endpoint (404/410).
    Gone,
    Failed(String),
}

/// Store-and-forward push transport to browser-registered endpoints.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, payload: &PushPayload) -> PushOutcome;
}
