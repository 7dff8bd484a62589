//! In-memory store — zero setup, used by tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use taskloom_core::error::{LoomError, Result};
use taskloom_core::traits::Store;
use taskloom_core::types::{
    Notification, NotificationType, PushSubscription, Task, User, Workflow,
};

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    workflows: HashMap<String, Workflow>,
    notifications: HashMap<String, Notification>,
    /// Keyed by endpoint — unique per registration.
    subscriptions: HashMap<String, PushSubscription>,
    users: HashMap<String, User>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn task(&self, id: &str) -> Result<Option<Task>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.tasks.get(id).cloned())
    }

    async fn update_task(&self, task: &Task) -> Result<Task> {
        let mut inner = self.inner.write().unwrap();
        let existing = inner.tasks.get(&task.id).ok_or_else(|| LoomError::NotFound {
            kind: "task",
            id: task.id.clone(),
        })?;
        if existing.version != task.version {
            return Err(LoomError::ConcurrentModification);
        }
        let mut stored = task.clone();
        stored.version += 1;
        inner.tasks.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.tasks.remove(id);
        Ok(())
    }

    async fn overdue_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let inner = self.inner.read().unwrap();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| !t.status.is_closed() && t.deadline.is_some_and(|d| d < now))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.deadline);
        Ok(tasks)
    }

    async fn tasks_due_within(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let inner = self.inner.read().unwrap();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| {
                !t.status.is_closed() && t.deadline.is_some_and(|d| d >= from && d <= until)
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.deadline);
        Ok(tasks)
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<()> {
        workflow.validate()?;
        let mut inner = self.inner.write().unwrap();
        inner.workflows.insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.workflows.get(id).cloned())
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn update_notification(&self, notification: &Notification) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.notifications.contains_key(&notification.id) {
            return Err(LoomError::NotFound {
                kind: "notification",
                id: notification.id.clone(),
            });
        }
        inner
            .notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn notifications_for(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let inner = self.inner.read().unwrap();
        let mut notifications: Vec<Notification> = inner
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.read))
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn mark_read(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let notification = inner
            .notifications
            .get_mut(id)
            .ok_or_else(|| LoomError::NotFound {
                kind: "notification",
                id: id.to_string(),
            })?;
        notification.read = true;
        notification.read_at = Some(at);
        Ok(())
    }

    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();
        let mut count = 0;
        for notification in inner.notifications.values_mut() {
            if notification.user_id == user_id && !notification.read {
                notification.read = true;
                notification.read_at = Some(at);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn notification_exists_since(
        &self,
        user_id: &str,
        kind: NotificationType,
        task_id: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner.notifications.values().any(|n| {
            n.user_id == user_id
                && n.kind == kind
                && n.task_id.as_deref() == Some(task_id)
                && n.created_at >= since
        }))
    }

    async fn upsert_push_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .subscriptions
            .insert(subscription.endpoint.clone(), subscription.clone());
        Ok(())
    }

    async fn active_push_subscriptions(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        let inner = self.inner.read().unwrap();
        let mut subscriptions: Vec<PushSubscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        Ok(subscriptions)
    }

    async fn deactivate_push_subscription(&self, endpoint: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(subscription) = inner.subscriptions.get_mut(endpoint) {
            subscription.is_active = false;
        }
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn users_with_role(&self, role: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap();
        let mut users: Vec<String> = inner
            .users
            .values()
            .filter(|u| u.role == role)
            .map(|u| u.id.clone())
            .collect();
        users.sort();
        Ok(users)
    }
}
