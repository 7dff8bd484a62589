//! Assignment FSM — the request → approve/reject → assign lifecycle.
//!
//! Per candidate user the states are `unrequested → requested →
//! {approved | rejected}`. The pure `apply_*` functions encode the rules;
//! [`AssignmentFsm`] wraps them in a store-backed read-modify-write that
//! retries version conflicts a bounded number of times before surfacing
//! `ConcurrentModification` to the caller.

use std::sync::Arc;

use taskloom_core::error::{LoomError, Result};
use taskloom_core::traits::Store;
use taskloom_core::types::{Actor, Task, TaskStatus};

use crate::bus::EventBus;
use crate::router::DomainEvent;

/// Append a user to the requesters and park the task for approval.
pub fn apply_request(task: &mut Task, user: &str) -> Result<()> {
    if task.has_requested(user) || task.assignee.as_deref() == Some(user) {
        return Err(LoomError::AlreadyRequested {
            user: user.to_string(),
        });
    }
    task.requesters.push(user.to_string());
    task.status = TaskStatus::PendingApproval;
    Ok(())
}

/// Approve one requester: they become the assignee, every other pending
/// requester is cleared. Returns the cleared requesters so the caller can
/// tell them.
pub fn apply_approval(task: &mut Task, requester: &str) -> Result<Vec<String>> {
    if !task.has_requested(requester) {
        return Err(LoomError::NotRequested {
            user: requester.to_string(),
        });
    }
    let cleared: Vec<String> = task
        .requesters
        .iter()
        .filter(|u| u.as_str() != requester)
        .cloned()
        .collect();
    task.requesters.clear();
    task.assignee = Some(requester.to_string());
    task.status = TaskStatus::InProgress;
    Ok(cleared)
}

/// Reject one requester. When nobody is left waiting the task reverts to
/// `todo`, otherwise it stays parked.
pub fn apply_rejection(task: &mut Task, requester: &str) -> Result<()> {
    if !task.has_requested(requester) {
        return Err(LoomError::NotRequested {
            user: requester.to_string(),
        });
    }
    task.requesters.retain(|u| u != requester);
    if task.requesters.is_empty() {
        task.status = TaskStatus::Todo;
    }
    Ok(())
}

/// Store-backed assignment operations with conflict retry and event
/// emission.
pub struct AssignmentFsm {
    store: Arc<dyn Store>,
    bus: EventBus,
    max_retries: u32,
}

impl AssignmentFsm {
    pub fn new(store: Arc<dyn Store>, bus: EventBus, max_retries: u32) -> Self {
        Self {
            store,
            bus,
            max_retries,
        }
    }

    /// A user asks to be assigned. Admins are notified through the bus.
    pub async fn request_assignment(&self, task_id: &str, requester: &str) -> Result<Task> {
        let task = self
            .mutate(task_id, |task| apply_request(task, requester))
            .await?;
        self.bus.emit(DomainEvent::AssignmentRequested {
            task: task.clone(),
            requester: requester.to_string(),
        });
        Ok(task)
    }

    /// An approver accepts one requester; all other pending requesters are
    /// cleared and each of them is told their request was declined.
    pub async fn approve(&self, task_id: &str, approver: &Actor, requester: &str) -> Result<Task> {
        let mut cleared = Vec::new();
        let task = self
            .mutate(task_id, |task| {
                cleared = apply_approval(task, requester)?;
                Ok(())
            })
            .await?;
        tracing::info!(
            "task {} assigned to {} by {}",
            task.id,
            requester,
            approver.user_id
        );
        self.bus.emit(DomainEvent::Assigned {
            task: task.clone(),
            actor: approver.clone(),
            assignee: requester.to_string(),
        });
        self.bus.emit(DomainEvent::RequestResolved {
            task: task.clone(),
            requester: requester.to_string(),
            approved: true,
            actor: approver.clone(),
        });
        for other in cleared {
            self.bus.emit(DomainEvent::RequestResolved {
                task: task.clone(),
                requester: other,
                approved: false,
                actor: approver.clone(),
            });
        }
        Ok(task)
    }

    /// Decline one requester.
    pub async fn reject(&self, task_id: &str, actor: &Actor, requester: &str) -> Result<Task> {
        let task = self
            .mutate(task_id, |task| apply_rejection(task, requester))
            .await?;
        self.bus.emit(DomainEvent::RequestResolved {
            task: task.clone(),
            requester: requester.to_string(),
            approved: false,
            actor: actor.clone(),
        });
        Ok(task)
    }

    /// Read-modify-write under the store's version check. Client errors
    /// from `apply` return immediately; version conflicts retry with a
    /// fresh read until the budget runs out.
    async fn mutate<F>(&self, task_id: &str, mut apply: F) -> Result<Task>
    where
        F: FnMut(&mut Task) -> Result<()>,
    {
        for attempt in 0..=self.max_retries {
            let mut task = self
                .store
                .task(task_id)
                .await?
                .ok_or_else(|| LoomError::NotFound {
                    kind: "task",
                    id: task_id.to_string(),
                })?;
            apply(&mut task)?;
            task.touch();
            match self.store.update_task(&task).await {
                Ok(updated) => return Ok(updated),
                Err(LoomError::ConcurrentModification) => {
                    tracing::debug!(
                        "task {task_id} changed underneath us (attempt {attempt}), retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(LoomError::ConcurrentModification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use taskloom_core::types::{
        Notification, NotificationType, PushSubscription, User, Workflow,
    };
    use taskloom_store::MemoryStore;

    fn fsm_with(store: Arc<dyn Store>) -> (AssignmentFsm, tokio::sync::mpsc::UnboundedReceiver<DomainEvent>) {
        let (bus, rx) = EventBus::channel();
        (AssignmentFsm::new(store, bus, 3), rx)
    }

    async fn seed_task(store: &dyn Store) -> Task {
        let task = Task::new("Ship it", "carol");
        store.create_task(&task).await.unwrap();
        task
    }

    #[test]
    fn test_request_is_not_repeatable() {
        let mut task = Task::new("Ship it", "carol");
        apply_request(&mut task, "u2").unwrap();
        let err = apply_request(&mut task, "u2").unwrap_err();
        assert!(matches!(err, LoomError::AlreadyRequested { .. }));
        assert_eq!(task.requesters, vec!["u2"]);
        assert_eq!(task.status, TaskStatus::PendingApproval);
    }

    #[test]
    fn test_approval_clears_other_requesters() {
        let mut task = Task::new("Ship it", "carol");
        apply_request(&mut task, "u2").unwrap();
        apply_request(&mut task, "u3").unwrap();
        let cleared = apply_approval(&mut task, "u2").unwrap();
        assert_eq!(task.assignee.as_deref(), Some("u2"));
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.requesters.is_empty());
        assert_eq!(cleared, vec!["u3"]);
    }

    #[test]
    fn test_reject_after_approval_fails() {
        let mut task = Task::new("Ship it", "carol");
        apply_request(&mut task, "u2").unwrap();
        apply_approval(&mut task, "u2").unwrap();
        let err = apply_rejection(&mut task, "u2").unwrap_err();
        assert!(matches!(err, LoomError::NotRequested { .. }));
    }

    #[test]
    fn test_reject_reverts_to_todo_when_queue_empties() {
        let mut task = Task::new("Ship it", "carol");
        apply_request(&mut task, "u2").unwrap();
        apply_request(&mut task, "u3").unwrap();
        apply_rejection(&mut task, "u2").unwrap();
        assert_eq!(task.status, TaskStatus::PendingApproval);
        apply_rejection(&mut task, "u3").unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn test_concurrent_requests_then_approval() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let (fsm, mut rx) = fsm_with(store.clone());
        let task = seed_task(store.as_ref()).await;

        fsm.request_assignment(&task.id, "u2").await.unwrap();
        fsm.request_assignment(&task.id, "u3").await.unwrap();
        let approved = fsm
            .approve(&task.id, &Actor::new("a", "admin"), "u2")
            .await
            .unwrap();

        assert_eq!(approved.assignee.as_deref(), Some("u2"));
        assert_eq!(approved.status, TaskStatus::InProgress);
        assert!(approved.requesters.is_empty());

        // Events: two requests, one assignment, approved + declined responses.
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "task_request",
                "task_request",
                "task_assigned",
                "task_request_response",
                "task_request_response",
            ]
        );
    }

    #[tokio::test]
    async fn test_mutation_reads_fresh_state() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let (fsm, _rx) = fsm_with(store.clone());
        let task = seed_task(store.as_ref()).await;

        // Another writer lands a change first; the FSM operates on the
        // current version and preserves it.
        let mut shadow = store.task(&task.id).await.unwrap().unwrap();
        shadow.watchers.push("bob".into());
        store.update_task(&shadow).await.unwrap();

        let updated = fsm.request_assignment(&task.id, "u2").await.unwrap();
        assert!(updated.has_requested("u2"));
        assert!(updated.watchers.contains(&"bob".to_string()));
    }

    /// Store stub whose task updates always conflict.
    struct ContendedStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl Store for ContendedStore {
        async fn create_task(&self, task: &Task) -> Result<()> {
            self.inner.create_task(task).await
        }
        async fn task(&self, id: &str) -> Result<Option<Task>> {
            self.inner.task(id).await
        }
        async fn update_task(&self, _task: &Task) -> Result<Task> {
            Err(LoomError::ConcurrentModification)
        }
        async fn delete_task(&self, id: &str) -> Result<()> {
            self.inner.delete_task(id).await
        }
        async fn overdue_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
            self.inner.overdue_tasks(now).await
        }
        async fn tasks_due_within(
            &self,
            from: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<Task>> {
            self.inner.tasks_due_within(from, until).await
        }
        async fn create_workflow(&self, workflow: &Workflow) -> Result<()> {
            self.inner.create_workflow(workflow).await
        }
        async fn workflow(&self, id: &str) -> Result<Option<Workflow>> {
            self.inner.workflow(id).await
        }
        async fn create_notification(&self, notification: &Notification) -> Result<()> {
            self.inner.create_notification(notification).await
        }
        async fn update_notification(&self, notification: &Notification) -> Result<()> {
            self.inner.update_notification(notification).await
        }
        async fn notifications_for(
            &self,
            user_id: &str,
            unread_only: bool,
        ) -> Result<Vec<Notification>> {
            self.inner.notifications_for(user_id, unread_only).await
        }
        async fn mark_read(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
            self.inner.mark_read(id, at).await
        }
        async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64> {
            self.inner.mark_all_read(user_id, at).await
        }
        async fn notification_exists_since(
            &self,
            user_id: &str,
            kind: NotificationType,
            task_id: &str,
            since: DateTime<Utc>,
        ) -> Result<bool> {
            self.inner
                .notification_exists_since(user_id, kind, task_id, since)
                .await
        }
        async fn upsert_push_subscription(&self, subscription: &PushSubscription) -> Result<()> {
            self.inner.upsert_push_subscription(subscription).await
        }
        async fn active_push_subscriptions(
            &self,
            user_id: &str,
        ) -> Result<Vec<PushSubscription>> {
            self.inner.active_push_subscriptions(user_id).await
        }
        async fn deactivate_push_subscription(&self, endpoint: &str) -> Result<()> {
            self.inner.deactivate_push_subscription(endpoint).await
        }
        async fn upsert_user(&self, user: &User) -> Result<()> {
            self.inner.upsert_user(user).await
        }
        async fn users_with_role(&self, role: &str) -> Result<Vec<String>> {
            self.inner.users_with_role(role).await
        }
    }

    #[tokio::test]
    async fn test_unresolvable_conflict_surfaces() {
        let store: Arc<dyn Store> = Arc::new(ContendedStore {
            inner: MemoryStore::new(),
        });
        let (fsm, _rx) = fsm_with(store.clone());
        let task = seed_task(store.as_ref()).await;

        let err = fsm.request_assignment(&task.id, "u2").await.unwrap_err();
        assert!(matches!(err, LoomError::ConcurrentModification));
    }
}
