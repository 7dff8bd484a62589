//! Event Router — maps a domain occurrence to the set of users to notify.
//!
//! Pure targeting: no I/O, no channel access. Events that target admins
//! receive the admin user list as an argument; the dispatcher resolves it.
//! Every rule excludes the actor that caused the event (unless the rule
//! says otherwise) and never targets the same user twice per event.

use chrono::{DateTime, Utc};
use serde_json::json;

use taskloom_core::types::{
    Actor, NotificationPriority, NotificationType, Task, TaskStatus,
};

/// A domain occurrence worth telling someone about.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    TaskCreated {
        task: Task,
        actor: Actor,
    },
    TaskUpdated {
        task: Task,
        actor: Actor,
        changed: Vec<String>,
    },
    StatusChanged {
        task: Task,
        actor: Actor,
        from: TaskStatus,
        to: TaskStatus,
    },
    Assigned {
        task: Task,
        actor: Actor,
        assignee: String,
    },
    AssignmentRequested {
        task: Task,
        requester: String,
    },
    RequestResolved {
        task: Task,
        requester: String,
        approved: bool,
        actor: Actor,
    },
    CommentAdded {
        task: Task,
        comment_id: String,
        author: String,
        excerpt: String,
        mentions: Vec<String>,
        edited: bool,
    },
    CommentDeleted {
        task: Task,
        comment_id: String,
        author: String,
        actor: Actor,
        by_admin: bool,
    },
    ParticipantAdded {
        task: Task,
        user: String,
        actor: Actor,
    },
    ParticipantRemoved {
        task: Task,
        user: String,
        actor: Actor,
    },
    DeadlineChanged {
        task: Task,
        actor: Actor,
        old: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    },
    TaskDeleted {
        task: Task,
        actor: Actor,
    },
    DeadlineApproaching {
        task: Task,
    },
    Overdue {
        task: Task,
    },
}

impl DomainEvent {
    pub fn task(&self) -> &Task {
        match self {
            DomainEvent::TaskCreated { task, .. }
            | DomainEvent::TaskUpdated { task, .. }
            | DomainEvent::StatusChanged { task, .. }
            | DomainEvent::Assigned { task, .. }
            | DomainEvent::AssignmentRequested { task, .. }
            | DomainEvent::RequestResolved { task, .. }
            | DomainEvent::CommentAdded { task, .. }
            | DomainEvent::CommentDeleted { task, .. }
            | DomainEvent::ParticipantAdded { task, .. }
            | DomainEvent::ParticipantRemoved { task, .. }
            | DomainEvent::DeadlineChanged { task, .. }
            | DomainEvent::TaskDeleted { task, .. }
            | DomainEvent::DeadlineApproaching { task }
            | DomainEvent::Overdue { task } => task,
        }
    }

    /// Event name used on the live topics.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TaskCreated { .. } => "task_created",
            DomainEvent::TaskUpdated { .. } => "task_updated",
            DomainEvent::StatusChanged { .. } => "task_status_changed",
            DomainEvent::Assigned { .. } => "task_assigned",
            DomainEvent::AssignmentRequested { .. } => "task_request",
            DomainEvent::RequestResolved { .. } => "task_request_response",
            DomainEvent::CommentAdded { edited: false, .. } => "comment_added",
            DomainEvent::CommentAdded { edited: true, .. } => "comment_edited",
            DomainEvent::CommentDeleted { .. } => "comment_deleted",
            DomainEvent::ParticipantAdded { .. } => "participant_added",
            DomainEvent::ParticipantRemoved { .. } => "participant_removed",
            DomainEvent::DeadlineChanged { .. } => "deadline_changed",
            DomainEvent::TaskDeleted { .. } => "task_deleted",
            DomainEvent::DeadlineApproaching { .. } => "deadline_approaching",
            DomainEvent::Overdue { .. } => "task_overdue",
        }
    }

    /// Whether routing this event needs the admin user set.
    pub fn needs_admins(&self) -> bool {
        match self {
            DomainEvent::TaskCreated { task, .. } => task.status == TaskStatus::PendingApproval,
            DomainEvent::AssignmentRequested { .. } => true,
            _ => false,
        }
    }

    /// Event payload published on the task/admin topics: the task snapshot
    /// plus event-specific context.
    pub fn context(&self) -> serde_json::Value {
        let base = json!({ "task": self.task() });
        let extra = match self {
            DomainEvent::StatusChanged { from, to, actor, .. } => json!({
                "oldStatus": from.as_str(),
                "newStatus": to.as_str(),
                "actor": actor.user_id,
            }),
            DomainEvent::TaskUpdated { changed, actor, .. } => json!({
                "changed": changed,
                "actor": actor.user_id,
            }),
            DomainEvent::Assigned { assignee, actor, .. } => json!({
                "assignee": assignee,
                "actor": actor.user_id,
            }),
            DomainEvent::AssignmentRequested { requester, .. } => json!({
                "requester": requester,
            }),
            DomainEvent::RequestResolved {
                requester,
                approved,
                actor,
                ..
            } => json!({
                "requester": requester,
                "approved": approved,
                "actor": actor.user_id,
            }),
            DomainEvent::CommentAdded {
                comment_id,
                author,
                excerpt,
                ..
            } => json!({
                "commentId": comment_id,
                "author": author,
                "excerpt": excerpt,
            }),
            DomainEvent::CommentDeleted {
                comment_id,
                author,
                actor,
                ..
            } => json!({
                "commentId": comment_id,
                "author": author,
                "actor": actor.user_id,
            }),
            DomainEvent::ParticipantAdded { user, actor, .. }
            | DomainEvent::ParticipantRemoved { user, actor, .. } => json!({
                "user": user,
                "actor": actor.user_id,
            }),
            DomainEvent::DeadlineChanged { old, new, actor, .. } => json!({
                "oldDeadline": old.map(|d| d.to_rfc3339()),
                "newDeadline": new.map(|d| d.to_rfc3339()),
                "actor": actor.user_id,
            }),
            _ => json!({}),
        };
        merge(base, extra)
    }
}

/// One per-user notification to hand to the fan-out engine.
#[derive(Debug, Clone)]
pub struct NotificationPayload {
    pub user_id: String,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub task_id: Option<String>,
    pub data: serde_json::Value,
}

/// Compute the per-user payloads for an event.
pub fn route(event: &DomainEvent, admins: &[String]) -> Vec<NotificationPayload> {
    match event {
        DomainEvent::TaskCreated { task, actor } => {
            if task.status == TaskStatus::PendingApproval {
                // Created already awaiting approval: admins need to act.
                fan(
                    admins.iter().filter(|a| *a != &actor.user_id),
                    task,
                    NotificationType::TaskCreated,
                    "Task awaiting approval",
                    &format!("'{}' was created and needs approval", task.title),
                    NotificationPriority::High,
                    task_data(task),
                )
            } else {
                fan(
                    excluding(task.participants(), &actor.user_id).iter(),
                    task,
                    NotificationType::TaskCreated,
                    "New task",
                    &format!("{} created '{}'", actor.user_id, task.title),
                    NotificationPriority::Medium,
                    task_data(task),
                )
            }
        }

        DomainEvent::TaskUpdated { task, actor, changed } => fan(
            excluding(task.participants(), &actor.user_id).iter(),
            task,
            NotificationType::TaskUpdated,
            "Task updated",
            &format!("'{}' was updated by {}", task.title, actor.user_id),
            NotificationPriority::Low,
            merge(task_data(task), json!({ "changed": changed })),
        ),

        DomainEvent::StatusChanged { task, actor, from, to } => fan(
            excluding(task.participants(), &actor.user_id).iter(),
            task,
            NotificationType::TaskStatusChanged,
            "Status changed",
            &format!(
                "'{}' moved from {} to {}",
                task.title,
                from.as_str(),
                to.as_str()
            ),
            NotificationPriority::Medium,
            merge(
                task_data(task),
                json!({ "oldStatus": from.as_str(), "newStatus": to.as_str() }),
            ),
        ),

        DomainEvent::Assigned { task, assignee, .. } => fan(
            std::iter::once(assignee),
            task,
            NotificationType::TaskAssigned,
            "Task assigned to you",
            &format!("You are now the assignee of '{}'", task.title),
            NotificationPriority::Medium,
            task_data(task),
        ),

        DomainEvent::AssignmentRequested { task, requester } => fan(
            admins.iter().filter(|a| *a != requester),
            task,
            NotificationType::TaskRequest,
            "Assignment request",
            &format!("{} wants to work on '{}'", requester, task.title),
            NotificationPriority::High,
            merge(task_data(task), json!({ "requester": requester })),
        ),

        DomainEvent::RequestResolved {
            task,
            requester,
            approved,
            ..
        } => {
            let (title, message) = if *approved {
                (
                    "Assignment request approved",
                    format!("Your request to work on '{}' was approved", task.title),
                )
            } else {
                (
                    "Assignment request declined",
                    format!("Your request to work on '{}' was declined", task.title),
                )
            };
            fan(
                std::iter::once(requester),
                task,
                NotificationType::TaskRequestResponse,
                title,
                &message,
                NotificationPriority::Medium,
                merge(task_data(task), json!({ "approved": approved })),
            )
        }

        DomainEvent::CommentAdded {
            task,
            comment_id,
            author,
            excerpt,
            mentions,
            edited,
        } => {
            let kind = if *edited {
                NotificationType::CommentEdited
            } else {
                NotificationType::CommentAdded
            };
            let data = merge(
                task_data(task),
                json!({ "commentId": comment_id, "author": author }),
            );
            let mut payloads = Vec::new();
            // The author never hears about their own comment, and no user
            // is notified twice for the same comment event.
            let mut seen: Vec<String> = vec![author.clone()];
            for user in mentions {
                if seen.contains(user) {
                    continue;
                }
                seen.push(user.clone());
                payloads.push(payload(
                    user,
                    kind,
                    "You were mentioned",
                    &format!("{} mentioned you on '{}': {}", author, task.title, excerpt),
                    NotificationPriority::Medium,
                    task,
                    data.clone(),
                ));
            }
            for user in task.participants() {
                if seen.contains(&user) {
                    continue;
                }
                seen.push(user.clone());
                let title = if *edited { "Comment updated" } else { "New comment" };
                payloads.push(payload(
                    &user,
                    kind,
                    title,
                    &format!("{} commented on '{}': {}", author, task.title, excerpt),
                    NotificationPriority::Low,
                    task,
                    data.clone(),
                ));
            }
            payloads
        }

        DomainEvent::CommentDeleted {
            task,
            comment_id,
            author,
            actor,
            by_admin,
        } => {
            let data = merge(task_data(task), json!({ "commentId": comment_id }));
            let mut payloads = Vec::new();
            let mut seen: Vec<String> = vec![actor.user_id.clone()];
            if *by_admin && actor.user_id != *author {
                seen.push(author.clone());
                payloads.push(payload(
                    author,
                    NotificationType::CommentDeleted,
                    "Comment removed by an admin",
                    &format!("An admin removed your comment on '{}'", task.title),
                    NotificationPriority::Medium,
                    task,
                    data.clone(),
                ));
            }
            for user in task.participants() {
                if seen.contains(&user) {
                    continue;
                }
                seen.push(user.clone());
                payloads.push(payload(
                    &user,
                    NotificationType::CommentDeleted,
                    "Comment deleted",
                    &format!("A comment on '{}' was deleted", task.title),
                    NotificationPriority::Low,
                    task,
                    data.clone(),
                ));
            }
            payloads
        }

        DomainEvent::ParticipantAdded { task, user, actor } => fan(
            std::iter::once(user).filter(|u| **u != actor.user_id),
            task,
            NotificationType::ParticipantAdded,
            "Added to task",
            &format!("{} added you to '{}'", actor.user_id, task.title),
            NotificationPriority::Medium,
            task_data(task),
        ),

        DomainEvent::ParticipantRemoved { task, user, actor } => fan(
            std::iter::once(user).filter(|u| **u != actor.user_id),
            task,
            NotificationType::ParticipantRemoved,
            "Removed from task",
            &format!("{} removed you from '{}'", actor.user_id, task.title),
            NotificationPriority::Low,
            task_data(task),
        ),

        DomainEvent::DeadlineChanged { task, actor, old, new } => fan(
            excluding(task.participants(), &actor.user_id).iter(),
            task,
            NotificationType::DeadlineChanged,
            "Deadline changed",
            &format!("The deadline of '{}' changed", task.title),
            NotificationPriority::Medium,
            merge(
                task_data(task),
                json!({
                    "oldDeadline": old.map(|d| d.to_rfc3339()),
                    "newDeadline": new.map(|d| d.to_rfc3339()),
                }),
            ),
        ),

        DomainEvent::TaskDeleted { task, actor } => fan(
            excluding(task.participants(), &actor.user_id).iter(),
            task,
            NotificationType::TaskDeleted,
            "Task deleted",
            &format!("'{}' was deleted by {}", task.title, actor.user_id),
            NotificationPriority::Medium,
            task_data(task),
        ),

        DomainEvent::DeadlineApproaching { task } => fan(
            task.participants().iter(),
            task,
            NotificationType::DeadlineApproaching,
            "Deadline approaching",
            &format!("'{}' is due within 24 hours", task.title),
            NotificationPriority::High,
            merge(
                task_data(task),
                json!({ "deadline": task.deadline.map(|d| d.to_rfc3339()) }),
            ),
        ),

        DomainEvent::Overdue { task } => fan(
            task.participants().iter(),
            task,
            NotificationType::TaskOverdue,
            "Task overdue",
            &format!("'{}' is past its deadline", task.title),
            NotificationPriority::Urgent,
            merge(
                task_data(task),
                json!({ "deadline": task.deadline.map(|d| d.to_rfc3339()) }),
            ),
        ),
    }
}

fn payload(
    user: &str,
    kind: NotificationType,
    title: &str,
    message: &str,
    priority: NotificationPriority,
    task: &Task,
    data: serde_json::Value,
) -> NotificationPayload {
    NotificationPayload {
        user_id: user.to_string(),
        kind,
        title: title.to_string(),
        message: message.to_string(),
        priority,
        task_id: Some(task.id.clone()),
        data,
    }
}

fn fan<'a, I>(
    users: I,
    task: &Task,
    kind: NotificationType,
    title: &str,
    message: &str,
    priority: NotificationPriority,
    data: serde_json::Value,
) -> Vec<NotificationPayload>
where
    I: Iterator<Item = &'a String>,
{
    let mut payloads = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    for user in users {
        if seen.contains(&user.as_str()) {
            continue;
        }
        seen.push(user);
        payloads.push(payload(user, kind, title, message, priority, task, data.clone()));
    }
    payloads
}

fn excluding(mut users: Vec<String>, actor: &str) -> Vec<String> {
    users.retain(|u| u != actor);
    users
}

fn task_data(task: &Task) -> serde_json::Value {
    json!({ "taskId": task.id, "url": format!("/tasks/{}", task.id) })
}

fn merge(base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    match (base, extra) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(extra)) => {
            base.extend(extra);
            serde_json::Value::Object(base)
        }
        (base, _) => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_crowd() -> Task {
        let mut task = Task::new("Ship it", "carol");
        task.assignee = Some("alice".into());
        task.watchers = vec!["bob".into(), "dave".into()];
        task
    }

    #[test]
    fn test_status_change_excludes_actor() {
        let task = task_with_crowd();
        let event = DomainEvent::StatusChanged {
            task: task.clone(),
            actor: Actor::new("alice", "member"),
            from: TaskStatus::Todo,
            to: TaskStatus::InProgress,
        };
        let payloads = route(&event, &[]);
        let users: Vec<&str> = payloads.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(users, vec!["carol", "bob", "dave"]);
        assert!(payloads
            .iter()
            .all(|p| p.kind == NotificationType::TaskStatusChanged));
    }

    #[test]
    fn test_assignment_targets_assignee_only() {
        let task = task_with_crowd();
        let event = DomainEvent::Assigned {
            task,
            actor: Actor::new("admin-1", "admin"),
            assignee: "alice".into(),
        };
        let payloads = route(&event, &[]);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].user_id, "alice");
        assert_eq!(payloads[0].priority, NotificationPriority::Medium);
    }

    #[test]
    fn test_pending_creation_targets_admins() {
        let mut task = task_with_crowd();
        task.status = TaskStatus::PendingApproval;
        let event = DomainEvent::TaskCreated {
            task,
            actor: Actor::new("carol", "member"),
        };
        let admins = vec!["root".to_string(), "carol".to_string()];
        let payloads = route(&event, &admins);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].user_id, "root");
        assert_eq!(payloads[0].priority, NotificationPriority::High);
    }

    #[test]
    fn test_comment_never_notifies_twice() {
        // bob is both mentioned and a watcher: one medium notification.
        let task = task_with_crowd();
        let event = DomainEvent::CommentAdded {
            task,
            comment_id: "c1".into(),
            author: "carol".into(),
            excerpt: "looks good".into(),
            mentions: vec!["bob".into(), "bob".into()],
            edited: false,
        };
        let payloads = route(&event, &[]);
        let bobs: Vec<_> = payloads.iter().filter(|p| p.user_id == "bob").collect();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].priority, NotificationPriority::Medium);
        // carol wrote the comment: no self-notification.
        assert!(payloads.iter().all(|p| p.user_id != "carol"));
        // alice and dave get the participant (low) notification.
        assert!(payloads
            .iter()
            .filter(|p| p.user_id == "alice" || p.user_id == "dave")
            .all(|p| p.priority == NotificationPriority::Low));
    }

    #[test]
    fn test_admin_comment_deletion_distinguishes_author() {
        let task = task_with_crowd();
        let event = DomainEvent::CommentDeleted {
            task,
            comment_id: "c1".into(),
            author: "bob".into(),
            actor: Actor::new("root", "admin"),
            by_admin: true,
        };
        let payloads = route(&event, &[]);
        let bob = payloads.iter().find(|p| p.user_id == "bob").unwrap();
        assert_eq!(bob.priority, NotificationPriority::Medium);
        assert!(bob.title.contains("admin"));
        let others: Vec<_> = payloads.iter().filter(|p| p.user_id != "bob").collect();
        assert!(!others.is_empty());
        assert!(others.iter().all(|p| p.priority == NotificationPriority::Low));
    }

    #[test]
    fn test_overdue_is_urgent_for_all_participants() {
        let task = task_with_crowd();
        let event = DomainEvent::Overdue { task };
        let payloads = route(&event, &[]);
        assert_eq!(payloads.len(), 4);
        assert!(payloads
            .iter()
            .all(|p| p.priority == NotificationPriority::Urgent
                && p.kind == NotificationType::TaskOverdue));
    }
}
