//! Domain records — the core data model for tasks, workflows, and
//! notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{LoomError, Result};

/// Role name granted approval/administration rights by the identity provider.
pub const ROLE_ADMIN: &str = "admin";

/// The resolved identity behind a request: this core never authenticates,
/// it only consumes `{user_id, role}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: String,
}

impl Actor {
    pub fn new(user_id: &str, role: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            role: role.to_string(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    PendingApproval,
    Done,
    Late,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::PendingApproval => "pending_approval",
            TaskStatus::Done => "done",
            TaskStatus::Late => "late",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "pending_approval" => Some(TaskStatus::PendingApproval),
            "done" => Some(TaskStatus::Done),
            "late" => Some(TaskStatus::Late),
            _ => None,
        }
    }

    /// Statuses the detection scans treat as settled.
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Late)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "medium" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            "urgent" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }
}

/// A collaborative task.
///
/// `status`, `assignee`, and `requesters` are owned by the transition
/// validator and the assignment FSM — nothing else writes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub deadline: Option<DateTime<Utc>>,
    pub creator: String,
    pub assignee: Option<String>,
    /// Users watching this task.
    #[serde(default)]
    pub watchers: Vec<String>,
    /// Users awaiting assignment, in request order. Never contains
    /// duplicates, never contains the assignee.
    #[serde(default)]
    pub requesters: Vec<String>,
    pub workflow_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl Task {
    pub fn new(title: &str, creator: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            deadline: None,
            creator: creator.to_string(),
            assignee: None,
            watchers: Vec::new(),
            requesters: Vec::new(),
            workflow_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Everyone with a stake in the task: assignee, creator, watchers.
    /// Deduplicated, in that order.
    pub fn participants(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(assignee) = &self.assignee {
            out.push(assignee.clone());
        }
        if !out.contains(&self.creator) {
            out.push(self.creator.clone());
        }
        for watcher in &self.watchers {
            if !out.contains(watcher) {
                out.push(watcher.clone());
            }
        }
        out
    }

    pub fn has_requested(&self, user: &str) -> bool {
        self.requesters.iter().any(|u| u == user)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// An allowed (from, to) status change, optionally role-restricted and/or
/// approval-gated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// Roles allowed to perform this transition. Empty means any role.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
    /// Opaque key/value conditions, evaluated by the caller.
    #[serde(default)]
    pub conditions: serde_json::Value,
}

impl Transition {
    pub fn new(from: TaskStatus, to: TaskStatus) -> Self {
        Self {
            from,
            to,
            allowed_roles: Vec::new(),
            requires_approval: false,
            conditions: json!({}),
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.allowed_roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn approval_gated(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

/// A named set of legal task statuses plus the transitions between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    /// Ordered set of legal status names.
    pub statuses: Vec<TaskStatus>,
    pub transitions: Vec<Transition>,
    /// Users allowed to approve approval-gated transitions.
    #[serde(default)]
    pub approvers: Vec<String>,
}

impl Workflow {
    pub fn new(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            statuses: Vec::new(),
            transitions: Vec::new(),
            approvers: Vec::new(),
        }
    }

    pub fn with_statuses(mut self, statuses: &[TaskStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_approvers(mut self, approvers: &[&str]) -> Self {
        self.approvers = approvers.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Look up the unique transition for a (from, to) pair.
    pub fn transition(&self, from: TaskStatus, to: TaskStatus) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
    }

    /// Check definition invariants: at most one transition per (from, to)
    /// pair, and every endpoint declared in `statuses`.
    pub fn validate(&self) -> Result<()> {
        let mut seen: Vec<(TaskStatus, TaskStatus)> = Vec::new();
        for t in &self.transitions {
            if seen.contains(&(t.from, t.to)) {
                return Err(LoomError::InvalidWorkflow(format!(
                    "duplicate transition {} -> {} in workflow '{}'",
                    t.from, t.to, self.name
                )));
            }
            if !self.statuses.contains(&t.from) || !self.statuses.contains(&t.to) {
                return Err(LoomError::InvalidWorkflow(format!(
                    "transition {} -> {} references a status not declared in workflow '{}'",
                    t.from, t.to, self.name
                )));
            }
            seen.push((t.from, t.to));
        }
        Ok(())
    }
}

/// Notification type. Closed enum — the wire spellings are part of the
/// client contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TaskCreated,
    TaskUpdated,
    TaskAssigned,
    TaskStatusChanged,
    TaskDeleted,
    TaskRequest,
    TaskRequestResponse,
    CommentAdded,
    CommentEdited,
    CommentDeleted,
    ParticipantAdded,
    ParticipantRemoved,
    DeadlineApproaching,
    TaskOverdue,
    DeadlineChanged,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::TaskCreated => "task_created",
            NotificationType::TaskUpdated => "task_updated",
            NotificationType::TaskAssigned => "task_assigned",
            NotificationType::TaskStatusChanged => "task_status_changed",
            NotificationType::TaskDeleted => "task_deleted",
            NotificationType::TaskRequest => "task_request",
            NotificationType::TaskRequestResponse => "task_request_response",
            NotificationType::CommentAdded => "comment_added",
            NotificationType::CommentEdited => "comment_edited",
            NotificationType::CommentDeleted => "comment_deleted",
            NotificationType::ParticipantAdded => "participant_added",
            NotificationType::ParticipantRemoved => "participant_removed",
            NotificationType::DeadlineApproaching => "deadline_approaching",
            NotificationType::TaskOverdue => "task_overdue",
            NotificationType::DeadlineChanged => "deadline_changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task_created" => Some(NotificationType::TaskCreated),
            "task_updated" => Some(NotificationType::TaskUpdated),
            "task_assigned" => Some(NotificationType::TaskAssigned),
            "task_status_changed" => Some(NotificationType::TaskStatusChanged),
            "task_deleted" => Some(NotificationType::TaskDeleted),
            "task_request" => Some(NotificationType::TaskRequest),
            "task_request_response" => Some(NotificationType::TaskRequestResponse),
            "comment_added" => Some(NotificationType::CommentAdded),
            "comment_edited" => Some(NotificationType::CommentEdited),
            "comment_deleted" => Some(NotificationType::CommentDeleted),
            "participant_added" => Some(NotificationType::ParticipantAdded),
            "participant_removed" => Some(NotificationType::ParticipantRemoved),
            "deadline_approaching" => Some(NotificationType::DeadlineApproaching),
            "task_overdue" => Some(NotificationType::TaskOverdue),
            "deadline_changed" => Some(NotificationType::DeadlineChanged),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Medium => "medium",
            NotificationPriority::High => "high",
            NotificationPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(NotificationPriority::Low),
            "medium" => Some(NotificationPriority::Medium),
            "high" => Some(NotificationPriority::High),
            "urgent" => Some(NotificationPriority::Urgent),
            _ => None,
        }
    }
}

/// A persisted notification. Durable first: created before any delivery
/// attempt, mutated only by read/mark-all-read, never by delivery retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    /// The task this notification refers to, when there is one.
    pub task_id: Option<String>,
    /// Structured context (comment refs, old/new status, url).
    #[serde(default)]
    pub data: serde_json::Value,
    pub priority: NotificationPriority,
    #[serde(default)]
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    /// Delivered on at least one channel.
    #[serde(default)]
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: &str,
        kind: NotificationType,
        title: &str,
        message: &str,
        priority: NotificationPriority,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            task_id: None,
            data: json!({}),
            priority,
            read: false,
            read_at: None,
            sent: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// A browser push registration. Soft-deleted (`is_active = false`) when the
/// push service reports the endpoint gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub user_id: String,
    /// Unique per registration.
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl PushSubscription {
    pub fn new(user_id: &str, endpoint: &str, p256dh: &str, auth: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            endpoint: endpoint.to_string(),
            p256dh: p256dh.to_string(),
            auth: auth.to_string(),
            is_active: true,
            last_used: None,
            created_at: Utc::now(),
        }
    }
}

/// Minimal user record, enough to answer role queries. Identity itself is
/// the provider's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub role: String,
}

impl User {
    pub fn new(id: &str, role: &str) -> Self {
        Self {
            id: id.to_string(),
            role: role.to_string(),
        }
    }
}

/// Wire format for a push delivery. Field spellings match what the client
/// service worker expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub data: PushData,
    #[serde(rename = "requireInteraction")]
    pub require_interaction: bool,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushData {
    #[serde(rename = "notificationId")]
    pub notification_id: String,
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Option<String>,
}

impl PushPayload {
    pub fn from_notification(notification: &Notification, icon: Option<String>) -> Self {
        Self {
            title: notification.title.clone(),
            body: notification.message.clone(),
            icon,
            data: PushData {
                notification_id: notification.id.clone(),
                task_id: notification.task_id.clone(),
                kind: notification.kind.as_str().to_string(),
                url: notification
                    .data
                    .get("url")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            },
            require_interaction: notification.priority == NotificationPriority::Urgent,
            tag: notification.kind.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_wire_spelling() {
        // Client contract: bit-exact snake_case spellings.
        let all = [
            (NotificationType::TaskCreated, "task_created"),
            (NotificationType::TaskUpdated, "task_updated"),
            (NotificationType::TaskAssigned, "task_assigned"),
            (NotificationType::TaskStatusChanged, "task_status_changed"),
            (NotificationType::TaskDeleted, "task_deleted"),
            (NotificationType::TaskRequest, "task_request"),
            (NotificationType::TaskRequestResponse, "task_request_response"),
            (NotificationType::CommentAdded, "comment_added"),
            (NotificationType::CommentEdited, "comment_edited"),
            (NotificationType::CommentDeleted, "comment_deleted"),
            (NotificationType::ParticipantAdded, "participant_added"),
            (NotificationType::ParticipantRemoved, "participant_removed"),
            (NotificationType::DeadlineApproaching, "deadline_approaching"),
            (NotificationType::TaskOverdue, "task_overdue"),
            (NotificationType::DeadlineChanged, "deadline_changed"),
        ];
        for (kind, wire) in all {
            assert_eq!(kind.as_str(), wire);
            assert_eq!(serde_json::to_value(kind).unwrap(), serde_json::json!(wire));
            assert_eq!(NotificationType::parse(wire), Some(kind));
        }
    }

    #[test]
    fn test_participants_deduplicated() {
        let mut task = Task::new("Ship it", "alice");
        task.assignee = Some("alice".into());
        task.watchers = vec!["bob".into(), "alice".into(), "bob".into()];
        assert_eq!(task.participants(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_workflow_rejects_duplicate_transition() {
        let workflow = Workflow::new("review")
            .with_statuses(&[TaskStatus::Todo, TaskStatus::Done])
            .with_transition(Transition::new(TaskStatus::Todo, TaskStatus::Done))
            .with_transition(Transition::new(TaskStatus::Todo, TaskStatus::Done));
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn test_workflow_rejects_undeclared_status() {
        let workflow = Workflow::new("review")
            .with_statuses(&[TaskStatus::Todo])
            .with_transition(Transition::new(TaskStatus::Todo, TaskStatus::Done));
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn test_push_payload_wire_format() {
        let notification = Notification::new(
            "u1",
            NotificationType::TaskOverdue,
            "Task overdue",
            "'Ship it' is past its deadline",
            NotificationPriority::Urgent,
        )
        .with_task("t1")
        .with_data(serde_json::json!({"taskId": "t1", "url": "/tasks/t1"}));

        let payload = PushPayload::from_notification(&notification, None);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["requireInteraction"], serde_json::json!(true));
        assert_eq!(value["tag"], serde_json::json!("task_overdue"));
        assert_eq!(value["data"]["taskId"], serde_json::json!("t1"));
        assert_eq!(value["data"]["type"], serde_json::json!("task_overdue"));
        assert_eq!(value["data"]["url"], serde_json::json!("/tasks/t1"));
        assert_eq!(
            value["data"]["notificationId"],
            serde_json::json!(notification.id)
        );
    }
}
