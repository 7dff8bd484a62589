//! SQLite-backed store — durable persistence for tasks, workflows,
//! notifications, and push subscriptions. Survives restarts, supports the
//! indexed dedup lookups the detection scans lean on.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use taskloom_core::error::{LoomError, Result};
use taskloom_core::traits::Store;
use taskloom_core::types::{
    Notification, NotificationPriority, NotificationType, PushSubscription, Task, TaskPriority,
    TaskStatus, User, Workflow,
};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| LoomError::Store(format!("open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::debug!("store opened at {}", path.display());
        Ok(store)
    }

    /// In-memory database, handy for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| LoomError::Store(format!("open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            -- Collaborative tasks
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'todo',
                priority TEXT NOT NULL DEFAULT 'medium',
                deadline TEXT,
                creator TEXT NOT NULL,
                assignee TEXT,
                watchers TEXT NOT NULL DEFAULT '[]',     -- JSON array of user ids
                requesters TEXT NOT NULL DEFAULT '[]',   -- JSON array, request order
                workflow_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_deadline ON tasks(deadline);

            -- Workflow definitions
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                statuses TEXT NOT NULL,                  -- JSON array
                transitions TEXT NOT NULL,               -- JSON array
                approvers TEXT NOT NULL DEFAULT '[]'
            );

            -- Notifications (durable source of truth for the fan-out engine)
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                task_id TEXT,
                data TEXT NOT NULL DEFAULT '{}',         -- JSON context
                priority TEXT NOT NULL DEFAULT 'medium',
                read INTEGER NOT NULL DEFAULT 0,
                read_at TEXT,
                sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_user
                ON notifications(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_dedup
                ON notifications(user_id, kind, task_id, created_at);

            -- Browser push registrations
            CREATE TABLE IF NOT EXISTS push_subscriptions (
                endpoint TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                p256dh TEXT NOT NULL,
                auth TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_used TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_push_user
                ON push_subscriptions(user_id, is_active);

            -- Minimal user records for role queries
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL DEFAULT 'member'
            );
         ",
            )
            .map_err(|e| LoomError::Store(format!("migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LoomError::Store("connection mutex poisoned".into()))
    }
}

fn db_err(e: rusqlite::Error) -> LoomError {
    LoomError::Store(e.to_string())
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let watchers: String = row.get(8)?;
    let requesters: String = row.get(9)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: TaskStatus::parse(&row.get::<_, String>(3)?).unwrap_or(TaskStatus::Todo),
        priority: TaskPriority::parse(&row.get::<_, String>(4)?).unwrap_or(TaskPriority::Medium),
        deadline: row.get::<_, Option<String>>(5)?.map(|s| parse_ts(&s)),
        creator: row.get(6)?,
        assignee: row.get(7)?,
        watchers: serde_json::from_str(&watchers).unwrap_or_default(),
        requesters: serde_json::from_str(&requesters).unwrap_or_default(),
        workflow_id: row.get(10)?,
        created_at: parse_ts(&row.get::<_, String>(11)?),
        updated_at: parse_ts(&row.get::<_, String>(12)?),
        version: row.get::<_, i64>(13)? as u64,
    })
}

const TASK_COLUMNS: &str = "id, title, description, status, priority, deadline, creator, \
     assignee, watchers, requesters, workflow_id, created_at, updated_at, version";

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let data: String = row.get(6)?;
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: NotificationType::parse(&row.get::<_, String>(2)?)
            .unwrap_or(NotificationType::TaskUpdated),
        title: row.get(3)?,
        message: row.get(4)?,
        task_id: row.get(5)?,
        data: serde_json::from_str(&data).unwrap_or_default(),
        priority: NotificationPriority::parse(&row.get::<_, String>(7)?)
            .unwrap_or(NotificationPriority::Medium),
        read: row.get::<_, i64>(8)? != 0,
        read_at: row.get::<_, Option<String>>(9)?.map(|s| parse_ts(&s)),
        sent: row.get::<_, i64>(10)? != 0,
        created_at: parse_ts(&row.get::<_, String>(11)?),
    })
}

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, kind, title, message, task_id, data, priority, read, read_at, sent, created_at";

fn subscription_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PushSubscription> {
    Ok(PushSubscription {
        endpoint: row.get(0)?,
        user_id: row.get(1)?,
        p256dh: row.get(2)?,
        auth: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        last_used: row.get::<_, Option<String>>(5)?.map(|s| parse_ts(&s)),
        created_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks
             (id, title, description, status, priority, deadline, creator, assignee,
              watchers, requesters, workflow_id, created_at, updated_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                task.id,
                task.title,
                task.description,
                task.status.as_str(),
                task.priority.as_str(),
                task.deadline.map(|d| d.to_rfc3339()),
                task.creator,
                task.assignee,
                serde_json::to_string(&task.watchers).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&task.requesters).unwrap_or_else(|_| "[]".into()),
                task.workflow_id,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                task.version as i64,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
            .map_err(db_err)?;
        let task = stmt
            .query_row(rusqlite::params![id], task_from_row)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(db_err(e)),
            })?;
        Ok(task)
    }

    async fn update_task(&self, task: &Task) -> Result<Task> {
        let conn = self.lock()?;
        // Compare-and-swap on the version column: a stale writer changes
        // zero rows.
        let rows = conn
            .execute(
                "UPDATE tasks SET
                   title = ?2, description = ?3, status = ?4, priority = ?5,
                   deadline = ?6, creator = ?7, assignee = ?8, watchers = ?9,
                   requesters = ?10, workflow_id = ?11, updated_at = ?12,
                   version = version + 1
                 WHERE id = ?1 AND version = ?13",
                rusqlite::params![
                    task.id,
                    task.title,
                    task.description,
                    task.status.as_str(),
                    task.priority.as_str(),
                    task.deadline.map(|d| d.to_rfc3339()),
                    task.creator,
                    task.assignee,
                    serde_json::to_string(&task.watchers).unwrap_or_else(|_| "[]".into()),
                    serde_json::to_string(&task.requesters).unwrap_or_else(|_| "[]".into()),
                    task.workflow_id,
                    task.updated_at.to_rfc3339(),
                    task.version as i64,
                ],
            )
            .map_err(db_err)?;
        if rows == 0 {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM tasks WHERE id = ?1",
                    rusqlite::params![task.id],
                    |r| r.get(0),
                )
                .map_err(db_err)?;
            return Err(if exists > 0 {
                LoomError::ConcurrentModification
            } else {
                LoomError::NotFound {
                    kind: "task",
                    id: task.id.clone(),
                }
            });
        }
        let mut stored = task.clone();
        stored.version += 1;
        Ok(stored)
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id])
            .map_err(db_err)?;
        Ok(())
    }

    async fn overdue_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE deadline IS NOT NULL AND deadline < ?1
                   AND status NOT IN ('done', 'late')
                 ORDER BY deadline"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![now.to_rfc3339()], task_from_row)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn tasks_due_within(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE deadline IS NOT NULL AND deadline >= ?1 AND deadline <= ?2
                   AND status NOT IN ('done', 'late')
                 ORDER BY deadline"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params![from.to_rfc3339(), until.to_rfc3339()],
                task_from_row,
            )
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<()> {
        workflow.validate()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflows (id, name, statuses, transitions, approvers)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                workflow.id,
                workflow.name,
                serde_json::to_string(&workflow.statuses).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&workflow.transitions).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&workflow.approvers).unwrap_or_else(|_| "[]".into()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, statuses, transitions, approvers FROM workflows WHERE id = ?1",
            )
            .map_err(db_err)?;
        let workflow = stmt
            .query_row(rusqlite::params![id], |row| {
                let statuses: String = row.get(2)?;
                let transitions: String = row.get(3)?;
                let approvers: String = row.get(4)?;
                Ok(Workflow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    statuses: serde_json::from_str(&statuses).unwrap_or_default(),
                    transitions: serde_json::from_str(&transitions).unwrap_or_default(),
                    approvers: serde_json::from_str(&approvers).unwrap_or_default(),
                })
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(db_err(e)),
            })?;
        Ok(workflow)
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notifications
             (id, user_id, kind, title, message, task_id, data, priority,
              read, read_at, sent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                notification.id,
                notification.user_id,
                notification.kind.as_str(),
                notification.title,
                notification.message,
                notification.task_id,
                notification.data.to_string(),
                notification.priority.as_str(),
                notification.read as i64,
                notification.read_at.map(|d| d.to_rfc3339()),
                notification.sent as i64,
                notification.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_notification(&self, notification: &Notification) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE notifications SET
                   title = ?2, message = ?3, data = ?4, priority = ?5,
                   read = ?6, read_at = ?7, sent = ?8, created_at = ?9
                 WHERE id = ?1",
                rusqlite::params![
                    notification.id,
                    notification.title,
                    notification.message,
                    notification.data.to_string(),
                    notification.priority.as_str(),
                    notification.read as i64,
                    notification.read_at.map(|d| d.to_rfc3339()),
                    notification.sent as i64,
                    notification.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(LoomError::NotFound {
                kind: "notification",
                id: notification.id.clone(),
            });
        }
        Ok(())
    }

    async fn notifications_for(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let conn = self.lock()?;
        let sql = if unread_only {
            format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 AND read = 0 ORDER BY created_at DESC"
            )
        } else {
            format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 ORDER BY created_at DESC"
            )
        };
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![user_id], notification_from_row)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn mark_read(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE notifications SET read = 1, read_at = ?2 WHERE id = ?1",
                rusqlite::params![id, at.to_rfc3339()],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(LoomError::NotFound {
                kind: "notification",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE notifications SET read = 1, read_at = ?2
                 WHERE user_id = ?1 AND read = 0",
                rusqlite::params![user_id, at.to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(rows as u64)
    }

    async fn notification_exists_since(
        &self,
        user_id: &str,
        kind: NotificationType,
        task_id: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM notifications
                 WHERE user_id = ?1 AND kind = ?2 AND task_id = ?3 AND created_at >= ?4",
                rusqlite::params![user_id, kind.as_str(), task_id, since.to_rfc3339()],
                |r| r.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    async fn upsert_push_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO push_subscriptions
             (endpoint, user_id, p256dh, auth, is_active, last_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                subscription.endpoint,
                subscription.user_id,
                subscription.p256dh,
                subscription.auth,
                subscription.is_active as i64,
                subscription.last_used.map(|d| d.to_rfc3339()),
                subscription.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn active_push_subscriptions(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT endpoint, user_id, p256dh, auth, is_active, last_used, created_at
                 FROM push_subscriptions
                 WHERE user_id = ?1 AND is_active = 1
                 ORDER BY endpoint",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![user_id], subscription_from_row)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn deactivate_push_subscription(&self, endpoint: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE push_subscriptions SET is_active = 0 WHERE endpoint = ?1",
            rusqlite::params![endpoint],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO users (id, role) VALUES (?1, ?2)",
            rusqlite::params![user.id, user.role],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn users_with_role(&self, role: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id FROM users WHERE role = ?1 ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![role], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
