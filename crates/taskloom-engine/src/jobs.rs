//! Scheduled Detection Jobs — periodic scans that synthesize overdue and
//! deadline-approaching events without spamming anyone.
//!
//! Each scan checks the dedup window per (user, task, type) before
//! delivering, so re-running inside the window is idempotent. A scan still
//! in flight when its next tick fires is skipped, never queued. One bad
//! task record is logged and never aborts the rest of the sweep.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use taskloom_core::config::JobsConfig;
use taskloom_core::error::Result;
use taskloom_core::traits::Store;
use taskloom_core::types::{NotificationType, Task};

use crate::fanout::FanoutEngine;
use crate::router::{route, DomainEvent};

pub struct DetectionJobs {
    store: Arc<dyn Store>,
    fanout: Arc<FanoutEngine>,
    config: JobsConfig,
    overdue_running: Mutex<()>,
    deadline_running: Mutex<()>,
}

/// What one scan invocation did.
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub scanned: usize,
    pub delivered: usize,
    pub deduped: usize,
    pub failed: usize,
    /// The previous invocation was still running; nothing was scanned.
    pub skipped_overlap: bool,
}

impl DetectionJobs {
    pub fn new(store: Arc<dyn Store>, fanout: Arc<FanoutEngine>, config: JobsConfig) -> Self {
        Self {
            store,
            fanout,
            config,
            overdue_running: Mutex::new(()),
            deadline_running: Mutex::new(()),
        }
    }

    /// Scan for tasks past their deadline (status not done/late).
    pub async fn run_overdue_scan(&self) -> Result<ScanReport> {
        let Ok(_guard) = self.overdue_running.try_lock() else {
            tracing::debug!("overdue scan still running, skipping this tick");
            return Ok(ScanReport {
                skipped_overlap: true,
                ..Default::default()
            });
        };
        let now = Utc::now();
        let tasks = self.store.overdue_tasks(now).await?;
        let window = Duration::seconds(self.config.overdue_dedup_secs as i64);
        self.sweep(tasks, NotificationType::TaskOverdue, window).await
    }

    /// Scan for tasks whose deadline falls inside the look-ahead horizon.
    pub async fn run_deadline_scan(&self) -> Result<ScanReport> {
        let Ok(_guard) = self.deadline_running.try_lock() else {
            tracing::debug!("deadline scan still running, skipping this tick");
            return Ok(ScanReport {
                skipped_overlap: true,
                ..Default::default()
            });
        };
        let now = Utc::now();
        let until = now + Duration::hours(self.config.deadline_horizon_hours as i64);
        let tasks = self.store.tasks_due_within(now, until).await?;
        let window = Duration::seconds(self.config.deadline_dedup_secs as i64);
        self.sweep(tasks, NotificationType::DeadlineApproaching, window)
            .await
    }

    async fn sweep(
        &self,
        tasks: Vec<Task>,
        kind: NotificationType,
        window: Duration,
    ) -> Result<ScanReport> {
        let mut report = ScanReport {
            scanned: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            if let Err(e) = self.sweep_task(&task, kind, window, &mut report).await {
                tracing::warn!("{kind} scan failed for task {}: {e}", task.id);
                report.failed += 1;
            }
        }
        tracing::info!(
            "{kind} scan: {} tasks, {} delivered, {} deduped, {} failed",
            report.scanned,
            report.delivered,
            report.deduped,
            report.failed
        );
        Ok(report)
    }

    async fn sweep_task(
        &self,
        task: &Task,
        kind: NotificationType,
        window: Duration,
        report: &mut ScanReport,
    ) -> Result<()> {
        let event = match kind {
            NotificationType::TaskOverdue => DomainEvent::Overdue { task: task.clone() },
            _ => DomainEvent::DeadlineApproaching { task: task.clone() },
        };
        let since = Utc::now() - window;
        for payload in route(&event, &[]) {
            if self
                .store
                .notification_exists_since(&payload.user_id, kind, &task.id, since)
                .await?
            {
                report.deduped += 1;
                continue;
            }
            match self.fanout.deliver(&payload).await {
                Ok(_) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("{kind} delivery to {} failed: {e}", payload.user_id);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }
}

/// Run both detection loops until cancelled. The two jobs tick on
/// independent intervals and may overlap each other, never themselves.
pub async fn spawn_detection_jobs(jobs: Arc<DetectionJobs>) {
    tracing::info!(
        "detection jobs started (overdue every {}s, deadlines every {}s)",
        jobs.config.overdue_interval_secs,
        jobs.config.deadline_interval_secs
    );

    let overdue = {
        let jobs = jobs.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                jobs.config.overdue_interval_secs,
            ));
            loop {
                interval.tick().await;
                if let Err(e) = jobs.run_overdue_scan().await {
                    tracing::warn!("overdue scan failed: {e}");
                }
            }
        }
    };
    let deadlines = {
        let jobs = jobs.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                jobs.config.deadline_interval_secs,
            ));
            loop {
                interval.tick().await;
                if let Err(e) = jobs.run_deadline_scan().await {
                    tracing::warn!("deadline scan failed: {e}");
                }
            }
        }
    };

    tokio::join!(overdue, deadlines);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{StubLive, StubPush};
    use taskloom_core::config::PushConfig;
    use taskloom_store::MemoryStore;

    fn jobs_with(store: Arc<MemoryStore>, live: Arc<StubLive>) -> DetectionJobs {
        let fanout = Arc::new(FanoutEngine::new(
            store.clone(),
            live,
            Arc::new(StubPush::new()),
            &PushConfig::default(),
        ));
        DetectionJobs::new(store, fanout, JobsConfig::default())
    }

    async fn seed_overdue_task(store: &MemoryStore, assignee: &str) -> Task {
        let mut task = Task::new("Ship it", assignee);
        task.assignee = Some(assignee.to_string());
        task.deadline = Some(Utc::now() - Duration::hours(2));
        store.create_task(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_overdue_scan_dedups_within_window() {
        let store = Arc::new(MemoryStore::new());
        let jobs = jobs_with(store.clone(), Arc::new(StubLive::new()));
        seed_overdue_task(&store, "u1").await;

        // First scan notifies u1 once.
        let report = jobs.run_overdue_scan().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.delivered, 1);
        let inbox = store.notifications_for("u1", false).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::TaskOverdue);

        // A re-run inside the window is a no-op.
        let report = jobs.run_overdue_scan().await.unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.deduped, 1);
        assert_eq!(store.notifications_for("u1", false).await.unwrap().len(), 1);

        // Once the window has elapsed, the user is notified again.
        let mut aged = store.notifications_for("u1", false).await.unwrap().remove(0);
        aged.created_at = Utc::now() - Duration::minutes(70);
        store.update_notification(&aged).await.unwrap();

        let report = jobs.run_overdue_scan().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(store.notifications_for("u1", false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_done_tasks_are_not_overdue() {
        let store = Arc::new(MemoryStore::new());
        let jobs = jobs_with(store.clone(), Arc::new(StubLive::new()));

        let mut task = seed_overdue_task(&store, "u1").await;
        task.status = taskloom_core::types::TaskStatus::Done;
        store.update_task(&task).await.unwrap();

        let report = jobs.run_overdue_scan().await.unwrap();
        assert_eq!(report.scanned, 0);
        assert!(store.notifications_for("u1", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_scan_sees_only_the_horizon() {
        let store = Arc::new(MemoryStore::new());
        let jobs = jobs_with(store.clone(), Arc::new(StubLive::new()));

        let mut soon = Task::new("Due soon", "u1");
        soon.deadline = Some(Utc::now() + Duration::hours(3));
        store.create_task(&soon).await.unwrap();

        let mut far = Task::new("Due next week", "u1");
        far.deadline = Some(Utc::now() + Duration::days(7));
        store.create_task(&far).await.unwrap();

        let report = jobs.run_deadline_scan().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.delivered, 1);
        let inbox = store.notifications_for("u1", false).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::DeadlineApproaching);
        assert_eq!(inbox[0].task_id.as_deref(), Some(soon.id.as_str()));
    }

    #[tokio::test]
    async fn test_scan_overlap_is_skipped_not_queued() {
        let store = Arc::new(MemoryStore::new());
        let live = Arc::new(StubLive::new());
        let jobs = jobs_with(store.clone(), live.clone());
        seed_overdue_task(&store, "u1").await;

        let _in_flight = jobs.overdue_running.lock().await;
        let report = jobs.run_overdue_scan().await.unwrap();
        assert!(report.skipped_overlap);
        assert_eq!(report.scanned, 0);
        assert!(live.published().is_empty());
    }

    #[tokio::test]
    async fn test_scan_kinds_do_not_collide() {
        // A deadline notification never suppresses an overdue one: the
        // dedup key includes the type.
        let store = Arc::new(MemoryStore::new());
        let jobs = jobs_with(store.clone(), Arc::new(StubLive::new()));

        let mut task = Task::new("Ship it", "u1");
        task.deadline = Some(Utc::now() + Duration::hours(1));
        store.create_task(&task).await.unwrap();

        jobs.run_deadline_scan().await.unwrap();
        assert_eq!(store.notifications_for("u1", false).await.unwrap().len(), 1);

        // Deadline passes; the overdue scan must still fire.
        let mut stored = store.task(&task.id).await.unwrap().unwrap();
        stored.deadline = Some(Utc::now() - Duration::hours(1));
        store.update_task(&stored).await.unwrap();

        let report = jobs.run_overdue_scan().await.unwrap();
        assert_eq!(report.delivered, 1);
        let inbox = store.notifications_for("u1", false).await.unwrap();
        assert_eq!(inbox.len(), 2);
    }
}
