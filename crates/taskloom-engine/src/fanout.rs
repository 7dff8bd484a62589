//! Notification Fan-Out Engine — persists one notification per (user,
//! event) and delivers it over the live and push channels.
//!
//! Durable first: the record is written before any delivery attempt, and a
//! delivery failure never rolls it back. Channel delivery is best-effort
//! acceleration; the stored record is what the user sees on next poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;

use taskloom_core::config::PushConfig;
use taskloom_core::error::Result;
use taskloom_core::traits::{LiveChannel, PushChannel, PushOutcome, Store, Topic};
use taskloom_core::types::{Notification, PushPayload};

use crate::router::NotificationPayload;

pub struct FanoutEngine {
    store: Arc<dyn Store>,
    live: Arc<dyn LiveChannel>,
    push: Arc<dyn PushChannel>,
    push_enabled: bool,
    push_timeout: Duration,
    push_icon: Option<String>,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn Store>,
        live: Arc<dyn LiveChannel>,
        push: Arc<dyn PushChannel>,
        config: &PushConfig,
    ) -> Self {
        Self {
            store,
            live,
            push,
            push_enabled: config.enabled,
            push_timeout: Duration::from_secs(config.timeout_secs),
            push_icon: config.icon.clone(),
        }
    }

    /// Persist and deliver one notification.
    ///
    /// Persistence failure aborts the whole operation. Channel failures do
    /// not: `sent` is set when at least one channel got through, otherwise
    /// the record stays `sent = false` and visible on next poll.
    pub async fn deliver(&self, payload: &NotificationPayload) -> Result<Notification> {
        let mut notification = Notification::new(
            &payload.user_id,
            payload.kind,
            &payload.title,
            &payload.message,
            payload.priority,
        )
        .with_data(payload.data.clone());
        if let Some(task_id) = &payload.task_id {
            notification = notification.with_task(task_id);
        }

        self.store.create_notification(&notification).await?;

        let live_ok = self.publish_live(&notification).await;
        let push_ok = if self.push_enabled {
            self.push_all(&notification).await
        } else {
            false
        };

        if live_ok || push_ok {
            notification.sent = true;
            if let Err(e) = self.store.update_notification(&notification).await {
                // The notification reached the user; the stale sent flag
                // only costs a redundant poll entry.
                tracing::warn!("failed to mark notification {} sent: {e}", notification.id);
            }
        }
        Ok(notification)
    }

    /// Deliver a batch. Per-user writes have no cross-user contention, so
    /// everything proceeds in parallel; each failure stays its own.
    pub async fn deliver_all(&self, payloads: &[NotificationPayload]) -> Vec<Result<Notification>> {
        join_all(payloads.iter().map(|p| self.deliver(p))).await
    }

    /// Publish on the user's private topic. Counts as a delivery only when
    /// the user is actually connected; failure is a no-op, not an error.
    async fn publish_live(&self, notification: &Notification) -> bool {
        let topic = Topic::User(notification.user_id.clone());
        let payload = match serde_json::to_value(notification) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("notification {} not serializable: {e}", notification.id);
                return false;
            }
        };
        match self.live.publish(&topic, notification.kind.as_str(), &payload).await {
            Ok(()) => self.live.is_user_connected(&notification.user_id),
            Err(e) => {
                tracing::debug!("live publish skipped for {}: {e}", notification.user_id);
                false
            }
        }
    }

    /// Attempt every active subscription independently: all settle, none
    /// blocks the others, each failure is isolated. Gone endpoints are
    /// deactivated.
    async fn push_all(&self, notification: &Notification) -> bool {
        let subscriptions = match self
            .store
            .active_push_subscriptions(&notification.user_id)
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(
                    "could not load push subscriptions for {}: {e}",
                    notification.user_id
                );
                return false;
            }
        };
        if subscriptions.is_empty() {
            return false;
        }

        let payload = PushPayload::from_notification(notification, self.push_icon.clone());
        let attempts = subscriptions.iter().map(|sub| {
            let payload = &payload;
            async move {
                match tokio::time::timeout(self.push_timeout, self.push.send(sub, payload)).await {
                    Ok(outcome) => (sub, outcome),
                    Err(_) => (sub, PushOutcome::Failed("timed out".to_string())),
                }
            }
        });

        let mut delivered = false;
        for (sub, outcome) in join_all(attempts).await {
            match outcome {
                PushOutcome::Delivered => {
                    delivered = true;
                    let mut refreshed = sub.clone();
                    refreshed.last_used = Some(Utc::now());
                    if let Err(e) = self.store.upsert_push_subscription(&refreshed).await {
                        tracing::debug!("failed to refresh subscription last_used: {e}");
                    }
                }
                PushOutcome::Gone => {
                    tracing::info!("push endpoint gone, deactivating: {}", sub.endpoint);
                    if let Err(e) = self.store.deactivate_push_subscription(&sub.endpoint).await {
                        tracing::warn!("failed to deactivate {}: {e}", sub.endpoint);
                    }
                }
                PushOutcome::Failed(reason) => {
                    tracing::warn!("push to {} failed: {reason}", sub.endpoint);
                }
            }
        }
        delivered
    }
}
