//! HTTP push channel — POSTs the payload to each browser-registered
//! endpoint with a bounded timeout.
//!
//! Status triage follows the push-service contract: 2xx delivered, 404/410
//! means the registration is gone and should be retired, anything else is
//! a transient failure the fan-out engine logs and moves past.

use std::time::Duration;

use async_trait::async_trait;

use taskloom_core::traits::{PushChannel, PushOutcome};
use taskloom_core::types::{PushPayload, PushSubscription};

pub struct HttpPushChannel {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPushChannel {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl PushChannel for HttpPushChannel {
    async fn send(&self, subscription: &PushSubscription, payload: &PushPayload) -> PushOutcome {
        let resp = self
            .client
            .post(&subscription.endpoint)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!("push delivered to {}", subscription.endpoint);
                PushOutcome::Delivered
            }
            Ok(resp)
                if resp.status() == reqwest::StatusCode::NOT_FOUND
                    || resp.status() == reqwest::StatusCode::GONE =>
            {
                PushOutcome::Gone
            }
            Ok(resp) => PushOutcome::Failed(format!("push endpoint error {}", resp.status())),
            Err(e) => PushOutcome::Failed(format!("push send failed: {e}")),
        }
    }
}
