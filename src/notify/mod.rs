//! Outbound notifications
//!
//! Notifications fire after a state transition has committed and are
//! best-effort: a failed delivery is logged, never surfaced as a booking
//! failure, and no lock is held while the call is in flight.

use crate::error::EngineError;
use crate::Result;
use serde::Serialize;
use std::env;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Events emitted by the engine after commit
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    AdvisoryBooked {
        advisory_id: Uuid,
        code: String,
        expert_email: String,
        client_email: String,
    },
    AdvisoryCompleted {
        advisory_id: Uuid,
        code: String,
    },
    AdvisoryCancelled {
        advisory_id: Uuid,
        code: String,
    },
    AdvisoryRejected {
        advisory_id: Uuid,
        code: String,
    },
    PaymentReleased {
        payment_id: Uuid,
    },
    PaymentRefunded {
        payment_id: Uuid,
    },
}

/// Trait for notification delivery
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: EngineEvent) -> Result<()>;
}

/// Logs events instead of delivering them; default for dev and tests
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: EngineEvent) -> Result<()> {
        info!(?event, "engine event");
        Ok(())
    }
}

/// Delivers events as JSON POSTs to a webhook endpoint
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Internal(format!("http client init failed: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Build from `NOTIFY_WEBHOOK_URL` when set
    pub fn from_env() -> Option<Self> {
        let endpoint = env::var("NOTIFY_WEBHOOK_URL").ok()?;
        Self::new(endpoint).ok()
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: EngineEvent) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&event)
            .send()
            .await
            .map_err(|e| EngineError::Internal(format!("webhook delivery failed: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::Internal(format!("webhook rejected event: {}", e)))?;
        Ok(())
    }
}
