//! Best-effort notifications to an agent's webhook.
//!
//! Notifications never block the pipeline: [`spawn_notify`] runs them on a
//! detached task and only logs failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::contacts::{AgentProfile, ContactStatus};
use crate::error::GatewayError;
use crate::intelligence::Urgency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Escalation,
    OptOut,
    Qualified,
    FollowUpsExhausted,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub event: NotificationKind,
    pub agent_id: String,
    pub phone: String,
    pub status: ContactStatus,
    pub score: Option<u8>,
    pub urgency: Option<Urgency>,
    pub reason: String,
    pub internal_note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        agent: &AgentProfile,
        event: &NotificationEvent,
    ) -> Result<(), GatewayError>;
}

/// POSTs events as JSON to the agent's `webhook_url`, or to a default URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    default_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(default_url: Option<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Ok(Self {
            client,
            default_url,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        agent: &AgentProfile,
        event: &NotificationEvent,
    ) -> Result<(), GatewayError> {
        let Some(url) = agent.webhook_url.as_deref().or(self.default_url.as_deref()) else {
            debug!(agent = %agent.id, "No webhook configured, notification dropped");
            return Ok(());
        };

        let resp = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected { status, body });
        }
        debug!(agent = %agent.id, event = ?event.event, "Webhook delivered");
        Ok(())
    }
}

/// Fire-and-forget: deliver on a detached task, log failures.
pub fn spawn_notify(notifier: Arc<dyn Notifier>, agent: AgentProfile, event: NotificationEvent) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&agent, &event).await {
            warn!(
                agent = %agent.id,
                phone = %event.phone,
                event = ?event.event,
                error = %e,
                "Notification failed"
            );
        }
    });
}
