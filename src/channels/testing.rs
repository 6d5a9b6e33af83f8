//! Recording gateway and notifier for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use super::sms::SmsGateway;
use super::webhook::{NotificationEvent, Notifier};
use crate::contacts::AgentProfile;
use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentSms {
    pub from: String,
    pub to: String,
    pub body: String,
}

/// Records every send. Numbers in `failing` are rejected.
#[derive(Default)]
pub(crate) struct RecordingGateway {
    pub(crate) sent: Mutex<Vec<SentSms>>,
    failing: Vec<String>,
}

impl RecordingGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_for(mut self, phone: &str) -> Self {
        self.failing.push(phone.to_string());
        self
    }

    pub(crate) fn sent(&self) -> Vec<SentSms> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SmsGateway for RecordingGateway {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, from: &str, to: &str, body: &str) -> Result<String, GatewayError> {
        if self.failing.iter().any(|p| p == to) {
            return Err(GatewayError::SendFailed {
                to: to.to_string(),
                reason: "carrier rejected".into(),
            });
        }
        let mut sent = self.sent.lock().map_err(|e| GatewayError::Http(e.to_string()))?;
        sent.push(SentSms {
            from: from.to_string(),
            to: to.to_string(),
            body: body.to_string(),
        });
        Ok(format!("SM{}", sent.len()))
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub(crate) events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        _agent: &AgentProfile,
        event: &NotificationEvent,
    ) -> Result<(), GatewayError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}
