//! SMS delivery gateway.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ConfigError, GatewayError};

/// Delivers one SMS. Failures are per send; callers decide whether to go on.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Send `body` from `from` to `to`, returning the provider's delivery id.
    async fn send(&self, from: &str, to: &str, body: &str) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Override for the API root (test servers, regional edges).
    pub base_url: String,
    pub timeout: Duration,
}

impl TwilioConfig {
    const DEFAULT_BASE_URL: &'static str = "https://api.twilio.com";

    /// `None` when `LEAD_ASSIST_TWILIO_ACCOUNT_SID` is unset.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(account_sid) = std::env::var("LEAD_ASSIST_TWILIO_ACCOUNT_SID") else {
            return Ok(None);
        };
        let auth_token = std::env::var("LEAD_ASSIST_TWILIO_AUTH_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("LEAD_ASSIST_TWILIO_AUTH_TOKEN".into()))?;
        Ok(Some(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            base_url: std::env::var("LEAD_ASSIST_TWILIO_URL")
                .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(15),
        }))
    }
}

/// Twilio Programmable Messaging over its REST API.
pub struct TwilioGateway {
    config: TwilioConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
}

impl TwilioGateway {
    pub fn new(config: TwilioConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn send(&self, from: &str, to: &str, body: &str) -> Result<String, GatewayError> {
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(self.config.auth_token.expose_secret()))
            .form(&[("From", from), ("To", to), ("Body", body)])
            .send()
            .await
            .map_err(|e| GatewayError::SendFailed {
                to: to.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let message: TwilioMessage = resp.json().await.map_err(|e| GatewayError::SendFailed {
            to: to.to_string(),
            reason: format!("unreadable response: {e}"),
        })?;
        debug!(to = %to, sid = %message.sid, "SMS accepted by Twilio");
        Ok(message.sid)
    }
}

/// Logs instead of sending. Used when no SMS provider is configured.
#[derive(Debug, Default)]
pub struct DryRunGateway;

#[async_trait]
impl SmsGateway for DryRunGateway {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn send(&self, from: &str, to: &str, body: &str) -> Result<String, GatewayError> {
        info!(from = %from, to = %to, chars = body.chars().count(), "Dry-run SMS (not sent)");
        Ok(format!("dry-run-{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{Form, Json, Router, http::StatusCode, routing::post};

    use super::*;

    async fn spawn_twilio(status: StatusCode) -> String {
        let app = Router::new().route(
            "/2010-04-01/Accounts/{sid}/Messages.json",
            post(move |Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(form.get("To").map(String::as_str), Some("+33612345678"));
                assert_eq!(form.get("Body").map(String::as_str), Some("hello"));
                (status, Json(serde_json::json!({"sid": "SM123", "message": "ok"})))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn gateway(base_url: String) -> TwilioGateway {
        TwilioGateway::new(TwilioConfig {
            account_sid: "AC1".into(),
            auth_token: SecretString::from("token".to_string()),
            base_url,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn twilio_send_returns_sid() {
        let url = spawn_twilio(StatusCode::CREATED).await;
        let sid = gateway(url).send("+15550000001", "+33612345678", "hello").await.unwrap();
        assert_eq!(sid, "SM123");
    }

    #[tokio::test]
    async fn twilio_rejection_is_reported() {
        let url = spawn_twilio(StatusCode::BAD_REQUEST).await;
        let err = gateway(url).send("+15550000001", "+33612345678", "hello").await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn dry_run_never_fails() {
        let id = DryRunGateway.send("+1", "+2", "x").await.unwrap();
        assert!(id.starts_with("dry-run-"));
    }
}
