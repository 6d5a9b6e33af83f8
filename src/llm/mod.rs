//! LLM integration for Lead Assist.
//!
//! Supports:
//! - **Anthropic**: Messages API over reqwest
//! - **OpenAI**: any OpenAI-compatible chat completions endpoint
//!
//! Every provider is wrapped in [`RetryProvider`] so callers see a single
//! bounded-retry `LlmProvider`. Callers are still expected to fall back on
//! failure; the retry layer only smooths over rate limits.

pub mod anthropic;
pub mod json;
#[cfg(test)]
pub(crate) mod mock;
pub mod openai;
pub mod provider;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use json::{complete_json, extract_json_object};
pub use openai::OpenAiProvider;
pub use provider::*;
pub use retry::RetryProvider;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "LEAD_ASSIST_LLM_BACKEND".into(),
                message: format!("unknown backend '{other}' (expected anthropic|openai)"),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Override the endpoint URL (proxies, OpenAI-compatible gateways).
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl LlmConfig {
    /// Read from `LEAD_ASSIST_LLM_*`, falling back to `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: LlmBackend = std::env::var("LEAD_ASSIST_LLM_BACKEND")
            .unwrap_or_else(|_| "anthropic".to_string())
            .parse()?;

        let key_var = match backend {
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
            LlmBackend::OpenAi => "OPENAI_API_KEY",
        };
        let api_key = std::env::var("LEAD_ASSIST_LLM_API_KEY")
            .or_else(|_| std::env::var(key_var))
            .map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let model = std::env::var("LEAD_ASSIST_LLM_MODEL").unwrap_or_else(|_| match backend {
            LlmBackend::Anthropic => "claude-sonnet-4-20250514".to_string(),
            LlmBackend::OpenAi => "gpt-4o-mini".to_string(),
        });

        let timeout_secs: u64 = std::env::var("LEAD_ASSIST_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let max_retries: u32 = std::env::var("LEAD_ASSIST_LLM_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        Ok(Self {
            backend,
            api_key: secrecy::SecretString::from(api_key),
            model,
            base_url: std::env::var("LEAD_ASSIST_LLM_URL").ok(),
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        })
    }
}

/// Create an LLM provider from configuration, wrapped in the retry layer.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let inner: Arc<dyn LlmProvider> = match config.backend {
        LlmBackend::Anthropic => Arc::new(AnthropicProvider::new(
            config.api_key.clone(),
            &config.model,
            config.base_url.clone(),
            config.timeout,
        )?),
        LlmBackend::OpenAi => Arc::new(OpenAiProvider::new(
            config.api_key.clone(),
            &config.model,
            config.base_url.clone(),
            config.timeout,
        )?),
    };
    tracing::info!(backend = ?config.backend, model = %config.model, "LLM provider ready");
    Ok(Arc::new(RetryProvider::new(
        inner,
        config.max_retries,
        Duration::from_millis(500),
    )))
}

/// Map a non-success HTTP response to an `LlmError`.
pub(crate) async fn http_status_error(provider: &str, resp: reqwest::Response) -> LlmError {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();

    match status.as_u16() {
        429 => LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        401 | 403 => LlmError::AuthFailed {
            provider: provider.to_string(),
        },
        s if s >= 500 => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: format!("{status}: {body}"),
        },
        _ => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: format!("{status}: {body}"),
        },
    }
}
