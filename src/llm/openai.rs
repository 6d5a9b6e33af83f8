//! OpenAI-compatible chat completions backend.
//!
//! Works against any `/chat/completions` endpoint (OpenAI, local gateways).

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http_status_error;
use super::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};
use crate::error::LlmError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const PROVIDER: &str = "openai";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    url: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .json_mode
                .then(|| serde_json::json!({"type": "json_object"})),
        };

        let mut builder = self.client.post(&self.url).json(&body);
        let key = self.api_key.expose_secret();
        if !key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let resp = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;

        if !resp.status().is_success() {
            return Err(http_status_error(PROVIDER, resp).await);
        }

        let chat: ChatResponse = resp.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: format!("response parse failed: {e}"),
        })?;

        let choice = chat.choices.into_iter().next().ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "no choices in response".into(),
        })?;
        let usage = chat.usage.unwrap_or_default();
        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            _ => FinishReason::Other,
        };

        debug!(
            model = %self.model,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "OpenAI completion"
        );

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason,
        })
    }
}
