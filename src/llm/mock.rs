//! Scripted provider for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use super::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use crate::error::LlmError;

/// Answers by matching a marker against the system prompt; unmatched requests fail.
#[derive(Default)]
pub(crate) struct ScriptedLlm {
    routes: Vec<(String, String)>,
    pub(crate) requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, marker: &str, response: &str) -> Self {
        self.routes.push((marker.to_string(), response.to_string()));
        self
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = request.system_prompt().unwrap_or_default();
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        let content = self
            .routes
            .iter()
            .find(|(marker, _)| system.contains(marker.as_str()))
            .map(|(_, resp)| resp.clone())
            .ok_or_else(|| LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "no scripted response".into(),
            })?;
        Ok(CompletionResponse {
            content,
            input_tokens: 10,
            output_tokens: 10,
            finish_reason: FinishReason::Stop,
        })
    }
}
