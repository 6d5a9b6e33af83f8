//! Helpers for JSON-shaped completions.

use serde::de::DeserializeOwned;

use super::provider::{CompletionRequest, LlmProvider};
use crate::error::LlmError;

/// Run a completion and parse the first JSON object in the reply.
pub async fn complete_json<T: DeserializeOwned>(
    llm: &dyn LlmProvider,
    request: CompletionRequest,
) -> Result<T, LlmError> {
    let response = llm.complete(request.with_json_mode()).await?;
    parse_json_response(llm.model_name(), &response.content)
}

/// Parse a model reply as `T`, tolerating markdown fences and surrounding prose.
pub fn parse_json_response<T: DeserializeOwned>(provider: &str, raw: &str) -> Result<T, LlmError> {
    let json_str = extract_json_object(raw);
    serde_json::from_str(&json_str).map_err(|e| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: format!("JSON parse error: {e}"),
    })
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}
