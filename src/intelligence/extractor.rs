//! Context extractor: pulls new facts out of one inbound message.
//!
//! The model is only asked for what is new in this message. Carrying facts
//! forward is the job of the local merge, which never loses a known value.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contacts::ExtractedContext;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_json};

const EXTRACT_MAX_TOKENS: u32 = 700;
const EXTRACT_TEMPERATURE: f32 = 0.1;

/// Output of one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    /// Facts the model found in this message.
    pub new_info: ExtractedContext,
    /// One-line summary of the message, empty on failure.
    pub summary: String,
    /// `existing` with `new_info` folded in.
    pub merged: ExtractedContext,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    new_info: ExtractedContext,
    #[serde(default)]
    summary: String,
}

pub struct ContextExtractor {
    llm: Arc<dyn LlmProvider>,
}

impl ContextExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Extract new facts from `message` and merge them into `existing`.
    ///
    /// On failure nothing new is learned: `merged` equals `existing`.
    pub async fn extract(&self, message: &str, existing: &ExtractedContext) -> ExtractionResult {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extract_system_prompt()),
            ChatMessage::user(build_extract_user_prompt(message, existing)),
        ])
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(EXTRACT_MAX_TOKENS);

        match complete_json::<ExtractionResponse>(self.llm.as_ref(), request).await {
            Ok(response) => {
                let merged = existing.merged(response.new_info.clone());
                debug!(
                    new_facts = response.new_info.facts().len(),
                    "Context extracted"
                );
                ExtractionResult {
                    new_info: response.new_info,
                    summary: response.summary.trim().to_string(),
                    merged,
                }
            }
            Err(e) => {
                warn!(error = %e, "Context extraction failed, keeping existing context");
                ExtractionResult {
                    new_info: ExtractedContext::default(),
                    summary: String::new(),
                    merged: existing.clone(),
                }
            }
        }
    }
}

fn build_extract_system_prompt() -> String {
    let scalars = ExtractedContext::SCALAR_FIELDS.join(", ");
    let lists = ExtractedContext::LIST_FIELDS.join(", ");
    format!(
        "You extract facts about a sales lead from a single SMS message.\n\
         \n\
         Return ONLY a JSON object:\n\
         {{\"new_info\": {{...}}, \"summary\": \"one short sentence\"}}\n\
         \n\
         `new_info` may contain these string fields: {scalars}\n\
         and these list-of-string fields: {lists}\n\
         \n\
         Rules:\n\
         - Only include facts stated or clearly implied in THIS message.\n\
         - Do not repeat facts already listed under \"Known facts\" unless the message changes them.\n\
         - Omit fields you have nothing for. Never output null placeholders or guesses.\n\
         - key_quotes holds short verbatim phrases worth remembering."
    )
}

fn build_extract_user_prompt(message: &str, existing: &ExtractedContext) -> String {
    let preview: String = message.chars().take(1500).collect();
    format!(
        "Known facts:\n{}\n\nMessage:\n{}",
        existing.render(),
        preview
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedLlm;

    fn existing() -> ExtractedContext {
        ExtractedContext {
            company: Some("Acme".into()),
            needs: vec!["CRM sync".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn merges_new_facts_monotonically() {
        let llm = ScriptedLlm::new().on(
            "extract facts",
            r#"{"new_info": {"budget": "15k", "company": null, "needs": ["CRM sync", "SSO"]}, "summary": "Shared budget"}"#,
        );
        let extractor = ContextExtractor::new(Arc::new(llm));

        let result = extractor.extract("We have about 15k, need SSO too", &existing()).await;
        assert_eq!(result.summary, "Shared budget");
        assert_eq!(result.new_info.budget.as_deref(), Some("15k"));
        assert_eq!(result.merged.company.as_deref(), Some("Acme"));
        assert_eq!(result.merged.needs, vec!["CRM sync", "SSO"]);
    }

    #[tokio::test]
    async fn failure_keeps_existing_context() {
        let extractor = ContextExtractor::new(Arc::new(ScriptedLlm::new()));
        let result = extractor.extract("hello", &existing()).await;
        assert!(result.new_info.is_empty());
        assert!(result.summary.is_empty());
        assert_eq!(result.merged, existing());
    }

    #[tokio::test]
    async fn unparseable_output_keeps_existing_context() {
        let llm = ScriptedLlm::new().on("extract facts", "I could not find anything.");
        let extractor = ContextExtractor::new(Arc::new(llm));
        let result = extractor.extract("hello", &existing()).await;
        assert_eq!(result.merged, existing());
    }

    #[test]
    fn user_prompt_carries_known_facts() {
        let prompt = build_extract_user_prompt("hi", &existing());
        assert!(prompt.contains("- company: Acme"));
        assert!(prompt.ends_with("hi"));
    }
}
