//! Outbound text generation: conversational replies and follow-up nudges.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::classifier::IntentAnalysis;
use crate::contacts::model::render_history;
use crate::contacts::{AgentProfile, ExtractedContext, Message};
use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_json};

const REPLY_MAX_TOKENS: u32 = 300;
const REPLY_TEMPERATURE: f32 = 0.6;

/// Hard cap on generated SMS bodies (three concatenated segments).
pub const MAX_SMS_CHARS: usize = 459;

/// Sent when a reply cannot be generated.
pub const FALLBACK_REPLY: &str =
    "Thanks for your message! We've received it and will get back to you shortly.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedReply {
    pub text: String,
    /// True when [`FALLBACK_REPLY`] was used.
    pub fallback: bool,
}

/// Result of asking for a follow-up nudge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "draft", rename_all = "snake_case")]
pub enum FollowUpDraft {
    Send { message: String },
    /// The generator judged that no good nudge exists.
    Decline { reason: String },
}

/// What the nudge generator knows about the silence.
pub struct NudgeContext<'a> {
    pub agent: &'a AgentProfile,
    pub history: &'a [Message],
    pub context: &'a ExtractedContext,
    pub days_silent: i64,
    /// Nudges already sent before this one.
    pub prior_follow_ups: u8,
}

#[derive(Debug, Deserialize)]
struct ReplyResponse {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct NudgeResponse {
    #[serde(default = "default_true")]
    send: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: String,
}

fn default_true() -> bool {
    true
}

pub struct ReplyGenerator {
    llm: Arc<dyn LlmProvider>,
}

impl ReplyGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Draft a reply to the lead's latest message. Never fails: the generic
    /// [`FALLBACK_REPLY`] is returned if generation does.
    pub async fn generate_reply(
        &self,
        agent: &AgentProfile,
        history: &[Message],
        context: &ExtractedContext,
        intent: &IntentAnalysis,
    ) -> GeneratedReply {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_reply_system_prompt(agent)),
            ChatMessage::user(format!(
                "Lead intent: {}\n\nKnown facts:\n{}\n\nConversation (latest last):\n{}",
                intent.primary_intent.as_str(),
                context.render(),
                render_history(history, 400)
            )),
        ])
        .with_temperature(REPLY_TEMPERATURE)
        .with_max_tokens(REPLY_MAX_TOKENS);

        match complete_json::<ReplyResponse>(self.llm.as_ref(), request).await {
            Ok(r) => match clean_sms(&r.message) {
                Some(text) => GeneratedReply {
                    text,
                    fallback: false,
                },
                None => {
                    warn!("Reply generator returned an empty message, using fallback");
                    fallback_reply()
                }
            },
            Err(e) => {
                warn!(error = %e, "Reply generation failed, using fallback");
                fallback_reply()
            }
        }
    }

    /// Draft follow-up nudge number `prior_follow_ups + 1`.
    ///
    /// Errors are returned to the caller: a nudge that could not be
    /// generated is not sent.
    pub async fn generate_follow_up(
        &self,
        nudge: &NudgeContext<'_>,
    ) -> Result<FollowUpDraft, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_nudge_system_prompt(nudge.agent)),
            ChatMessage::user(format!(
                "Days since the lead last wrote: {}\nFollow-ups already sent: {}\n\nKnown facts:\n{}\n\nConversation (latest last):\n{}",
                nudge.days_silent,
                nudge.prior_follow_ups,
                nudge.context.render(),
                render_history(nudge.history, 300)
            )),
        ])
        .with_temperature(REPLY_TEMPERATURE)
        .with_max_tokens(REPLY_MAX_TOKENS);

        let response: NudgeResponse = complete_json(self.llm.as_ref(), request).await?;
        let draft = match (response.send, clean_sms(&response.message)) {
            (true, Some(message)) => FollowUpDraft::Send { message },
            (true, None) => FollowUpDraft::Decline {
                reason: "generator returned an empty nudge".into(),
            },
            (false, _) => FollowUpDraft::Decline {
                reason: if response.reason.trim().is_empty() {
                    "generator declined".into()
                } else {
                    response.reason.trim().to_string()
                },
            },
        };
        debug!(send = matches!(draft, FollowUpDraft::Send { .. }), "Follow-up drafted");
        Ok(draft)
    }
}

fn fallback_reply() -> GeneratedReply {
    GeneratedReply {
        text: FALLBACK_REPLY.to_string(),
        fallback: true,
    }
}

/// Trim, strip wrapping quotes, and cap to [`MAX_SMS_CHARS`].
fn clean_sms(raw: &str) -> Option<String> {
    let text = raw.trim().trim_matches('"').trim();
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(MAX_SMS_CHARS).collect())
}

fn build_reply_system_prompt(agent: &AgentProfile) -> String {
    format!(
        "You write short SMS replies on behalf of {}, replying to a sales lead.\n\
         \n\
         - Answer what the lead asked, then move qualification forward with at most one question.\n\
         - Plain text, no markdown, under 300 characters.\n\
         - Never invent prices, discounts, or commitments not present in the conversation.\n\
         \n\
         Return ONLY a JSON object: {{\"message\": \"...\"}}",
        agent.name
    )
}

fn build_nudge_system_prompt(agent: &AgentProfile) -> String {
    format!(
        "You write follow-up SMS nudges on behalf of {} to a sales lead who went quiet.\n\
         \n\
         - Reference something specific from the conversation; no generic \"just checking in\".\n\
         - Plain text, under 240 characters, easy to answer.\n\
         - If there is no respectful, useful nudge to send (the lead declined, the thread is closed), decline.\n\
         \n\
         Return ONLY a JSON object: {{\"send\": true|false, \"message\": \"...\", \"reason\": \"why not, when declining\"}}",
        agent.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedLlm;

    fn agent() -> AgentProfile {
        AgentProfile {
            id: "a1".into(),
            name: "Acme Sales".into(),
            from_number: "+15550000001".into(),
            webhook_url: None,
        }
    }

    fn nudge<'a>(agent: &'a AgentProfile, ctx: &'a ExtractedContext) -> NudgeContext<'a> {
        NudgeContext {
            agent,
            history: &[],
            context: ctx,
            days_silent: 3,
            prior_follow_ups: 1,
        }
    }

    #[tokio::test]
    async fn reply_uses_model_text() {
        let llm = ScriptedLlm::new().on(
            "short SMS replies",
            r#"{"message": "  Our plans start at $49/mo. How big is your team? "}"#,
        );
        let g = ReplyGenerator::new(Arc::new(llm));
        let r = g
            .generate_reply(
                &agent(),
                &[],
                &ExtractedContext::default(),
                &IntentAnalysis::fallback(),
            )
            .await;
        assert!(!r.fallback);
        assert_eq!(r.text, "Our plans start at $49/mo. How big is your team?");
    }

    #[tokio::test]
    async fn reply_falls_back_on_failure() {
        let g = ReplyGenerator::new(Arc::new(ScriptedLlm::new()));
        let r = g
            .generate_reply(
                &agent(),
                &[],
                &ExtractedContext::default(),
                &IntentAnalysis::fallback(),
            )
            .await;
        assert!(r.fallback);
        assert_eq!(r.text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn nudge_send_and_decline() {
        let a = agent();
        let ctx = ExtractedContext::default();

        let llm = ScriptedLlm::new().on(
            "follow-up SMS nudges",
            r#"{"send": true, "message": "Did the CRM demo answer your sync question?"}"#,
        );
        let draft = ReplyGenerator::new(Arc::new(llm))
            .generate_follow_up(&nudge(&a, &ctx))
            .await
            .unwrap();
        assert_eq!(
            draft,
            FollowUpDraft::Send {
                message: "Did the CRM demo answer your sync question?".into()
            }
        );

        let llm = ScriptedLlm::new().on(
            "follow-up SMS nudges",
            r#"{"send": false, "reason": "lead said they chose a competitor"}"#,
        );
        let draft = ReplyGenerator::new(Arc::new(llm))
            .generate_follow_up(&nudge(&a, &ctx))
            .await
            .unwrap();
        assert!(matches!(
            draft,
            FollowUpDraft::Decline { reason } if reason.contains("competitor")
        ));
    }

    #[tokio::test]
    async fn nudge_failure_is_an_error() {
        let a = agent();
        let ctx = ExtractedContext::default();
        let g = ReplyGenerator::new(Arc::new(ScriptedLlm::new()));
        assert!(g.generate_follow_up(&nudge(&a, &ctx)).await.is_err());
    }

    #[test]
    fn clean_sms_caps_length() {
        let long = "x".repeat(1000);
        assert_eq!(clean_sms(&long).unwrap().chars().count(), MAX_SMS_CHARS);
        assert_eq!(clean_sms("  \"\"  "), None);
    }
}
