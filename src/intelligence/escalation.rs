//! Escalation evaluator: decides when a human must take over.
//!
//! The verdict itself is a pure function of the classifier output, the
//! score, and the inbound turn count, so identical inputs always produce the
//! same decision. The completion service is only used afterwards to draft
//! the holding message to the lead and the note for the rep; if it fails,
//! fixed templates are used.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::classifier::{Intent, IntentAnalysis, Urgency, WarningSignal};
use crate::config::env_or;
use crate::contacts::model::render_history;
use crate::contacts::{ExtractedContext, Message};
use crate::error::ConfigError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_json};

const BRIEF_MAX_TOKENS: u32 = 400;
const BRIEF_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationConfig {
    /// Score at or above which confirmed buying intent escalates.
    pub score_threshold: u8,
    /// Inbound turns after which an unresolved conversation escalates.
    pub max_turns: u32,
    /// Classifier confidence required to treat buying intent as confirmed.
    pub min_confidence: f32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            score_threshold: 80,
            max_turns: 15,
            min_confidence: 0.6,
        }
    }
}

impl EscalationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            score_threshold: env_or("LEAD_ASSIST_ESCALATION_SCORE", defaults.score_threshold)?,
            max_turns: env_or("LEAD_ASSIST_ESCALATION_MAX_TURNS", defaults.max_turns)?,
            min_confidence: env_or(
                "LEAD_ASSIST_ESCALATION_MIN_CONFIDENCE",
                defaults.min_confidence,
            )?,
        })
    }
}

/// Why a conversation was handed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    HotLead,
    HumanRequested,
    Complaint,
    LegalThreat,
    StalledNegotiation,
    TurnBudgetExceeded,
}

impl EscalationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HotLead => "hot_lead",
            Self::HumanRequested => "human_requested",
            Self::Complaint => "complaint",
            Self::LegalThreat => "legal_threat",
            Self::StalledNegotiation => "stalled_negotiation",
            Self::TurnBudgetExceeded => "turn_budget_exceeded",
        }
    }

    fn urgency(&self) -> Urgency {
        match self {
            Self::LegalThreat => Urgency::Critical,
            Self::HotLead | Self::HumanRequested | Self::Complaint => Urgency::High,
            Self::StalledNegotiation | Self::TurnBudgetExceeded => Urgency::Medium,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::HotLead => "Hot lead with confirmed buying intent",
            Self::HumanRequested => "Lead asked to speak with a person",
            Self::Complaint => "Lead raised a complaint",
            Self::LegalThreat => "Lead mentioned legal action",
            Self::StalledNegotiation => "Negotiation has stalled",
            Self::TurnBudgetExceeded => "Conversation is running long without resolution",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub trigger: Option<EscalationTrigger>,
    pub urgency: Urgency,
    pub reason: String,
    /// Holding message for the lead while a human picks up.
    pub suggested_message: Option<String>,
    /// Briefing for the human.
    pub internal_note: Option<String>,
}

impl EscalationDecision {
    pub fn none() -> Self {
        Self {
            should_escalate: false,
            trigger: None,
            urgency: Urgency::Low,
            reason: String::new(),
            suggested_message: None,
            internal_note: None,
        }
    }
}

/// Inputs to one escalation evaluation.
pub struct EscalationInput<'a> {
    pub message: &'a str,
    pub history: &'a [Message],
    pub context: &'a ExtractedContext,
    pub intent: &'a IntentAnalysis,
    pub score: Option<u8>,
    /// Inbound messages so far, including this one.
    pub turns: u32,
}

#[derive(Debug, Deserialize)]
struct BriefResponse {
    #[serde(default)]
    suggested_message: String,
    #[serde(default)]
    internal_note: String,
}

pub struct EscalationEvaluator {
    llm: Arc<dyn LlmProvider>,
    config: EscalationConfig,
}

impl EscalationEvaluator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: EscalationConfig) -> Self {
        Self { llm, config }
    }

    /// The deterministic verdict. Triggers are checked in severity order and
    /// the first match wins.
    pub fn verdict(
        &self,
        intent: &IntentAnalysis,
        score: Option<u8>,
        turns: u32,
    ) -> Option<EscalationTrigger> {
        if intent.has_warning(WarningSignal::LegalThreat) {
            return Some(EscalationTrigger::LegalThreat);
        }
        if intent.primary_intent == Intent::RequestHuman
            || intent.has_warning(WarningSignal::HumanRequested)
        {
            return Some(EscalationTrigger::HumanRequested);
        }
        if intent.primary_intent == Intent::Complaint
            || intent.has_warning(WarningSignal::Complaint)
        {
            return Some(EscalationTrigger::Complaint);
        }
        let hot = score.is_some_and(|s| s >= self.config.score_threshold);
        if hot
            && intent.primary_intent == Intent::ReadyToBuy
            && intent.confirms_buying(self.config.min_confidence)
        {
            return Some(EscalationTrigger::HotLead);
        }
        if intent.has_warning(WarningSignal::StalledNegotiation) {
            return Some(EscalationTrigger::StalledNegotiation);
        }
        if turns > self.config.max_turns {
            return Some(EscalationTrigger::TurnBudgetExceeded);
        }
        None
    }

    /// Decide whether to escalate and, if so, draft the hand-off texts.
    pub async fn should_escalate(&self, input: EscalationInput<'_>) -> EscalationDecision {
        let Some(trigger) = self.verdict(input.intent, input.score, input.turns) else {
            debug!(
                intent = input.intent.primary_intent.as_str(),
                turns = input.turns,
                "No escalation"
            );
            return EscalationDecision::none();
        };

        let urgency = trigger.urgency().max(input.intent.urgency);
        let brief = self.draft_brief(&input, trigger).await;
        info!(
            trigger = trigger.as_str(),
            urgency = urgency.as_str(),
            score = ?input.score,
            turns = input.turns,
            "Escalating to human"
        );
        EscalationDecision {
            should_escalate: true,
            trigger: Some(trigger),
            urgency,
            reason: trigger.reason().to_string(),
            suggested_message: Some(brief.0),
            internal_note: Some(brief.1),
        }
    }

    async fn draft_brief(
        &self,
        input: &EscalationInput<'_>,
        trigger: EscalationTrigger,
    ) -> (String, String) {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(ESCALATION_SYSTEM_PROMPT),
            ChatMessage::user(build_brief_user_prompt(input, trigger)),
        ])
        .with_temperature(BRIEF_TEMPERATURE)
        .with_max_tokens(BRIEF_MAX_TOKENS);

        let fallback_note = template_note(input, trigger);
        match complete_json::<BriefResponse>(self.llm.as_ref(), request).await {
            Ok(brief) => {
                let message = non_blank(brief.suggested_message)
                    .unwrap_or_else(|| HOLDING_MESSAGE.to_string());
                let note = non_blank(brief.internal_note).unwrap_or(fallback_note);
                (message, note)
            }
            Err(e) => {
                warn!(error = %e, "Escalation brief failed, using templates");
                (HOLDING_MESSAGE.to_string(), fallback_note)
            }
        }
    }
}

const HOLDING_MESSAGE: &str =
    "Thanks for your message. A member of our team will get back to you personally very soon.";

const ESCALATION_SYSTEM_PROMPT: &str = "You brief a human sales rep who is taking over an SMS conversation.\n\
\n\
Return ONLY a JSON object:\n\
{\"suggested_message\": \"short SMS to the lead saying a person will follow up\", \
\"internal_note\": \"2-4 sentences for the rep: who the lead is, what they want, what to do next\"}\n\
\n\
Never promise prices, discounts or dates in the suggested message.";

fn build_brief_user_prompt(input: &EscalationInput<'_>, trigger: EscalationTrigger) -> String {
    format!(
        "Escalation reason: {}\nIntent: {}\nScore: {}\n\nKnown facts:\n{}\n\nConversation:\n{}\nLatest message:\n{}",
        trigger.reason(),
        input.intent.primary_intent.as_str(),
        input
            .score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unscored".into()),
        input.context.render(),
        render_history(input.history, 300),
        input.message
    )
}

fn template_note(input: &EscalationInput<'_>, trigger: EscalationTrigger) -> String {
    let who = input
        .context
        .name
        .as_deref()
        .or(input.context.company.as_deref())
        .unwrap_or("Lead");
    let preview: String = input.message.chars().take(160).collect();
    format!(
        "{}. {} (score {}, intent {}) wrote: \"{}\"",
        trigger.reason(),
        who,
        input
            .score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "n/a".into()),
        input.intent.primary_intent.as_str(),
        preview
    )
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::classifier::RecommendedAction;
    use crate::llm::mock::ScriptedLlm;

    fn intent(primary: Intent, confidence: f32, warnings: Vec<WarningSignal>) -> IntentAnalysis {
        IntentAnalysis {
            primary_intent: primary,
            confidence,
            secondary_intents: vec![],
            buying_signals: vec![],
            warning_signals: warnings,
            recommended_action: RecommendedAction::Respond,
            urgency: Urgency::Low,
        }
    }

    fn evaluator(llm: ScriptedLlm) -> EscalationEvaluator {
        EscalationEvaluator::new(Arc::new(llm), EscalationConfig::default())
    }

    #[test]
    fn routine_questions_do_not_escalate() {
        let e = evaluator(ScriptedLlm::new());
        let pricing = intent(Intent::PricingInquiry, 0.9, vec![]);
        assert_eq!(e.verdict(&pricing, Some(85), 3), None);
        let question = intent(Intent::ProductQuestion, 0.9, vec![WarningSignal::BudgetConcern]);
        assert_eq!(e.verdict(&question, Some(40), 3), None);
    }

    #[test]
    fn hot_lead_needs_score_and_confirmed_intent() {
        let e = evaluator(ScriptedLlm::new());
        let buy = intent(Intent::ReadyToBuy, 0.9, vec![]);
        assert_eq!(e.verdict(&buy, Some(80), 2), Some(EscalationTrigger::HotLead));
        assert_eq!(e.verdict(&buy, Some(79), 2), None);
        assert_eq!(e.verdict(&buy, None, 2), None);
        let unsure = intent(Intent::ReadyToBuy, 0.3, vec![]);
        assert_eq!(e.verdict(&unsure, Some(95), 2), None);
    }

    #[test]
    fn warning_signals_escalate() {
        let e = evaluator(ScriptedLlm::new());
        let human = intent(Intent::Unclear, 0.0, vec![WarningSignal::HumanRequested]);
        assert_eq!(e.verdict(&human, None, 1), Some(EscalationTrigger::HumanRequested));
        let complaint = intent(Intent::Complaint, 0.8, vec![]);
        assert_eq!(e.verdict(&complaint, None, 1), Some(EscalationTrigger::Complaint));
        let stalled = intent(Intent::Objection, 0.8, vec![WarningSignal::StalledNegotiation]);
        assert_eq!(e.verdict(&stalled, Some(60), 6), Some(EscalationTrigger::StalledNegotiation));
        let legal = intent(Intent::Complaint, 0.8, vec![WarningSignal::LegalThreat]);
        assert_eq!(e.verdict(&legal, None, 1), Some(EscalationTrigger::LegalThreat));
    }

    #[test]
    fn turn_budget() {
        let e = evaluator(ScriptedLlm::new());
        let chat = intent(Intent::ProductQuestion, 0.8, vec![]);
        assert_eq!(e.verdict(&chat, Some(60), 15), None);
        assert_eq!(e.verdict(&chat, Some(60), 16), Some(EscalationTrigger::TurnBudgetExceeded));
    }

    #[tokio::test]
    async fn drafts_brief_from_model() {
        let llm = ScriptedLlm::new().on(
            "brief a human sales rep",
            r#"{"suggested_message": "Claire from our team will call you today.", "internal_note": "Ready to sign."}"#,
        );
        let e = evaluator(llm);
        let i = intent(Intent::RequestHuman, 0.9, vec![]);
        let ctx = ExtractedContext::default();
        let d = e
            .should_escalate(EscalationInput {
                message: "Can I talk to a person?",
                history: &[],
                context: &ctx,
                intent: &i,
                score: Some(40),
                turns: 2,
            })
            .await;
        assert!(d.should_escalate);
        assert_eq!(d.urgency, Urgency::High);
        assert_eq!(
            d.suggested_message.as_deref(),
            Some("Claire from our team will call you today.")
        );
        assert_eq!(d.internal_note.as_deref(), Some("Ready to sign."));
    }

    #[tokio::test]
    async fn brief_failure_uses_templates() {
        let e = evaluator(ScriptedLlm::new());
        let i = intent(Intent::Complaint, 0.9, vec![]);
        let ctx = ExtractedContext {
            company: Some("Acme".into()),
            ..Default::default()
        };
        let d = e
            .should_escalate(EscalationInput {
                message: "This is the third time your product broke",
                history: &[],
                context: &ctx,
                intent: &i,
                score: None,
                turns: 4,
            })
            .await;
        assert!(d.should_escalate);
        assert_eq!(d.suggested_message.as_deref(), Some(HOLDING_MESSAGE));
        assert!(d.internal_note.unwrap().contains("Acme"));
    }

    #[tokio::test]
    async fn no_verdict_skips_the_model() {
        let llm = Arc::new(ScriptedLlm::new());
        let e = EscalationEvaluator::new(llm.clone(), EscalationConfig::default());
        let i = intent(Intent::Greeting, 0.9, vec![]);
        let ctx = ExtractedContext::default();
        let d = e
            .should_escalate(EscalationInput {
                message: "hi",
                history: &[],
                context: &ctx,
                intent: &i,
                score: None,
                turns: 1,
            })
            .await;
        assert_eq!(d, EscalationDecision::none());
        assert_eq!(llm.request_count(), 0);
    }
}
