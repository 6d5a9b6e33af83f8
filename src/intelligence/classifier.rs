//! Intent & risk classifier for single inbound messages.
//!
//! Intent is advisory: any failure degrades to [`IntentAnalysis::fallback`]
//! and is never returned to the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contacts::Message;
use crate::contacts::model::render_history;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_json};

const CLASSIFY_MAX_TOKENS: u32 = 400;
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Closed set of primary intents. Anything the model invents maps to `Unclear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    PricingInquiry,
    ProductQuestion,
    Objection,
    ReadyToBuy,
    ScheduleMeeting,
    NotInterested,
    RequestHuman,
    Complaint,
    InformationProvided,
    Greeting,
    OptOut,
    #[serde(other)]
    Unclear,
}

impl Intent {
    pub const ALL: &'static [Intent] = &[
        Intent::PricingInquiry,
        Intent::ProductQuestion,
        Intent::Objection,
        Intent::ReadyToBuy,
        Intent::ScheduleMeeting,
        Intent::NotInterested,
        Intent::RequestHuman,
        Intent::Complaint,
        Intent::InformationProvided,
        Intent::Greeting,
        Intent::OptOut,
        Intent::Unclear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PricingInquiry => "pricing_inquiry",
            Self::ProductQuestion => "product_question",
            Self::Objection => "objection",
            Self::ReadyToBuy => "ready_to_buy",
            Self::ScheduleMeeting => "schedule_meeting",
            Self::NotInterested => "not_interested",
            Self::RequestHuman => "request_human",
            Self::Complaint => "complaint",
            Self::InformationProvided => "information_provided",
            Self::Greeting => "greeting",
            Self::OptOut => "opt_out",
            Self::Unclear => "unclear",
        }
    }

    /// Intents that signal a purchase decision.
    pub fn is_buying(&self) -> bool {
        matches!(self, Self::ReadyToBuy | Self::ScheduleMeeting)
    }
}

/// Risk signals that may require a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSignal {
    HumanRequested,
    Complaint,
    StalledNegotiation,
    CompetitorMentioned,
    BudgetConcern,
    Frustration,
    LegalThreat,
    #[serde(other)]
    Other,
}

/// Ordered from least to most pressing; unknown values read as `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl From<String> for Urgency {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

/// Unknown values read as `Respond`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum RecommendedAction {
    #[default]
    Respond,
    Escalate,
    Nurture,
    Close,
}

impl From<String> for RecommendedAction {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "escalate" => Self::Escalate,
            "nurture" => Self::Nurture,
            "close" => Self::Close,
            _ => Self::Respond,
        }
    }
}

/// Classification of one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub primary_intent: Intent,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub secondary_intents: Vec<Intent>,
    #[serde(default)]
    pub buying_signals: Vec<String>,
    #[serde(default)]
    pub warning_signals: Vec<WarningSignal>,
    #[serde(default)]
    pub recommended_action: RecommendedAction,
    #[serde(default)]
    pub urgency: Urgency,
}

impl IntentAnalysis {
    /// The value used whenever classification fails.
    pub fn fallback() -> Self {
        Self {
            primary_intent: Intent::Unclear,
            confidence: 0.0,
            secondary_intents: Vec::new(),
            buying_signals: Vec::new(),
            warning_signals: Vec::new(),
            recommended_action: RecommendedAction::Respond,
            urgency: Urgency::Medium,
        }
    }

    pub fn has_warning(&self, signal: WarningSignal) -> bool {
        self.warning_signals.contains(&signal)
    }

    /// Buying intent stated with at least `min_confidence`.
    pub fn confirms_buying(&self, min_confidence: f32) -> bool {
        self.primary_intent.is_buying() && self.confidence >= min_confidence
    }

    fn sanitized(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.secondary_intents.retain(|i| *i != self.primary_intent);
        self.secondary_intents.dedup();
        self.buying_signals.retain(|s| !s.trim().is_empty());
        self.warning_signals.dedup();
        self
    }
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Classify `message` in the light of `recent_history` (oldest first).
    pub async fn classify(&self, message: &str, recent_history: &[Message]) -> IntentAnalysis {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(build_classify_user_prompt(message, recent_history)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        match complete_json::<IntentAnalysis>(self.llm.as_ref(), request).await {
            Ok(analysis) => {
                let analysis = analysis.sanitized();
                debug!(
                    intent = analysis.primary_intent.as_str(),
                    confidence = analysis.confidence,
                    urgency = analysis.urgency.as_str(),
                    warnings = analysis.warning_signals.len(),
                    "Message classified"
                );
                analysis
            }
            Err(e) => {
                warn!(error = %e, "Intent classification failed, using fallback");
                IntentAnalysis::fallback()
            }
        }
    }
}

fn build_classify_system_prompt() -> String {
    let intents = Intent::ALL
        .iter()
        .map(|i| i.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"You classify the intent of an inbound SMS from a sales lead.

Return ONLY a JSON object:
{{
  "primary_intent": one of [{intents}],
  "confidence": 0.0-1.0,
  "secondary_intents": [...same values...],
  "buying_signals": ["short phrases showing purchase readiness"],
  "warning_signals": [any of "human_requested", "complaint", "stalled_negotiation", "competitor_mentioned", "budget_concern", "frustration", "legal_threat"],
  "recommended_action": "respond" | "escalate" | "nurture" | "close",
  "urgency": "low" | "medium" | "high" | "critical"
}}

Guidelines:
- human_requested only when the lead explicitly asks for a person.
- stalled_negotiation when the lead keeps deferring after pricing was discussed.
- Routine qualification questions are not warnings."#
    )
}

fn build_classify_user_prompt(message: &str, recent_history: &[Message]) -> String {
    let mut prompt = String::with_capacity(1024);
    if !recent_history.is_empty() {
        prompt.push_str("Recent conversation:\n");
        prompt.push_str(&render_history(recent_history, 200));
        prompt.push('\n');
    }
    let preview: String = message.chars().take(1000).collect();
    prompt.push_str(&format!("Message to classify:\n{preview}"));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedLlm;

    fn classifier(response: &str) -> IntentClassifier {
        IntentClassifier::new(Arc::new(ScriptedLlm::new().on("classify the intent", response)))
    }

    #[tokio::test]
    async fn parses_full_analysis() {
        let c = classifier(
            r#"{"primary_intent": "ready_to_buy", "confidence": 0.92,
                "secondary_intents": ["pricing_inquiry"],
                "buying_signals": ["send the contract"],
                "warning_signals": [], "recommended_action": "escalate", "urgency": "high"}"#,
        );
        let a = c.classify("Send me the contract today", &[]).await;
        assert_eq!(a.primary_intent, Intent::ReadyToBuy);
        assert!(a.confirms_buying(0.6));
        assert_eq!(a.recommended_action, RecommendedAction::Escalate);
        assert_eq!(a.urgency, Urgency::High);
    }

    #[tokio::test]
    async fn unknown_values_collapse_to_closed_sets() {
        let c = classifier(
            r#"{"primary_intent": "wants_discount", "confidence": 1.7,
                "warning_signals": ["human_requested", "weird_vibes"], "urgency": "asap",
                "recommended_action": "call_them_now"}"#,
        );
        let a = c.classify("can I talk to someone", &[]).await;
        assert_eq!(a.primary_intent, Intent::Unclear);
        assert_eq!(a.confidence, 1.0);
        assert_eq!(a.warning_signals, vec![WarningSignal::HumanRequested, WarningSignal::Other]);
        assert_eq!(a.urgency, Urgency::Medium);
        assert_eq!(a.recommended_action, RecommendedAction::Respond);
    }

    #[test]
    fn urgency_keeps_its_order_and_wire_names() {
        assert!(Urgency::Low < Urgency::Medium);
        assert!(Urgency::High < Urgency::Critical);
        assert_eq!(Urgency::High.max(Urgency::Medium), Urgency::High);

        let parsed: Urgency = serde_json::from_str(r#""CRITICAL""#).unwrap();
        assert_eq!(parsed, Urgency::Critical);
        assert_eq!(serde_json::to_string(&Urgency::Low).unwrap(), r#""low""#);
        assert_eq!(
            serde_json::to_string(&RecommendedAction::Nurture).unwrap(),
            r#""nurture""#
        );
    }

    #[tokio::test]
    async fn service_failure_falls_back() {
        let c = IntentClassifier::new(Arc::new(ScriptedLlm::new()));
        assert_eq!(c.classify("hi", &[]).await, IntentAnalysis::fallback());
    }

    #[tokio::test]
    async fn garbage_output_falls_back() {
        let c = classifier("sorry, I can't help with that");
        let a = c.classify("hi", &[]).await;
        assert_eq!(a.primary_intent, Intent::Unclear);
        assert_eq!(a.confidence, 0.0);
        assert!(a.buying_signals.is_empty());
        assert!(a.warning_signals.is_empty());
        assert_eq!(a.urgency, Urgency::Medium);
    }

    #[test]
    fn system_prompt_lists_every_intent() {
        let prompt = build_classify_system_prompt();
        for intent in Intent::ALL {
            assert!(prompt.contains(intent.as_str()));
        }
    }
}
