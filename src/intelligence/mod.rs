//! Conversation intelligence: extraction, classification, scoring,
//! escalation, and outbound text generation.
//!
//! Every component takes the completion service by injection and degrades
//! to a documented default when it fails.

pub mod classifier;
pub mod escalation;
pub mod extractor;
pub mod reply;
pub mod scoring;

pub use classifier::{
    Intent, IntentAnalysis, IntentClassifier, RecommendedAction, Urgency, WarningSignal,
};
pub use escalation::{
    EscalationConfig, EscalationDecision, EscalationEvaluator, EscalationInput, EscalationTrigger,
};
pub use extractor::{ContextExtractor, ExtractionResult};
pub use reply::{FALLBACK_REPLY, FollowUpDraft, GeneratedReply, NudgeContext, ReplyGenerator};
pub use scoring::{
    Criterion, CriterionScore, QualificationLabel, QualificationScorer, Rubric, ScoreBreakdown,
};
