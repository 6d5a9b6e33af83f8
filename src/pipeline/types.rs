//! Shared types for the inbound message pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contacts::ContactStatus;
use crate::intelligence::{EscalationDecision, Intent, QualificationLabel, ScoreBreakdown};

// ── Inbound message ─────────────────────────────────────────────────

/// One SMS received from a lead on an agent's number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub agent_id: String,
    /// Sender number as received; normalized by the pipeline.
    pub phone: String,
    pub body: String,
    /// Defaults to the time the event is handled.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

// ── Outcome ─────────────────────────────────────────────────────────

/// What the pipeline did with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineAction {
    /// Opt-out keyword detected; contact blacklisted for this agent.
    OptedOut,
    /// Number is blacklisted; message stored, nothing else done.
    Blocked,
    /// Handed to a human with a holding message.
    Escalated,
    /// Auto-reply sent.
    Replied,
    /// Analysed but nothing sent (automation off or contact not eligible).
    NoReply,
}

impl PipelineAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::OptedOut => "opted_out",
            Self::Blocked => "blocked",
            Self::Escalated => "escalated",
            Self::Replied => "replied",
            Self::NoReply => "no_reply",
        }
    }
}

/// Result of processing one inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub agent_id: String,
    /// Normalized E.164 number.
    pub phone: String,
    pub action: PipelineAction,
    pub status: ContactStatus,
    pub intent: Option<Intent>,
    pub score: Option<ScoreBreakdown>,
    pub label: QualificationLabel,
    pub tags: Vec<String>,
    pub escalation: Option<EscalationDecision>,
    /// Text sent back to the lead, if any.
    pub reply: Option<String>,
    /// Facts learned from this message.
    pub new_facts: Vec<(String, String)>,
}

// ── Bulk import ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRow {
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Per-batch import counts. Invalid rows are reported, not fatal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub existing: usize,
    pub blacklisted: usize,
    pub invalid: usize,
    /// `(raw input, reason)` for each rejected row.
    pub rejected: Vec<(String, String)>,
}
