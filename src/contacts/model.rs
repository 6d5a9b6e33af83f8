//! Contact, message, and agent records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::ExtractedContext;
use super::tags::TagSet;

/// Maximum number of automated nudges per contact.
pub const MAX_FOLLOW_UPS: u8 = 3;

// ── Lifecycle ───────────────────────────────────────────────────────

/// Lifecycle status of a contact.
///
/// `pending → contacted → {qualified | disqualified | opted_out | escalated}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Pending,
    Contacted,
    Qualified,
    Disqualified,
    OptedOut,
    Escalated,
}

/// Events that drive lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Any automated or manual outbound message was delivered.
    OutboundSent,
    /// Hot score with confirmed buying intent or a booked meeting.
    Qualified,
    /// Follow-up budget exhausted with no positive signal.
    FollowUpsExhausted,
    /// Compliance gate detected an opt-out request.
    OptedOut,
    /// Escalation evaluator handed the contact to a human.
    Escalated,
    /// A disqualified contact wrote back.
    Reengaged,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Disqualified => "disqualified",
            Self::OptedOut => "opted_out",
            Self::Escalated => "escalated",
        }
    }

    /// Opted-out contacts never leave that state through automation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::OptedOut)
    }

    /// Whether the pipeline may message this contact without a human.
    pub fn allows_automation(&self) -> bool {
        !matches!(self, Self::OptedOut | Self::Escalated)
    }

    /// Apply a lifecycle event. Events that don't apply leave the status unchanged.
    pub fn transition(self, event: LifecycleEvent) -> Self {
        use ContactStatus::*;
        use LifecycleEvent as E;

        if self.is_terminal() {
            return self;
        }
        match (self, event) {
            (_, E::OptedOut) => OptedOut,
            (_, E::Escalated) => Escalated,
            (Pending, E::OutboundSent) => Contacted,
            (Pending | Contacted, E::Qualified) => Qualified,
            (Contacted, E::FollowUpsExhausted) => Disqualified,
            (Disqualified, E::Reengaged) => Contacted,
            (status, _) => status,
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "contacted" => Ok(Self::Contacted),
            "qualified" => Ok(Self::Qualified),
            "disqualified" => Ok(Self::Disqualified),
            "opted_out" => Ok(Self::OptedOut),
            "escalated" => Ok(Self::Escalated),
            other => Err(format!("unknown contact status '{other}'")),
        }
    }
}

// ── Contact ─────────────────────────────────────────────────────────

/// One lead, keyed by `(agent_id, phone)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub agent_id: String,
    /// E.164 phone number.
    pub phone: String,
    pub name: Option<String>,
    pub status: ContactStatus,
    /// Latest qualification score (0–100), unset until first scored.
    pub score: Option<u8>,
    pub follow_up_count: u8,
    /// Last inbound message from the contact.
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_follow_up_at: Option<DateTime<Utc>>,
    pub context: ExtractedContext,
    pub tags: TagSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(agent_id: impl Into<String>, phone: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            phone: phone.into(),
            name: None,
            status: ContactStatus::Pending,
            score: None,
            follow_up_count: 0,
            last_message_at: None,
            last_follow_up_at: None,
            context: ExtractedContext::default(),
            tags: TagSet::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reference point for silence: last inbound message, else creation.
    pub fn silence_anchor(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }

    /// Whether the lead wrote after the most recent nudge.
    pub fn replied_since_last_follow_up(&self) -> bool {
        match (self.last_message_at, self.last_follow_up_at) {
            (Some(inbound), Some(nudge)) => inbound > nudge,
            _ => false,
        }
    }
}

// ── Messages ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Inbound,
    Outbound,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "outbound" {
            Self::Outbound
        } else {
            Self::Inbound
        }
    }
}

/// What produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Conversation,
    AutoReply,
    FollowUp,
    Escalation,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::AutoReply => "auto_reply",
            Self::FollowUp => "follow_up",
            Self::Escalation => "escalation",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "auto_reply" => Self::AutoReply,
            "follow_up" => Self::FollowUp,
            "escalation" => Self::Escalation,
            _ => Self::Conversation,
        }
    }
}

/// Immutable conversation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub agent_id: String,
    pub phone: String,
    pub role: MessageRole,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        agent_id: &str,
        phone: &str,
        role: MessageRole,
        kind: MessageKind,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            phone: phone.to_string(),
            role,
            kind,
            content: content.into(),
            created_at,
        }
    }

    pub fn inbound(
        agent_id: &str,
        phone: &str,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(agent_id, phone, MessageRole::Inbound, MessageKind::Conversation, content, at)
    }

    pub fn outbound(
        agent_id: &str,
        phone: &str,
        kind: MessageKind,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(agent_id, phone, MessageRole::Outbound, kind, content, at)
    }
}

/// Render a conversation tail for prompts, oldest first.
pub fn render_history(history: &[Message], max_chars_per_message: usize) -> String {
    let mut out = String::new();
    for msg in history {
        let who = match msg.role {
            MessageRole::Inbound => "Lead",
            MessageRole::Outbound => "Agent",
        };
        let preview: String = msg.content.chars().take(max_chars_per_message).collect();
        let stamp = msg.created_at.format("%Y-%m-%d %H:%M");
        out.push_str(&format!("[{stamp}] {who}: {preview}\n"));
    }
    out
}

// ── Agents ──────────────────────────────────────────────────────────

/// The owner of a set of contacts (a sales rep or business line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    /// Business or rep name used in generated messages.
    pub name: String,
    /// Sender number for outbound SMS.
    pub from_number: String,
    /// Escalation notifications are posted here when set.
    pub webhook_url: Option<String>,
}
