//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::compliance::{BlacklistEntry, BlacklistScope};
use crate::contacts::{AgentProfile, Contact, ContactStatus, Message};
use crate::error::DatabaseError;

/// Read-side predicate over an agent's contacts. Unset fields don't filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactFilter {
    pub agent_id: String,
    pub min_score: Option<u8>,
    pub max_score: Option<u8>,
    pub status: Option<ContactStatus>,
    /// Tag identifier the contact must carry.
    pub tag: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Silence anchor (last inbound, else creation) at or before this instant.
    pub silent_since: Option<DateTime<Utc>>,
    /// Silence anchor strictly after this instant.
    pub active_since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl ContactFilter {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }
}

/// Backend-agnostic database trait covering agents, contacts, messages, and
/// the blacklist.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Agents ──────────────────────────────────────────────────────

    async fn upsert_agent(&self, agent: &AgentProfile) -> Result<(), DatabaseError>;

    async fn get_agent(&self, id: &str) -> Result<Option<AgentProfile>, DatabaseError>;

    async fn list_agent_ids(&self) -> Result<Vec<String>, DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Insert a contact unless one already exists for `(agent_id, phone)`.
    /// Returns whether a row was created.
    async fn insert_contact_if_absent(&self, contact: &Contact) -> Result<bool, DatabaseError>;

    async fn get_contact(
        &self,
        agent_id: &str,
        phone: &str,
    ) -> Result<Option<Contact>, DatabaseError>;

    /// Write every mutable field of an existing contact, keyed by
    /// `(agent_id, phone)`.
    async fn save_contact(&self, contact: &Contact) -> Result<(), DatabaseError>;

    /// Set a contact's status. Opted-out contacts are never moved by this call
    /// except to `opted_out` itself. Returns whether a row changed.
    async fn set_contact_status(
        &self,
        agent_id: &str,
        phone: &str,
        status: ContactStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Move an opted-out contact back to `contacted`.
    async fn reopen_opted_out(
        &self,
        agent_id: &str,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Contacts matching `filter`, most recently created first.
    async fn list_contacts(&self, filter: &ContactFilter) -> Result<Vec<Contact>, DatabaseError>;

    /// Record a delivered follow-up: bump `follow_up_count` from
    /// `expected_count`, stamp `last_follow_up_at`, and append `message`.
    ///
    /// The counter update is conditional on the stored count still being
    /// `expected_count`; when it is not, nothing is written and `false` is
    /// returned.
    async fn record_follow_up(
        &self,
        expected_count: u8,
        message: &Message,
    ) -> Result<bool, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError>;

    /// The most recent `limit` messages for a contact, oldest first.
    async fn recent_messages(
        &self,
        agent_id: &str,
        phone: &str,
        limit: u32,
    ) -> Result<Vec<Message>, DatabaseError>;

    async fn count_inbound_messages(&self, agent_id: &str, phone: &str)
    -> Result<u32, DatabaseError>;

    // ── Blacklist ───────────────────────────────────────────────────

    /// Insert or refresh an entry. On conflict the reason, source and
    /// `updated_at` are replaced and `created_at` is kept.
    async fn upsert_blacklist(&self, entry: &BlacklistEntry) -> Result<(), DatabaseError>;

    async fn get_blacklist_entry(
        &self,
        phone: &str,
        scope: &BlacklistScope,
    ) -> Result<Option<BlacklistEntry>, DatabaseError>;

    /// Global entries plus those scoped to `agent_id`, newest first.
    async fn list_blacklist(&self, agent_id: &str) -> Result<Vec<BlacklistEntry>, DatabaseError>;

    /// Copy an entry to the archive and delete it. Returns `false` if absent.
    async fn archive_blacklist_entry(
        &self,
        phone: &str,
        scope: &BlacklistScope,
        removed_by: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    async fn count_archived_blacklist(&self, phone: &str) -> Result<u64, DatabaseError>;
}
