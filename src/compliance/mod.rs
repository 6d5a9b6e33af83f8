//! Compliance gate: blacklist checks and opt-out handling.
//!
//! Every inbound message and every outbound send passes through here first.
//! A global blacklist entry blocks a number for every agent; an agent-scoped
//! entry blocks it for that agent only. Removals are copied to an archive
//! table before the live row is deleted.

pub mod keywords;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contacts::ContactStatus;
use crate::error::DatabaseError;
use crate::store::Database;

pub use keywords::{OPT_OUT_KEYWORDS, OptOutDetection, detect_opt_out};

/// Who a blacklist entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "agent_id", rename_all = "snake_case")]
pub enum BlacklistScope {
    Global,
    Agent(String),
}

impl BlacklistScope {
    /// Storage key: empty for global, the agent id otherwise.
    pub fn key(&self) -> &str {
        match self {
            Self::Global => "",
            Self::Agent(id) => id,
        }
    }

    pub fn from_key(key: &str) -> Self {
        if key.is_empty() {
            Self::Global
        } else {
            Self::Agent(key.to_string())
        }
    }
}

impl fmt::Display for BlacklistScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

/// How a number ended up on the blacklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistSource {
    OptOutKeyword,
    Manual,
    Import,
}

impl BlacklistSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptOutKeyword => "opt_out_keyword",
            Self::Manual => "manual",
            Self::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "opt_out_keyword" => Self::OptOutKeyword,
            "import" => Self::Import,
            _ => Self::Manual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub phone: String,
    pub scope: BlacklistScope,
    pub reason: Option<String>,
    pub source: BlacklistSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a blacklist lookup. Global hits are reported before agent hits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockStatus {
    pub blocked: bool,
    pub scope: Option<BlacklistScope>,
    pub reason: Option<String>,
}

impl BlockStatus {
    fn clear() -> Self {
        Self {
            blocked: false,
            scope: None,
            reason: None,
        }
    }

    fn from_entry(entry: BlacklistEntry) -> Self {
        Self {
            blocked: true,
            scope: Some(entry.scope),
            reason: entry.reason,
        }
    }
}

/// Blacklist and opt-out operations over an injected store.
#[derive(Clone)]
pub struct ComplianceGate {
    db: Arc<dyn Database>,
}

impl ComplianceGate {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Whether `phone` may be messaged on behalf of `agent_id`.
    pub async fn check_blocked(
        &self,
        phone: &str,
        agent_id: &str,
    ) -> Result<BlockStatus, DatabaseError> {
        if let Some(entry) = self
            .db
            .get_blacklist_entry(phone, &BlacklistScope::Global)
            .await?
        {
            return Ok(BlockStatus::from_entry(entry));
        }
        let scope = BlacklistScope::Agent(agent_id.to_string());
        Ok(match self.db.get_blacklist_entry(phone, &scope).await? {
            Some(entry) => BlockStatus::from_entry(entry),
            None => BlockStatus::clear(),
        })
    }

    /// Record an opt-out: blacklist the number for this agent and move the
    /// contact to `opted_out`. Safe to call twice for the same number.
    pub async fn handle_opt_out(
        &self,
        phone: &str,
        agent_id: &str,
        keyword: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.block(
            phone,
            BlacklistScope::Agent(agent_id.to_string()),
            Some(format!("opt-out keyword '{keyword}'")),
            BlacklistSource::OptOutKeyword,
            now,
        )
        .await?;
        let changed = self
            .db
            .set_contact_status(agent_id, phone, ContactStatus::OptedOut, now)
            .await?;
        info!(
            agent = %agent_id,
            phone = %phone,
            keyword,
            contact_updated = changed,
            "Contact opted out"
        );
        Ok(())
    }

    /// Add or refresh a blacklist entry. An existing entry keeps its
    /// `created_at`; reason and source take the latest values.
    pub async fn block(
        &self,
        phone: &str,
        scope: BlacklistScope,
        reason: Option<String>,
        source: BlacklistSource,
        now: DateTime<Utc>,
    ) -> Result<BlacklistEntry, DatabaseError> {
        let entry = BlacklistEntry {
            phone: phone.to_string(),
            scope,
            reason,
            source,
            created_at: now,
            updated_at: now,
        };
        self.db.upsert_blacklist(&entry).await?;
        debug!(
            phone = %phone,
            scope = %entry.scope,
            source = entry.source.as_str(),
            "Blacklist entry upserted"
        );
        Ok(entry)
    }

    /// Remove a blacklist entry, archiving it first. Returns `false` when no
    /// entry existed. Lifting an agent-scoped entry also reopens the contact
    /// if it was opted out.
    pub async fn unblock(
        &self,
        phone: &str,
        scope: &BlacklistScope,
        removed_by: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let removed = self
            .db
            .archive_blacklist_entry(phone, scope, removed_by, reason, now)
            .await?;
        if !removed {
            return Ok(false);
        }
        if let BlacklistScope::Agent(agent_id) = scope {
            self.db.reopen_opted_out(agent_id, phone, now).await?;
        }
        info!(phone = %phone, scope = %scope, removed_by, "Blacklist entry removed");
        Ok(true)
    }

    /// Entries that affect `agent_id`: global ones plus the agent's own.
    pub async fn list_blocked(&self, agent_id: &str) -> Result<Vec<BlacklistEntry>, DatabaseError> {
        self.db.list_blacklist(agent_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::Contact;
    use crate::store::LibSqlBackend;

    const PHONE: &str = "+33612345678";

    async fn gate() -> (ComplianceGate, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        (ComplianceGate::new(db.clone()), db)
    }

    #[tokio::test]
    async fn global_block_applies_to_every_agent() {
        let (gate, _) = gate().await;
        gate.block(
            PHONE,
            BlacklistScope::Global,
            Some("carrier complaint".into()),
            BlacklistSource::Manual,
            Utc::now(),
        )
        .await
        .unwrap();

        for agent in ["a1", "a2"] {
            let status = gate.check_blocked(PHONE, agent).await.unwrap();
            assert!(status.blocked);
            assert_eq!(status.scope, Some(BlacklistScope::Global));
        }
    }

    #[tokio::test]
    async fn agent_block_is_scoped() {
        let (gate, _) = gate().await;
        gate.block(
            PHONE,
            BlacklistScope::Agent("a1".into()),
            None,
            BlacklistSource::Manual,
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(gate.check_blocked(PHONE, "a1").await.unwrap().blocked);
        assert!(!gate.check_blocked(PHONE, "a2").await.unwrap().blocked);
    }

    #[tokio::test]
    async fn global_reported_before_agent() {
        let (gate, _) = gate().await;
        let now = Utc::now();
        gate.block(
            PHONE,
            BlacklistScope::Agent("a1".into()),
            Some("agent".into()),
            BlacklistSource::Manual,
            now,
        )
        .await
        .unwrap();
        gate.block(
            PHONE,
            BlacklistScope::Global,
            Some("global".into()),
            BlacklistSource::Manual,
            now,
        )
        .await
        .unwrap();

        let status = gate.check_blocked(PHONE, "a1").await.unwrap();
        assert_eq!(status.scope, Some(BlacklistScope::Global));
        assert_eq!(status.reason.as_deref(), Some("global"));
    }

    #[tokio::test]
    async fn concurrent_opt_outs_converge() {
        let (gate, db) = gate().await;
        let now = Utc::now();
        db.insert_contact_if_absent(&Contact::new("a1", PHONE, now)).await.unwrap();

        let (a, b) = tokio::join!(
            gate.handle_opt_out(PHONE, "a1", "stop", now),
            gate.handle_opt_out(PHONE, "a1", "stop", now),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(gate.list_blocked("a1").await.unwrap().len(), 1);
        let contact = db.get_contact("a1", PHONE).await.unwrap().unwrap();
        assert_eq!(contact.status, ContactStatus::OptedOut);
    }

    #[tokio::test]
    async fn unblock_archives_and_reopens() {
        let (gate, db) = gate().await;
        let now = Utc::now();
        db.insert_contact_if_absent(&Contact::new("a1", PHONE, now)).await.unwrap();
        gate.handle_opt_out(PHONE, "a1", "stop", now).await.unwrap();

        let scope = BlacklistScope::Agent("a1".into());
        let removed = gate
            .unblock(PHONE, &scope, "ops@example.com", Some("customer asked back in"), now)
            .await
            .unwrap();
        assert!(removed);
        assert!(!gate.check_blocked(PHONE, "a1").await.unwrap().blocked);
        assert_eq!(db.count_archived_blacklist(PHONE).await.unwrap(), 1);

        let contact = db.get_contact("a1", PHONE).await.unwrap().unwrap();
        assert_eq!(contact.status, ContactStatus::Contacted);

        assert!(!gate.unblock(PHONE, &scope, "ops@example.com", None, now).await.unwrap());
    }

    #[test]
    fn scope_key_roundtrip() {
        assert_eq!(BlacklistScope::from_key(""), BlacklistScope::Global);
        let agent = BlacklistScope::Agent("a1".into());
        assert_eq!(BlacklistScope::from_key(agent.key()), agent);
    }
}
