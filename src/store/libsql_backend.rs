//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Writes that must not race
//! are single conditional statements. Where two statements must land
//! together (follow-up bookkeeping, blacklist archiving) they run in a
//! transaction on the shared connection, one transaction at a time.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, Value, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::compliance::{BlacklistEntry, BlacklistScope, BlacklistSource};
use crate::contacts::{AgentProfile, Contact, ContactStatus, Message, MessageKind, MessageRole};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{ContactFilter, Database};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Held while a transaction is open on `conn`.
    tx_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            tx_lock: Mutex::new(()),
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            tx_lock: Mutex::new(()),
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width, so text order is time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> Value {
    match dt {
        Some(dt) => Value::Text(ts(dt)),
        None => Value::Null,
    }
}

fn opt_int(n: Option<u8>) -> Value {
    match n {
        Some(n) => Value::Integer(i64::from(n)),
        None => Value::Null,
    }
}

fn query_err(op: &'static str) -> impl FnOnce(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Commit on success, roll back on any error.
async fn finish_tx<T>(
    tx: Transaction,
    op: &'static str,
    result: Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(query_err(op))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(op, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

const CONTACT_COLUMNS: &str = "agent_id, phone, name, status, score, follow_up_count, \
     last_message_at, last_follow_up_at, context, tags, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, agent_id, phone, role, kind, content, created_at";

const BLACKLIST_COLUMNS: &str = "phone, agent_id, reason, source, created_at, updated_at";

/// Map a libsql Row to a Contact. Column order matches CONTACT_COLUMNS.
fn row_to_contact(row: &libsql::Row) -> Result<Contact, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("contact row parse: {e}"));

    let status_str: String = row.get(3).map_err(get_err)?;
    let status = status_str
        .parse::<ContactStatus>()
        .map_err(DatabaseError::Serialization)?;
    let score: Option<i64> = row.get(4).map_err(get_err)?;
    let follow_up_count: i64 = row.get(5).map_err(get_err)?;
    let context_json: String = row.get(8).map_err(get_err)?;
    let tags_json: String = row.get(9).map_err(get_err)?;
    let created_str: String = row.get(10).map_err(get_err)?;
    let updated_str: String = row.get(11).map_err(get_err)?;

    Ok(Contact {
        agent_id: row.get(0).map_err(get_err)?,
        phone: row.get(1).map_err(get_err)?,
        name: row.get(2).map_err(get_err)?,
        status,
        score: score.map(|s| s.clamp(0, 100) as u8),
        follow_up_count: follow_up_count.clamp(0, i64::from(u8::MAX)) as u8,
        last_message_at: parse_optional_datetime(row.get(6).map_err(get_err)?),
        last_follow_up_at: parse_optional_datetime(row.get(7).map_err(get_err)?),
        context: serde_json::from_str(&context_json)?,
        tags: serde_json::from_str(&tags_json)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("message row parse: {e}"));
    let role: String = row.get(3).map_err(get_err)?;
    let kind: String = row.get(4).map_err(get_err)?;
    let created_str: String = row.get(6).map_err(get_err)?;

    Ok(Message {
        id: row.get(0).map_err(get_err)?,
        agent_id: row.get(1).map_err(get_err)?,
        phone: row.get(2).map_err(get_err)?,
        role: MessageRole::parse(&role),
        kind: MessageKind::parse(&kind),
        content: row.get(5).map_err(get_err)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_blacklist(row: &libsql::Row) -> Result<BlacklistEntry, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("blacklist row parse: {e}"));
    let agent_key: String = row.get(1).map_err(get_err)?;
    let source: String = row.get(3).map_err(get_err)?;
    let created_str: String = row.get(4).map_err(get_err)?;
    let updated_str: String = row.get(5).map_err(get_err)?;

    Ok(BlacklistEntry {
        phone: row.get(0).map_err(get_err)?,
        scope: BlacklistScope::from_key(&agent_key),
        reason: row.get(2).map_err(get_err)?,
        source: BlacklistSource::parse(&source),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Translate a filter into a WHERE clause and its positional parameters.
fn contact_filter_sql(filter: &ContactFilter) -> (String, Vec<Value>) {
    let mut clauses = vec!["agent_id = ?".to_string()];
    let mut values = vec![Value::Text(filter.agent_id.clone())];

    if let Some(min) = filter.min_score {
        clauses.push("score IS NOT NULL AND score >= ?".into());
        values.push(Value::Integer(i64::from(min)));
    }
    if let Some(max) = filter.max_score {
        clauses.push("score IS NOT NULL AND score <= ?".into());
        values.push(Value::Integer(i64::from(max)));
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?".into());
        values.push(Value::Text(status.as_str().into()));
    }
    if let Some(tag) = &filter.tag {
        clauses.push("EXISTS (SELECT 1 FROM json_each(contacts.tags) WHERE value = ?)".into());
        values.push(Value::Text(tag.clone()));
    }
    if let Some(after) = filter.created_after {
        clauses.push("created_at >= ?".into());
        values.push(Value::Text(ts(after)));
    }
    if let Some(before) = filter.created_before {
        clauses.push("created_at < ?".into());
        values.push(Value::Text(ts(before)));
    }
    if let Some(silent) = filter.silent_since {
        clauses.push("COALESCE(last_message_at, created_at) <= ?".into());
        values.push(Value::Text(ts(silent)));
    }
    if let Some(active) = filter.active_since {
        clauses.push("COALESCE(last_message_at, created_at) > ?".into());
        values.push(Value::Text(ts(active)));
    }

    let mut sql = format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE {} ORDER BY created_at DESC, phone",
        clauses.join(" AND ")
    );
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(i64::from(limit)));
    }
    (sql, values)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Agents ──────────────────────────────────────────────────────

    async fn upsert_agent(&self, agent: &AgentProfile) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO agents (id, name, from_number, webhook_url) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    from_number = excluded.from_number,
                    webhook_url = excluded.webhook_url",
                params![
                    agent.id.as_str(),
                    agent.name.as_str(),
                    agent.from_number.as_str(),
                    opt_text(agent.webhook_url.as_deref()),
                ],
            )
            .await
            .map_err(query_err("upsert_agent"))?;
        debug!(agent = %agent.id, "Agent upserted");
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<AgentProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, from_number, webhook_url FROM agents WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(query_err("get_agent"))?;

        match rows.next().await.map_err(query_err("get_agent"))? {
            Some(row) => {
                let get_err = query_err("get_agent row parse");
                let agent = (|| -> Result<AgentProfile, libsql::Error> {
                    Ok(AgentProfile {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        from_number: row.get(2)?,
                        webhook_url: row.get(3)?,
                    })
                })()
                .map_err(get_err)?;
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    async fn list_agent_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id FROM agents ORDER BY id", ())
            .await
            .map_err(query_err("list_agent_ids"))?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_agent_ids"))? {
            ids.push(row.get::<String>(0).map_err(query_err("list_agent_ids row parse"))?);
        }
        Ok(ids)
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn insert_contact_if_absent(&self, contact: &Contact) -> Result<bool, DatabaseError> {
        let context = serde_json::to_string(&contact.context)?;
        let tags = serde_json::to_string(&contact.tags)?;
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO contacts ({CONTACT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    contact.agent_id.as_str(),
                    contact.phone.as_str(),
                    opt_text(contact.name.as_deref()),
                    contact.status.as_str(),
                    opt_int(contact.score),
                    i64::from(contact.follow_up_count),
                    opt_ts(contact.last_message_at),
                    opt_ts(contact.last_follow_up_at),
                    context,
                    tags,
                    ts(contact.created_at),
                    ts(contact.updated_at),
                ],
            )
            .await
            .map_err(query_err("insert_contact_if_absent"))?;

        if inserted > 0 {
            debug!(agent = %contact.agent_id, phone = %contact.phone, "Contact created");
        }
        Ok(inserted > 0)
    }

    async fn get_contact(
        &self,
        agent_id: &str,
        phone: &str,
    ) -> Result<Option<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts WHERE agent_id = ?1 AND phone = ?2"
                ),
                params![agent_id, phone],
            )
            .await
            .map_err(query_err("get_contact"))?;

        match rows.next().await.map_err(query_err("get_contact"))? {
            Some(row) => Ok(Some(row_to_contact(&row)?)),
            None => Ok(None),
        }
    }

    /// Follow-up bookkeeping is owned by `record_follow_up` and is not
    /// written here. A stored `opted_out` status is never replaced.
    async fn save_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
        let context = serde_json::to_string(&contact.context)?;
        let tags = serde_json::to_string(&contact.tags)?;
        let updated = self
            .conn()
            .execute(
                "UPDATE contacts SET
                    name = ?3,
                    status = CASE WHEN status = 'opted_out' THEN status ELSE ?4 END,
                    score = ?5,
                    last_message_at = ?6,
                    context = ?7,
                    tags = ?8,
                    updated_at = ?9
                 WHERE agent_id = ?1 AND phone = ?2",
                params![
                    contact.agent_id.as_str(),
                    contact.phone.as_str(),
                    opt_text(contact.name.as_deref()),
                    contact.status.as_str(),
                    opt_int(contact.score),
                    opt_ts(contact.last_message_at),
                    context,
                    tags,
                    ts(contact.updated_at),
                ],
            )
            .await
            .map_err(query_err("save_contact"))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "contact".into(),
                id: format!("{}/{}", contact.agent_id, contact.phone),
            });
        }
        Ok(())
    }

    async fn set_contact_status(
        &self,
        agent_id: &str,
        phone: &str,
        status: ContactStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE contacts SET status = ?3, updated_at = ?4
                 WHERE agent_id = ?1 AND phone = ?2
                   AND status != ?3
                   AND (status != 'opted_out' OR ?3 = 'opted_out')",
                params![agent_id, phone, status.as_str(), ts(now)],
            )
            .await
            .map_err(query_err("set_contact_status"))?;
        Ok(updated > 0)
    }

    async fn reopen_opted_out(
        &self,
        agent_id: &str,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE contacts SET status = 'contacted', updated_at = ?3
                 WHERE agent_id = ?1 AND phone = ?2 AND status = 'opted_out'",
                params![agent_id, phone, ts(now)],
            )
            .await
            .map_err(query_err("reopen_opted_out"))?;
        Ok(updated > 0)
    }

    async fn list_contacts(&self, filter: &ContactFilter) -> Result<Vec<Contact>, DatabaseError> {
        let (sql, values) = contact_filter_sql(filter);
        let mut rows = self
            .conn()
            .query(&sql, values)
            .await
            .map_err(query_err("list_contacts"))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_contacts"))? {
            contacts.push(row_to_contact(&row)?);
        }
        Ok(contacts)
    }

    async fn record_follow_up(
        &self,
        expected_count: u8,
        message: &Message,
    ) -> Result<bool, DatabaseError> {
        let _serial = self.tx_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(query_err("record_follow_up begin"))?;

        let result: Result<bool, DatabaseError> = async {
            let updated = tx
                .execute(
                    "UPDATE contacts SET
                        follow_up_count = follow_up_count + 1,
                        last_follow_up_at = ?4,
                        updated_at = ?4
                     WHERE agent_id = ?1 AND phone = ?2 AND follow_up_count = ?3",
                    params![
                        message.agent_id.as_str(),
                        message.phone.as_str(),
                        i64::from(expected_count),
                        ts(message.created_at),
                    ],
                )
                .await
                .map_err(query_err("record_follow_up"))?;
            if updated == 0 {
                return Ok(false);
            }
            self.insert_message(message).await?;
            Ok(true)
        }
        .await;
        finish_tx(tx, "record_follow_up commit", result).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    message.id.as_str(),
                    message.agent_id.as_str(),
                    message.phone.as_str(),
                    message.role.as_str(),
                    message.kind.as_str(),
                    message.content.as_str(),
                    ts(message.created_at),
                ],
            )
            .await
            .map_err(query_err("insert_message"))?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        agent_id: &str,
        phone: &str,
        limit: u32,
    ) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE agent_id = ?1 AND phone = ?2
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?3"
                ),
                params![agent_id, phone, i64::from(limit)],
            )
            .await
            .map_err(query_err("recent_messages"))?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("recent_messages"))? {
            messages.push(row_to_message(&row)?);
        }
        messages.reverse();
        Ok(messages)
    }

    async fn count_inbound_messages(
        &self,
        agent_id: &str,
        phone: &str,
    ) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM messages WHERE agent_id = ?1 AND phone = ?2 AND role = 'inbound'",
                params![agent_id, phone],
            )
            .await
            .map_err(query_err("count_inbound_messages"))?;

        match rows.next().await.map_err(query_err("count_inbound_messages"))? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(query_err("count_inbound_messages"))?;
                Ok(u32::try_from(count).unwrap_or(u32::MAX))
            }
            None => Ok(0),
        }
    }

    // ── Blacklist ───────────────────────────────────────────────────

    async fn upsert_blacklist(&self, entry: &BlacklistEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO blacklist ({BLACKLIST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(phone, agent_id) DO UPDATE SET
                        reason = excluded.reason,
                        source = excluded.source,
                        updated_at = excluded.updated_at"
                ),
                params![
                    entry.phone.as_str(),
                    entry.scope.key(),
                    opt_text(entry.reason.as_deref()),
                    entry.source.as_str(),
                    ts(entry.created_at),
                    ts(entry.updated_at),
                ],
            )
            .await
            .map_err(query_err("upsert_blacklist"))?;
        Ok(())
    }

    async fn get_blacklist_entry(
        &self,
        phone: &str,
        scope: &BlacklistScope,
    ) -> Result<Option<BlacklistEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {BLACKLIST_COLUMNS} FROM blacklist WHERE phone = ?1 AND agent_id = ?2"
                ),
                params![phone, scope.key()],
            )
            .await
            .map_err(query_err("get_blacklist_entry"))?;

        match rows.next().await.map_err(query_err("get_blacklist_entry"))? {
            Some(row) => Ok(Some(row_to_blacklist(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_blacklist(&self, agent_id: &str) -> Result<Vec<BlacklistEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {BLACKLIST_COLUMNS} FROM blacklist
                     WHERE agent_id = '' OR agent_id = ?1
                     ORDER BY updated_at DESC, phone"
                ),
                params![agent_id],
            )
            .await
            .map_err(query_err("list_blacklist"))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_blacklist"))? {
            entries.push(row_to_blacklist(&row)?);
        }
        Ok(entries)
    }

    async fn archive_blacklist_entry(
        &self,
        phone: &str,
        scope: &BlacklistScope,
        removed_by: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let _serial = self.tx_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(query_err("archive_blacklist_entry begin"))?;

        let result: Result<bool, DatabaseError> = async {
            let archived = tx
                .execute(
                    "INSERT INTO blacklist_archive
                        (phone, agent_id, reason, source, created_at, removed_at, removed_by, removal_reason)
                     SELECT phone, agent_id, reason, source, created_at, ?3, ?4, ?5
                     FROM blacklist WHERE phone = ?1 AND agent_id = ?2",
                    params![phone, scope.key(), ts(now), removed_by, opt_text(reason)],
                )
                .await
                .map_err(query_err("archive_blacklist_entry"))?;
            if archived == 0 {
                return Ok(false);
            }
            tx.execute(
                "DELETE FROM blacklist WHERE phone = ?1 AND agent_id = ?2",
                params![phone, scope.key()],
            )
            .await
            .map_err(query_err("archive_blacklist_entry delete"))?;
            Ok(true)
        }
        .await;
        finish_tx(tx, "archive_blacklist_entry commit", result).await
    }

    async fn count_archived_blacklist(&self, phone: &str) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM blacklist_archive WHERE phone = ?1",
                params![phone],
            )
            .await
            .map_err(query_err("count_archived_blacklist"))?;

        match rows.next().await.map_err(query_err("count_archived_blacklist"))? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(query_err("count_archived_blacklist"))?;
                Ok(u64::try_from(count).unwrap_or(0))
            }
            None => Ok(0),
        }
    }
}
