//! Schema migrations, tracked in `_migrations`.
//!
//! Each step runs inside its own transaction together with the row that
//! records it, so a crash mid-step leaves the previous version in place.

use chrono::{SecondsFormat, Utc};
use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only; versions must stay strictly increasing.
///
/// Timestamps are RFC 3339 UTC with fixed microsecond precision so that
/// text comparison orders them chronologically.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                from_number TEXT NOT NULL,
                webhook_url TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS contacts (
                agent_id TEXT NOT NULL,
                phone TEXT NOT NULL,
                name TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                score INTEGER,
                follow_up_count INTEGER NOT NULL DEFAULT 0,
                last_message_at TEXT,
                last_follow_up_at TEXT,
                context TEXT NOT NULL DEFAULT '{}',
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (agent_id, phone)
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_status ON contacts(agent_id, status);
            CREATE INDEX IF NOT EXISTS idx_contacts_created ON contacts(agent_id, created_at);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                phone TEXT NOT NULL,
                role TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'conversation',
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_contact
                ON messages(agent_id, phone, created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "blacklist",
        sql: r#"
            CREATE TABLE IF NOT EXISTS blacklist (
                phone TEXT NOT NULL,
                agent_id TEXT NOT NULL DEFAULT '',
                reason TEXT,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (phone, agent_id)
            );

            CREATE TABLE IF NOT EXISTS blacklist_archive (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                reason TEXT,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                removed_at TEXT NOT NULL,
                removed_by TEXT NOT NULL,
                removal_reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_blacklist_archive_phone ON blacklist_archive(phone);
        "#,
    },
];

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let applied = current_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for step in pending {
        tracing::info!(version = step.version, name = step.name, "Applying migration");
        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO _migrations (version, name, applied_at) VALUES ({}, '{}', '{}');\nCOMMIT;",
            step.sql,
            step.version,
            step.name,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        if let Err(e) = conn.execute_batch(&batch).await {
            // Leave the connection usable; the step is retried on next start.
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::Migration(format!(
                "V{} ({}) failed: {e}",
                step.version, step.name
            )));
        }
    }
    Ok(())
}

/// Highest applied version, 0 on a fresh database.
pub async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read schema version: {e}")))?;
    let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("read schema version: {e}")))?
    else {
        return Ok(0);
    };
    row.get::<i64>(0)
        .map_err(|e| DatabaseError::Migration(format!("parse schema version: {e}")))
}
