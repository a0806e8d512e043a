//! Database schema migrations.
//!
//! Applies the initial schema: messages, conversations, and the
//! schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use solace_core::error::SolaceError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<(), SolaceError> {
    // Create the migrations tracking table first.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| SolaceError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| SolaceError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), SolaceError> {
    conn.execute_batch(
        "
        -- Message log. One row per message, keyed by the client-assigned id
        -- so that retried appends overwrite rather than duplicate.
        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY NOT NULL,
            conversation_id  TEXT NOT NULL,
            role             TEXT NOT NULL
                             CHECK (role IN ('user', 'assistant', 'system')),
            content          TEXT NOT NULL DEFAULT '',
            timestamp        INTEGER NOT NULL,
            attachments_json TEXT NOT NULL DEFAULT '[]',
            metadata_json    TEXT NOT NULL DEFAULT '{}',
            agent_used       TEXT,
            is_loading       INTEGER NOT NULL DEFAULT 0,
            created_at       INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages (conversation_id, timestamp ASC);

        CREATE INDEX IF NOT EXISTS idx_messages_timestamp
            ON messages (timestamp DESC);

        -- Conversation summary rows for the list screen.
        CREATE TABLE IF NOT EXISTS conversations (
            id           TEXT PRIMARY KEY NOT NULL,
            title        TEXT NOT NULL DEFAULT '',
            updated_at   INTEGER NOT NULL,
            unread_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_updated
            ON conversations (updated_at DESC);

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| SolaceError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
