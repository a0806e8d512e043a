//! Conversation store: the durable message log.
//!
//! Messages are upserted by client-assigned id, so a retried append is
//! harmless. Each append also refreshes the conversation summary row used
//! by the list screen. Callers that must not fail on storage trouble (the
//! optimistic send path) log errors and continue; this layer itself
//! reports honest results.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use solace_core::error::SolaceError;
use solace_core::types::{Attachment, ConversationSummary, Message, Role, SourceRef};

use crate::db::Database;

/// Characters kept when deriving a conversation title from its first
/// user message.
const TITLE_MAX_CHARS: usize = 48;

/// Characters kept in the `last_message` preview of a summary row.
const PREVIEW_MAX_CHARS: usize = 80;

/// Repository for conversations and their message logs.
pub struct ConversationStore {
    db: Arc<Database>,
}

/// Optional message fields packed into the `metadata_json` column.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MessageMetadata {
    #[serde(default)]
    sources: Vec<SourceRef>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    reactions: Vec<String>,
}

impl From<&Message> for MessageMetadata {
    fn from(message: &Message) -> Self {
        Self {
            sources: message.sources.clone(),
            thinking: message.thinking.clone(),
            intent: message.intent.clone(),
            reactions: message.reactions.clone(),
        }
    }
}

impl ConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Idempotently upsert a message and refresh the conversation summary.
    ///
    /// Appending the same message id twice leaves exactly one row holding
    /// the latest version. New assistant messages bump the conversation's
    /// unread count; re-appends of an existing id do not.
    pub fn append(&self, message: &Message, conversation_id: &str) -> Result<(), SolaceError> {
        let attachments_json = serde_json::to_string(&message.attachments)?;
        let metadata_json = serde_json::to_string(&MessageMetadata::from(message))?;
        let now_ms = Utc::now().timestamp_millis();

        self.db.with_conn(|conn| {
            let existed: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
                    rusqlite::params![message.id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| SolaceError::Storage(format!("Failed to check message: {}", e)))?;

            conn.execute(
                "INSERT OR REPLACE INTO messages
                     (id, conversation_id, role, content, timestamp,
                      attachments_json, metadata_json, agent_used, is_loading)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    message.id.to_string(),
                    conversation_id,
                    message.role.as_str(),
                    message.content,
                    message.timestamp.timestamp_millis(),
                    attachments_json,
                    metadata_json,
                    message.agent_used,
                    message.is_loading as i32,
                ],
            )
            .map_err(|e| SolaceError::Storage(format!("Failed to save message: {}", e)))?;

            conn.execute(
                "INSERT INTO conversations (id, title, updated_at, unread_count)
                 VALUES (?1, '', ?2, 0)
                 ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
                rusqlite::params![conversation_id, now_ms],
            )
            .map_err(|e| SolaceError::Storage(format!("Failed to upsert summary: {}", e)))?;

            if !existed && message.role == Role::Assistant {
                conn.execute(
                    "UPDATE conversations SET unread_count = unread_count + 1 WHERE id = ?1",
                    rusqlite::params![conversation_id],
                )
                .map_err(|e| SolaceError::Storage(format!("Failed to bump unread: {}", e)))?;
            }

            if message.role == Role::User {
                // First user message names the conversation; rename() can
                // override later.
                conn.execute(
                    "UPDATE conversations SET title = ?2 WHERE id = ?1 AND title = ''",
                    rusqlite::params![conversation_id, derive_title(&message.content)],
                )
                .map_err(|e| SolaceError::Storage(format!("Failed to set title: {}", e)))?;
            }

            Ok(())
        })
    }

    /// Load the most recent `limit` messages (skipping `offset` from the
    /// end), returned in ascending timestamp order.
    pub fn load(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, SolaceError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, role, content, timestamp,
                            attachments_json, metadata_json, agent_used, is_loading
                     FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY timestamp DESC, rowid DESC
                     LIMIT ?2 OFFSET ?3",
                )
                .map_err(|e| SolaceError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, limit as i64, offset as i64],
                    |row| Ok(row_to_message(row)),
                )
                .map_err(|e| SolaceError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                let message = row.map_err(|e| SolaceError::Storage(e.to_string()))??;
                messages.push(message);
            }
            // Query walks newest-first to apply the window; flip back to
            // chronological order for the caller.
            messages.reverse();
            Ok(messages)
        })
    }

    /// Find a single message by id.
    pub fn find_message(&self, id: Uuid) -> Result<Option<Message>, SolaceError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, role, content, timestamp,
                            attachments_json, metadata_json, agent_used, is_loading
                     FROM messages WHERE id = ?1",
                )
                .map_err(|e| SolaceError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_message(row))
                })
                .optional()
                .map_err(|e| SolaceError::Storage(e.to_string()))?;

            match result {
                Some(message) => Ok(Some(message?)),
                None => Ok(None),
            }
        })
    }

    /// All conversation summaries, most recently updated first.
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>, SolaceError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.id, c.title, c.updated_at, c.unread_count,
                            (SELECT m.content FROM messages m
                             WHERE m.conversation_id = c.id
                             ORDER BY m.timestamp DESC, m.rowid DESC
                             LIMIT 1)
                     FROM conversations c
                     ORDER BY c.updated_at DESC",
                )
                .map_err(|e| SolaceError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let title: String = row.get(1)?;
                    let updated_ms: i64 = row.get(2)?;
                    let unread_count: u32 = row.get(3)?;
                    let last_message: Option<String> = row.get(4)?;
                    Ok(ConversationSummary {
                        id,
                        title,
                        updated_at: Utc
                            .timestamp_millis_opt(updated_ms)
                            .single()
                            .unwrap_or_default(),
                        last_message: last_message
                            .map(|content| truncate_chars(&content, PREVIEW_MAX_CHARS)),
                        unread_count,
                    })
                })
                .map_err(|e| SolaceError::Storage(e.to_string()))?;

            let mut summaries = Vec::new();
            for row in rows {
                summaries.push(row.map_err(|e| SolaceError::Storage(e.to_string()))?);
            }
            Ok(summaries)
        })
    }

    /// Delete all messages and the summary row of a conversation.
    pub fn clear(&self, conversation_id: &str) -> Result<(), SolaceError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                rusqlite::params![conversation_id],
            )
            .map_err(|e| SolaceError::Storage(format!("Failed to clear messages: {}", e)))?;
            conn.execute(
                "DELETE FROM conversations WHERE id = ?1",
                rusqlite::params![conversation_id],
            )
            .map_err(|e| SolaceError::Storage(format!("Failed to clear summary: {}", e)))?;
            Ok(())
        })?;
        tracing::info!(conversation_id = %conversation_id, "Conversation cleared");
        Ok(())
    }

    /// Delete a single message. Returns whether a row was removed.
    pub fn delete_message(
        &self,
        id: Uuid,
        conversation_id: &str,
    ) -> Result<bool, SolaceError> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM messages WHERE id = ?1 AND conversation_id = ?2",
                    rusqlite::params![id.to_string(), conversation_id],
                )
                .map_err(|e| SolaceError::Storage(format!("Failed to delete message: {}", e)))?;
            Ok(affected > 0)
        })
    }

    /// Set a conversation's title.
    pub fn rename(&self, conversation_id: &str, title: &str) -> Result<(), SolaceError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET title = ?2 WHERE id = ?1",
                rusqlite::params![conversation_id, title],
            )
            .map_err(|e| SolaceError::Storage(format!("Failed to rename: {}", e)))?;
            Ok(())
        })
    }

    /// Zero a conversation's unread count (the user opened it).
    pub fn mark_read(&self, conversation_id: &str) -> Result<(), SolaceError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
                rusqlite::params![conversation_id],
            )
            .map_err(|e| SolaceError::Storage(format!("Failed to mark read: {}", e)))?;
            Ok(())
        })
    }

    /// Number of messages in a conversation.
    pub fn message_count(&self, conversation_id: &str) -> Result<u64, SolaceError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    rusqlite::params![conversation_id],
                    |row| row.get(0),
                )
                .map_err(|e| SolaceError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, SolaceError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| SolaceError::Storage(e.to_string()))?;
    let role_str: String = row
        .get(1)
        .map_err(|e| SolaceError::Storage(e.to_string()))?;
    let content: String = row
        .get(2)
        .map_err(|e| SolaceError::Storage(e.to_string()))?;
    let timestamp_ms: i64 = row
        .get(3)
        .map_err(|e| SolaceError::Storage(e.to_string()))?;
    let attachments_json: String = row
        .get(4)
        .map_err(|e| SolaceError::Storage(e.to_string()))?;
    let metadata_json: String = row
        .get(5)
        .map_err(|e| SolaceError::Storage(e.to_string()))?;
    let agent_used: Option<String> = row
        .get(6)
        .map_err(|e| SolaceError::Storage(e.to_string()))?;
    let is_loading: i32 = row
        .get(7)
        .map_err(|e| SolaceError::Storage(e.to_string()))?;

    let attachments: Vec<Attachment> = serde_json::from_str(&attachments_json)?;
    let metadata: MessageMetadata = serde_json::from_str(&metadata_json)?;

    Ok(Message {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| SolaceError::Storage(format!("Invalid UUID: {}", e)))?,
        role: role_str.parse()?,
        content,
        timestamp: Utc
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .unwrap_or_default(),
        attachments,
        sources: metadata.sources,
        thinking: metadata.thinking,
        agent_used,
        intent: metadata.intent,
        reactions: metadata.reactions,
        is_loading: is_loading != 0,
    })
}

/// Derive a conversation title from its first user message.
fn derive_title(content: &str) -> String {
    let first_line = content.trim().lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        "New conversation".to_string()
    } else {
        truncate_chars(first_line, TITLE_MAX_CHARS)
    }
}

/// Truncate to `max` characters, appending an ellipsis when shortened.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max).collect();
        format!("{}…", kept.trim_end())
    }
}

/// Extension trait for rusqlite to support optional query results.
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use solace_core::types::DEFAULT_CONVERSATION;

    fn make_store() -> ConversationStore {
        ConversationStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn message_at(role: Role, content: &str, offset_ms: i64) -> Message {
        let mut msg = match role {
            Role::User => Message::user(content, vec![]),
            _ => Message::assistant(content),
        };
        msg.timestamp = Utc::now() + Duration::milliseconds(offset_ms);
        msg
    }

    // ========================================================================
    // append / load
    // ========================================================================

    #[test]
    fn test_append_and_load_round_trip() {
        let store = make_store();
        let msg = Message::user("I slept badly last night", vec![]);
        store.append(&msg, DEFAULT_CONVERSATION).unwrap();

        let loaded = store.load(DEFAULT_CONVERSATION, 50, 0).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, msg.id);
        assert_eq!(loaded[0].content, "I slept badly last night");
        assert_eq!(loaded[0].role, Role::User);
        assert_eq!(
            loaded[0].timestamp.timestamp_millis(),
            msg.timestamp.timestamp_millis()
        );
    }

    #[test]
    fn test_append_same_id_is_idempotent_upsert() {
        let store = make_store();
        let mut msg = Message::assistant("first draft");
        store.append(&msg, DEFAULT_CONVERSATION).unwrap();

        msg.content = "final version".to_string();
        msg.thinking = Some("revised".to_string());
        store.append(&msg, DEFAULT_CONVERSATION).unwrap();

        assert_eq!(store.message_count(DEFAULT_CONVERSATION).unwrap(), 1);
        let loaded = store.find_message(msg.id).unwrap().unwrap();
        assert_eq!(loaded.content, "final version");
        assert_eq!(loaded.thinking.as_deref(), Some("revised"));
    }

    #[test]
    fn test_load_ascending_regardless_of_insert_order() {
        let store = make_store();
        let newest = message_at(Role::Assistant, "third", 2000);
        let oldest = message_at(Role::User, "first", 0);
        let middle = message_at(Role::Assistant, "second", 1000);

        store.append(&newest, DEFAULT_CONVERSATION).unwrap();
        store.append(&oldest, DEFAULT_CONVERSATION).unwrap();
        store.append(&middle, DEFAULT_CONVERSATION).unwrap();

        let loaded = store.load(DEFAULT_CONVERSATION, 50, 0).unwrap();
        let contents: Vec<&str> = loaded.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_load_window_keeps_most_recent() {
        let store = make_store();
        for i in 0..5 {
            let msg = message_at(Role::User, &format!("msg {}", i), i * 1000);
            store.append(&msg, DEFAULT_CONVERSATION).unwrap();
        }

        let loaded = store.load(DEFAULT_CONVERSATION, 2, 0).unwrap();
        let contents: Vec<&str> = loaded.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 3", "msg 4"]);
    }

    #[test]
    fn test_load_offset_skips_from_the_end() {
        let store = make_store();
        for i in 0..5 {
            let msg = message_at(Role::User, &format!("msg {}", i), i * 1000);
            store.append(&msg, DEFAULT_CONVERSATION).unwrap();
        }

        let loaded = store.load(DEFAULT_CONVERSATION, 2, 2).unwrap();
        let contents: Vec<&str> = loaded.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 1", "msg 2"]);
    }

    #[test]
    fn test_same_millisecond_keeps_insertion_order() {
        let store = make_store();
        let shared = Utc::now();
        for content in ["a", "b", "c"] {
            let mut msg = Message::user(content, vec![]);
            msg.timestamp = shared;
            store.append(&msg, DEFAULT_CONVERSATION).unwrap();
        }

        let loaded = store.load(DEFAULT_CONVERSATION, 50, 0).unwrap();
        let contents: Vec<&str> = loaded.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_load_isolates_conversations() {
        let store = make_store();
        store
            .append(&Message::user("journal entry", vec![]), "journal")
            .unwrap();
        store
            .append(&Message::user("hello", vec![]), DEFAULT_CONVERSATION)
            .unwrap();

        let loaded = store.load("journal", 50, 0).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "journal entry");
    }

    #[test]
    fn test_metadata_round_trip() {
        let store = make_store();
        let mut msg = Message::assistant("try a short walk after lunch");
        msg.thinking = Some("user mentioned low energy".to_string());
        msg.sources.push(SourceRef {
            title: "Movement and mood".to_string(),
            url: Some("https://example.org/walks".to_string()),
            snippet: None,
        });
        msg.agent_used = Some("wellness".to_string());
        msg.intent = Some("habit_suggestion".to_string());
        msg.reactions.push("💜".to_string());
        msg.attachments.push(Attachment::image("content://p/9"));

        store.append(&msg, DEFAULT_CONVERSATION).unwrap();
        let loaded = store.find_message(msg.id).unwrap().unwrap();

        assert_eq!(loaded.thinking, msg.thinking);
        assert_eq!(loaded.sources, msg.sources);
        assert_eq!(loaded.agent_used, msg.agent_used);
        assert_eq!(loaded.intent, msg.intent);
        assert_eq!(loaded.reactions, msg.reactions);
        assert_eq!(loaded.attachments, msg.attachments);
    }

    #[test]
    fn test_find_message_missing_returns_none() {
        let store = make_store();
        assert!(store.find_message(Uuid::new_v4()).unwrap().is_none());
    }

    // ========================================================================
    // summaries
    // ========================================================================

    #[test]
    fn test_list_orders_by_recency() {
        let store = make_store();
        store
            .append(&Message::user("older thread", vec![]), "a")
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .append(&Message::user("newer thread", vec![]), "b")
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        // Touching "a" again moves it to the front.
        store.append(&Message::assistant("reply"), "a").unwrap();

        let summaries = store.list_conversations().unwrap();
        let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_title_derived_from_first_user_message() {
        let store = make_store();
        store
            .append(&Message::assistant("welcome"), DEFAULT_CONVERSATION)
            .unwrap();
        store
            .append(
                &Message::user("I want to build a better sleep routine", vec![]),
                DEFAULT_CONVERSATION,
            )
            .unwrap();
        store
            .append(
                &Message::user("also: stress", vec![]),
                DEFAULT_CONVERSATION,
            )
            .unwrap();

        let summaries = store.list_conversations().unwrap();
        assert_eq!(summaries[0].title, "I want to build a better sleep routine");
    }

    #[test]
    fn test_last_message_preview_truncated() {
        let store = make_store();
        let long = "breathing ".repeat(30);
        store
            .append(&Message::assistant(long.clone()), DEFAULT_CONVERSATION)
            .unwrap();

        let summaries = store.list_conversations().unwrap();
        let preview = summaries[0].last_message.clone().unwrap();
        assert!(preview.chars().count() <= PREVIEW_MAX_CHARS + 1);
        assert!(preview.ends_with('…'));
    }

    #[test]
    fn test_unread_counts_assistant_appends_once() {
        let store = make_store();
        store
            .append(&Message::user("hi", vec![]), DEFAULT_CONVERSATION)
            .unwrap();
        let reply = Message::assistant("hello there");
        store.append(&reply, DEFAULT_CONVERSATION).unwrap();
        // Idempotent re-append must not double count.
        store.append(&reply, DEFAULT_CONVERSATION).unwrap();
        store
            .append(&Message::assistant("anything else?"), DEFAULT_CONVERSATION)
            .unwrap();

        let summaries = store.list_conversations().unwrap();
        assert_eq!(summaries[0].unread_count, 2);

        store.mark_read(DEFAULT_CONVERSATION).unwrap();
        let summaries = store.list_conversations().unwrap();
        assert_eq!(summaries[0].unread_count, 0);
    }

    #[test]
    fn test_rename_overrides_derived_title() {
        let store = make_store();
        store
            .append(&Message::user("random opener", vec![]), DEFAULT_CONVERSATION)
            .unwrap();
        store.rename(DEFAULT_CONVERSATION, "Sleep project").unwrap();

        let summaries = store.list_conversations().unwrap();
        assert_eq!(summaries[0].title, "Sleep project");
    }

    // ========================================================================
    // clear / delete
    // ========================================================================

    #[test]
    fn test_clear_removes_messages_and_summary() {
        let store = make_store();
        store
            .append(&Message::user("hello", vec![]), DEFAULT_CONVERSATION)
            .unwrap();
        store.append(&Message::user("other", vec![]), "keep").unwrap();

        store.clear(DEFAULT_CONVERSATION).unwrap();

        assert_eq!(store.message_count(DEFAULT_CONVERSATION).unwrap(), 0);
        let summaries = store.list_conversations().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, "keep");
    }

    #[test]
    fn test_delete_message_reports_whether_removed() {
        let store = make_store();
        let msg = Message::user("delete me", vec![]);
        store.append(&msg, DEFAULT_CONVERSATION).unwrap();

        assert!(store.delete_message(msg.id, DEFAULT_CONVERSATION).unwrap());
        assert!(!store.delete_message(msg.id, DEFAULT_CONVERSATION).unwrap());
        assert_eq!(store.message_count(DEFAULT_CONVERSATION).unwrap(), 0);
    }

    #[test]
    fn test_delete_checks_conversation_id() {
        let store = make_store();
        let msg = Message::user("mine", vec![]);
        store.append(&msg, "journal").unwrap();

        assert!(!store.delete_message(msg.id, DEFAULT_CONVERSATION).unwrap());
        assert_eq!(store.message_count("journal").unwrap(), 1);
    }

    // ========================================================================
    // helpers
    // ========================================================================

    #[test]
    fn test_derive_title_uses_first_line() {
        assert_eq!(derive_title("hello\nworld"), "hello");
        assert_eq!(derive_title("   "), "New conversation");
        let long = "x".repeat(60);
        assert!(derive_title(&long).ends_with('…'));
    }

    #[test]
    fn test_truncate_chars_handles_multibyte() {
        let s = "あ".repeat(100);
        let t = truncate_chars(&s, 10);
        assert_eq!(t.chars().count(), 11);
    }
}
