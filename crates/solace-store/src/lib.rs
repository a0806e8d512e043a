//! Solace Store crate - durable conversation log on SQLite.
//!
//! Provides a WAL-mode SQLite database with migrations and the
//! `ConversationStore`: idempotent per-id message upserts, windowed
//! chronological loads, and conversation summary maintenance.

pub mod db;
pub mod migrations;
pub mod store;

pub use db::Database;
pub use store::ConversationStore;
