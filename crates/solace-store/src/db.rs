//! SQLite connection for the conversation log.
//!
//! One database file holds every conversation. rusqlite's `Connection`
//! is `Send` but not `Sync`, so the handle lives behind a `Mutex` and
//! all access funnels through [`Database::with_conn`]; a single-user
//! message log never has enough writers to need more than that.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use solace_core::error::SolaceError;

use crate::migrations;

/// Shared handle to the conversation database.
///
/// WAL journaling keeps reads (conversation list, rehydration) from
/// stalling behind message writes when a second handle is open.
pub struct Database {
    conn: Mutex<Connection>,
    origin: String,
}

impl Database {
    /// Opens the log at `path`, creating the file and any missing
    /// parent directories, and brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, SolaceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| {
            SolaceError::Storage(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let db = Self::prepare(conn, path.display().to_string())?;
        info!("Conversation log opened at {}", path.display());
        Ok(db)
    }

    /// Opens a throwaway in-memory log with the full schema applied.
    pub fn in_memory() -> Result<Self, SolaceError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SolaceError::Storage(format!("Failed to open in-memory log: {}", e)))?;
        Self::prepare(conn, ":memory:".to_string())
    }

    /// Applies connection pragmas, then any pending migrations.
    fn prepare(conn: Connection, origin: String) -> Result<Self, SolaceError> {
        for (pragma, value) in [
            ("journal_mode", "WAL"),
            ("synchronous", "NORMAL"),
            ("foreign_keys", "ON"),
            ("busy_timeout", "5000"),
        ] {
            conn.pragma_update(None, pragma, value)
                .map_err(|e| SolaceError::Storage(format!("Failed to set {}: {}", pragma, e)))?;
        }
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            origin,
        })
    }

    /// Runs `f` with the connection; the lock is held for the call.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, SolaceError>
    where
        F: FnOnce(&Connection) -> Result<T, SolaceError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SolaceError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("origin", &self.origin)
            .finish()
    }
}
