//! SQLite-based state for alert configurations, alerts, and notifications.
//!
//! The database lives at `~/.obralert/obralert.db` and is the single source
//! of truth shared by concurrent evaluation and dispatch invocations. Each
//! invocation opens its own connection; WAL mode keeps concurrent readers
//! cheap while `BEGIN IMMEDIATE` serializes the write paths that must be
//! atomic (alert + history, notification batches, attempt accounting).

use std::path::PathBuf;

use rusqlite::Connection;

pub mod types;
pub use types::*;

pub mod alerts;
pub mod configs;
pub mod costs;
pub mod notifications;

pub struct AlertDb {
    conn: Connection,
}

impl AlertDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| E::from(DbError::Sqlite(e)))?;
        match f(self) {
            Ok(val) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| E::from(DbError::Sqlite(e)))?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.obralert/obralert.db` and apply
    /// the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for concurrent read performance across invocations
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Default database path: `~/.obralert/obralert.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".obralert").join("obralert.db"))
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================
