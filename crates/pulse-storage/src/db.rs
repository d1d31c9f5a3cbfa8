//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex. Each repository call takes
//! the lock for exactly one statement or one transaction and releases it
//! afterwards, so no lock is held across calls.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use pulse_core::error::{PulseError, Result};

use crate::error::storage_err;
use crate::schema::{self, SchemaAction};

/// SQLite database holding all Pulse tables.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Enables foreign keys and brings the schema to the current version,
    /// recreating all tables on a version mismatch.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, Duration::from_secs(5))
    }

    /// Like [`Database::open`] with an explicit busy timeout.
    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(storage_err("Failed to open database"))?;
        conn.busy_timeout(busy_timeout)
            .map_err(storage_err("Failed to set busy timeout"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(storage_err("Failed to set pragmas"))?;

        info!("Database opened at {}", path.display());
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(storage_err("Failed to open in-memory db"))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage_err("Failed to set pragmas"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        match schema::ensure_schema(&conn)? {
            SchemaAction::Recreated { from_version } => {
                info!(from_version, "Schema recreated")
            }
            action => debug!(?action, "Schema checked"),
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Close the underlying connection, reporting any error SQLite raises.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|e| PulseError::Storage(format!("Database lock poisoned: {}", e)))?;
        conn.close()
            .map_err(|(_, e)| crate::error::classify("Failed to close database", e))?;
        debug!("Database closed");
        Ok(())
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PulseError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a closure inside a transaction.
    ///
    /// The transaction commits only when the closure returns `Ok`. On `Err`
    /// it is dropped, which rolls it back. Plain storage errors raised inside
    /// the closure surface as [`PulseError::TransactionAborted`]; other
    /// variants pass through unchanged.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| PulseError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(storage_err("Failed to begin transaction"))?;

        let value = f(&tx).map_err(|e| match e {
            PulseError::Storage(msg) => PulseError::TransactionAborted(msg),
            other => other,
        })?;

        tx.commit()
            .map_err(|e| PulseError::TransactionAborted(format!("commit failed: {e}")))?;
        Ok(value)
    }

    /// Drop and recreate every table.
    pub fn truncate_all(&self) -> Result<()> {
        self.with_conn(schema::truncate_all)
    }

    /// Schema version stored in the file.
    pub fn schema_version(&self) -> Result<i64> {
        self.with_conn(schema::schema_version)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SCHEMA_VERSION;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM moment", [], |row| row.get(0))
                .map_err(storage_err("count"))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_file_database_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO project (name) VALUES ('study')", [])
                .map_err(storage_err("insert"))?;
            Ok(())
        })
        .unwrap();
        db.close().unwrap();
        assert!(path.exists());

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM project", [], |row| row.get(0))
                    .map_err(storage_err("count"))
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reopen_with_other_version_drops_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO project (name) VALUES ('study')", [])
                .map_err(storage_err("insert"))?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .map_err(storage_err("pragma"))?;
            Ok(())
        })
        .unwrap();
        db.close().unwrap();

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM project", [], |row| row.get(0))
                    .map_err(storage_err("count"))
            })
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_open_replaces_unversioned_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE moment (id INTEGER PRIMARY KEY, ts INTEGER);")
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        db.with_conn(schema::require_valid).unwrap();
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::in_memory().unwrap();
        let on: i64 = db
            .with_conn(|conn| {
                conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))
                    .map_err(storage_err("pragma"))
            })
            .unwrap();
        assert_eq!(on, 1);
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let db = Database::in_memory().unwrap();
        let result: Result<()> = db.with_tx(|tx| {
            tx.execute("INSERT INTO project (name) VALUES ('a')", [])
                .map_err(storage_err("insert"))?;
            tx.execute("INSERT INTO project (name) VALUES ('a')", [])
                .map_err(storage_err("insert"))?;
            Ok(())
        });
        assert!(result.unwrap_err().is_constraint_violation());

        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM project", [], |row| row.get(0))
                    .map_err(storage_err("count"))
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_with_tx_wraps_storage_errors() {
        let db = Database::in_memory().unwrap();
        let result: Result<()> = db.with_tx(|_| Err(PulseError::Storage("boom".into())));
        assert!(matches!(result, Err(PulseError::TransactionAborted(_))));
    }

    #[test]
    fn test_truncate_all() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO project (name) VALUES ('x')", [])
                .map_err(storage_err("insert"))?;
            Ok(())
        })
        .unwrap();
        db.truncate_all().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM project", [], |row| row.get(0))
                    .map_err(storage_err("count"))
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
