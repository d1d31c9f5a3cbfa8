//! Schema Manager: table definitions and versioned create/upgrade/drop.
//!
//! The schema version lives in SQLite's `user_version` pragma. Any mismatch
//! at open time drops and recreates every table; no data is carried across
//! a breaking schema change. Unique and foreign-key constraints are declared
//! here and enforced by SQLite, not by the repositories.

use rusqlite::Connection;
use tracing::{info, warn};

use pulse_core::error::{PulseError, Result};

use crate::error::storage_err;

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Tables in drop order (children first).
const TABLES: &[&str] = &[
    "moment_tag",
    "scheduled_beep",
    "moment",
    "vocabulary_item",
    "vocabulary",
    "uptime",
    "project",
];

/// Columns the repositories decode by name, per table.
const EXPECTED_COLUMNS: &[(&str, &[&str])] = &[
    ("project", &["id", "name", "created_at"]),
    ("vocabulary", &["id", "name", "project_id"]),
    ("uptime", &["id", "started_at", "ended_at"]),
    (
        "moment",
        &[
            "id",
            "timestamp",
            "accepted",
            "title",
            "description",
            "photo_uri",
            "uptime_id",
            "project_id",
        ],
    ),
    (
        "vocabulary_item",
        &["id", "value", "language", "vocabulary_id"],
    ),
    ("moment_tag", &["moment_id", "tag_id", "created_at"]),
    ("scheduled_beep", &["id", "timestamp", "cancelled", "uptime_id"]),
];

const CREATE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS project (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL UNIQUE,
        created_at  INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
    );

    CREATE TABLE IF NOT EXISTS vocabulary (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL,
        project_id  INTEGER NOT NULL,
        UNIQUE (project_id, name),
        FOREIGN KEY (project_id) REFERENCES project(id)
    );

    CREATE TABLE IF NOT EXISTS uptime (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at  INTEGER NOT NULL UNIQUE,
        ended_at    INTEGER UNIQUE,
        CHECK (ended_at IS NULL OR ended_at >= started_at)
    );

    CREATE TABLE IF NOT EXISTS moment (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp   INTEGER NOT NULL UNIQUE,
        accepted    INTEGER NOT NULL CHECK (accepted IN (0, 1)),
        title       TEXT,
        description TEXT,
        photo_uri   TEXT,
        uptime_id   INTEGER,
        project_id  INTEGER NOT NULL,
        FOREIGN KEY (uptime_id) REFERENCES uptime(id) ON DELETE SET NULL,
        FOREIGN KEY (project_id) REFERENCES project(id)
    );

    CREATE INDEX IF NOT EXISTS idx_moment_project_timestamp
        ON moment (project_id, timestamp DESC);

    CREATE TABLE IF NOT EXISTS vocabulary_item (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        value          TEXT NOT NULL,
        language       TEXT NOT NULL,
        vocabulary_id  INTEGER NOT NULL,
        UNIQUE (vocabulary_id, language, value),
        FOREIGN KEY (vocabulary_id) REFERENCES vocabulary(id)
    );

    -- No cascades: associations are removed one by one so orphaned
    -- vocabulary items are reclaimed in the same transaction.
    CREATE TABLE IF NOT EXISTS moment_tag (
        moment_id   INTEGER NOT NULL,
        tag_id      INTEGER NOT NULL,
        created_at  INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000),
        PRIMARY KEY (moment_id, tag_id),
        FOREIGN KEY (moment_id) REFERENCES moment(id),
        FOREIGN KEY (tag_id) REFERENCES vocabulary_item(id)
    );

    CREATE INDEX IF NOT EXISTS idx_moment_tag_tag
        ON moment_tag (tag_id);

    CREATE TABLE IF NOT EXISTS scheduled_beep (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp   INTEGER NOT NULL,
        cancelled   INTEGER NOT NULL DEFAULT 0 CHECK (cancelled IN (0, 1)),
        uptime_id   INTEGER NOT NULL,
        FOREIGN KEY (uptime_id) REFERENCES uptime(id)
    );

    CREATE INDEX IF NOT EXISTS idx_scheduled_beep_timestamp
        ON scheduled_beep (timestamp ASC);

    CREATE INDEX IF NOT EXISTS idx_scheduled_beep_uptime
        ON scheduled_beep (uptime_id);
";

/// What [`ensure_schema`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaAction {
    /// Fresh database, tables created.
    Created,
    /// Version or column mismatch, tables dropped and recreated.
    Recreated { from_version: i64 },
    /// Schema already current.
    Current,
}

/// Create every table and index. Idempotent.
pub fn create_all(conn: &Connection) -> Result<()> {
    rebuild(conn, false, SCHEMA_VERSION)
}

/// Drop every table.
pub fn drop_all(conn: &Connection) -> Result<()> {
    for table in TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))
            .map_err(storage_err("Failed to drop table"))?;
    }
    Ok(())
}

/// Destructive upgrade: drop everything and recreate at `new_version`.
pub fn upgrade(conn: &Connection, old_version: i64, new_version: i64) -> Result<()> {
    warn!(
        old_version,
        new_version, "Schema version changed, dropping all data"
    );
    rebuild(conn, true, new_version)
}

/// Drop and recreate every table at the current version.
pub fn truncate_all(conn: &Connection) -> Result<()> {
    rebuild(conn, true, SCHEMA_VERSION)?;
    info!("All tables truncated");
    Ok(())
}

/// Optionally drop, then create and stamp `version`, all in one transaction.
///
/// A failure at any step leaves the previous tables and version in place.
fn rebuild(conn: &Connection, drop_first: bool, version: i64) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(storage_err("Failed to begin schema transaction"))?;
    if drop_first {
        drop_all(&tx)?;
    }
    tx.execute_batch(CREATE_SQL)
        .map_err(storage_err("Failed to create schema"))?;
    set_schema_version(&tx, version)?;
    tx.commit()
        .map_err(storage_err("Failed to commit schema change"))
}

/// Number of this schema's tables already present in the file.
fn known_table_count(conn: &Connection) -> Result<i64> {
    let names = TABLES
        .iter()
        .map(|t| format!("'{t}'"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.query_row(
        &format!("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ({names})"),
        [],
        |row| row.get(0),
    )
    .map_err(storage_err("Failed to inspect schema"))
}

/// Version stored in the database file (0 for a fresh file).
pub fn schema_version(conn: &Connection) -> Result<i64> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(storage_err("Failed to read schema version"))
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.pragma_update(None, "user_version", version)
        .map_err(storage_err("Failed to write schema version"))
}

/// Bring the database to [`SCHEMA_VERSION`], recreating on any mismatch.
pub fn ensure_schema(conn: &Connection) -> Result<SchemaAction> {
    let version = schema_version(conn)?;

    if version == 0 {
        // Unversioned file: tables left by something else must be checked
        // before CREATE ... IF NOT EXISTS silently keeps them.
        if known_table_count(conn)? > 0 {
            let problems = validate_columns(conn)?;
            if !problems.is_empty() {
                warn!(?problems, "Pre-existing tables do not match the schema");
                upgrade(conn, version, SCHEMA_VERSION)?;
                return Ok(SchemaAction::Recreated { from_version: version });
            }
        }
        create_all(conn)?;
        info!(version = SCHEMA_VERSION, "Schema created");
        return Ok(SchemaAction::Created);
    }

    if version != SCHEMA_VERSION {
        upgrade(conn, version, SCHEMA_VERSION)?;
        return Ok(SchemaAction::Recreated { from_version: version });
    }

    let problems = validate_columns(conn)?;
    if !problems.is_empty() {
        warn!(?problems, "Schema columns do not match, recreating");
        upgrade(conn, version, SCHEMA_VERSION)?;
        return Ok(SchemaAction::Recreated { from_version: version });
    }

    Ok(SchemaAction::Current)
}

/// Compare every table's columns with the names the repositories read.
///
/// Returns one message per missing table or column; empty when valid.
pub fn validate_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(storage_err("Failed to inspect schema"))?;

    let mut problems = Vec::new();
    for (table, expected) in EXPECTED_COLUMNS {
        let actual = stmt
            .query_map([table], |row| row.get::<_, String>(0))
            .map_err(storage_err("Failed to inspect schema"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_err("Failed to inspect schema"))?;

        if actual.is_empty() {
            problems.push(format!("missing table {table}"));
            continue;
        }
        for column in *expected {
            if !actual.iter().any(|c| c == column) {
                problems.push(format!("missing column {table}.{column}"));
            }
        }
    }
    Ok(problems)
}

/// Fail with [`PulseError::StorageUnavailable`] unless the schema is valid.
pub fn require_valid(conn: &Connection) -> Result<()> {
    let problems = validate_columns(conn)?;
    if problems.is_empty() {
        Ok(())
    } else {
        Err(PulseError::StorageUnavailable(problems.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    fn table_count(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_create_all_is_idempotent() {
        let conn = open_test_conn();
        create_all(&conn).unwrap();
        create_all(&conn).unwrap();
        assert_eq!(table_count(&conn), TABLES.len() as i64);
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_ensure_schema_fresh_then_current() {
        let conn = open_test_conn();
        assert_eq!(ensure_schema(&conn).unwrap(), SchemaAction::Created);
        assert_eq!(ensure_schema(&conn).unwrap(), SchemaAction::Current);
        assert!(validate_columns(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_version_mismatch_drops_data() {
        let conn = open_test_conn();
        create_all(&conn).unwrap();
        conn.execute("INSERT INTO project (name) VALUES ('p')", [])
            .unwrap();
        conn.pragma_update(None, "user_version", 99i64).unwrap();

        let action = ensure_schema(&conn).unwrap();
        assert_eq!(action, SchemaAction::Recreated { from_version: 99 });
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM project", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_column_mismatch_recreates() {
        let conn = open_test_conn();
        conn.execute_batch("CREATE TABLE moment (id INTEGER PRIMARY KEY, ts INTEGER);")
            .unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION).unwrap();
        assert!(require_valid(&conn).is_err());

        let action = ensure_schema(&conn).unwrap();
        assert!(matches!(action, SchemaAction::Recreated { .. }));
        require_valid(&conn).unwrap();
    }

    #[test]
    fn test_unversioned_legacy_table_recreated() {
        let conn = open_test_conn();
        conn.execute_batch(
            "CREATE TABLE moment (id INTEGER PRIMARY KEY, ts INTEGER);
             INSERT INTO moment (ts) VALUES (1000);",
        )
        .unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        let action = ensure_schema(&conn).unwrap();
        assert_eq!(action, SchemaAction::Recreated { from_version: 0 });
        require_valid(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM moment", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unversioned_complete_schema_kept() {
        let conn = open_test_conn();
        create_all(&conn).unwrap();
        conn.execute("INSERT INTO project (name) VALUES ('p')", [])
            .unwrap();
        conn.pragma_update(None, "user_version", 0i64).unwrap();

        assert_eq!(ensure_schema(&conn).unwrap(), SchemaAction::Created);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM project", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_failed_upgrade_keeps_old_schema() {
        let conn = open_test_conn();
        create_all(&conn).unwrap();
        conn.execute("INSERT INTO project (name) VALUES ('p')", [])
            .unwrap();
        // A table squatting on an index name makes the CREATE batch fail
        // after every table has already been dropped.
        conn.execute_batch(
            "DROP INDEX idx_moment_tag_tag;
             CREATE TABLE idx_moment_tag_tag (x INTEGER);",
        )
        .unwrap();

        assert!(upgrade(&conn, SCHEMA_VERSION, SCHEMA_VERSION + 1).is_err());
        assert!(truncate_all(&conn).is_err());

        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM project", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        require_valid(&conn).unwrap();
    }

    #[test]
    fn test_truncate_all_empties_tables() {
        let conn = open_test_conn();
        create_all(&conn).unwrap();
        conn.execute("INSERT INTO uptime (started_at) VALUES (1000)", [])
            .unwrap();
        truncate_all(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM uptime", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_moment_timestamp_unique() {
        let conn = open_test_conn();
        create_all(&conn).unwrap();
        conn.execute("INSERT INTO project (name) VALUES ('p')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO moment (timestamp, accepted, project_id) VALUES (1000, 1, 1)",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO moment (timestamp, accepted, project_id) VALUES (1000, 0, 1)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_moment_tag_foreign_keys_enforced() {
        let conn = open_test_conn();
        create_all(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO moment_tag (moment_id, tag_id) VALUES (1, 1)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_vocabulary_item_unique_per_language() {
        let conn = open_test_conn();
        create_all(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO project (name) VALUES ('p');
             INSERT INTO vocabulary (name, project_id) VALUES ('tags', 1);
             INSERT INTO vocabulary_item (value, language, vocabulary_id) VALUES ('work', 'en', 1);
             INSERT INTO vocabulary_item (value, language, vocabulary_id) VALUES ('work', 'de', 1);",
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO vocabulary_item (value, language, vocabulary_id) VALUES ('work', 'en', 1)",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_uptime_end_before_start_rejected() {
        let conn = open_test_conn();
        create_all(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO uptime (started_at, ended_at) VALUES (2000, 1000)",
            [],
        );
        assert!(result.is_err());
    }
}
