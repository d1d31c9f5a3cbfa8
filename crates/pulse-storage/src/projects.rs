//! Project and vocabulary repositories.
//!
//! Both are looked up or created by name when a [`crate::StoreContext`] is
//! bootstrapped from configuration.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use pulse_core::error::Result;
use pulse_core::types::{Project, Vocabulary};

use crate::db::Database;
use crate::error::storage_err;

/// Repository for projects.
pub struct ProjectRepository {
    db: Arc<Database>,
}

impl ProjectRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Return the project called `name`, creating it if missing.
    pub fn ensure(&self, name: &str) -> Result<Project> {
        self.db.with_tx(|tx| {
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO project (name) VALUES (?1)",
                    params![name],
                )
                .map_err(storage_err("Failed to insert project"))?;
            if inserted > 0 {
                info!(project = name, "Project created");
            }
            tx.query_row(
                "SELECT id, name FROM project WHERE name = ?1",
                params![name],
                row_to_project,
            )
            .map_err(storage_err("Failed to load project"))
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Project>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name FROM project WHERE id = ?1",
                params![id],
                row_to_project,
            )
            .optional()
            .map_err(storage_err("Failed to load project"))
        })
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Project>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name FROM project WHERE name = ?1",
                params![name],
                row_to_project,
            )
            .optional()
            .map_err(storage_err("Failed to load project"))
        })
    }

    /// All projects ordered by name.
    pub fn list(&self) -> Result<Vec<Project>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name FROM project ORDER BY name")
                .map_err(storage_err("Failed to list projects"))?;
            let rows = stmt
                .query_map([], row_to_project)
                .map_err(storage_err("Failed to list projects"))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to list projects"))
        })
    }
}

/// Repository for vocabularies.
pub struct VocabularyRepository {
    db: Arc<Database>,
}

impl VocabularyRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Return the vocabulary `name` of `project_id`, creating it if missing.
    pub fn ensure(&self, project_id: i64, name: &str) -> Result<Vocabulary> {
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT OR IGNORE INTO vocabulary (name, project_id) VALUES (?1, ?2)",
                params![name, project_id],
            )
            .map_err(storage_err("Failed to insert vocabulary"))?;
            tx.query_row(
                "SELECT id, name, project_id FROM vocabulary WHERE project_id = ?1 AND name = ?2",
                params![project_id, name],
                row_to_vocabulary,
            )
            .map_err(storage_err("Failed to load vocabulary"))
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Vocabulary>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, project_id FROM vocabulary WHERE id = ?1",
                params![id],
                row_to_vocabulary,
            )
            .optional()
            .map_err(storage_err("Failed to load vocabulary"))
        })
    }

    /// Vocabularies of a project ordered by name.
    pub fn list(&self, project_id: i64) -> Result<Vec<Vocabulary>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, project_id FROM vocabulary
                     WHERE project_id = ?1 ORDER BY name",
                )
                .map_err(storage_err("Failed to list vocabularies"))?;
            let rows = stmt
                .query_map(params![project_id], row_to_vocabulary)
                .map_err(storage_err("Failed to list vocabularies"))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to list vocabularies"))
        })
    }
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
    })
}

fn row_to_vocabulary(row: &Row<'_>) -> rusqlite::Result<Vocabulary> {
    Ok(Vocabulary {
        id: row.get("id")?,
        name: row.get("name")?,
        project_id: row.get("project_id")?,
    })
}
