//! Tag (vocabulary item) repository.
//!
//! A tag exists only while at least one moment references it: it is created
//! on first association and deleted in the same transaction that removes its
//! last association.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use pulse_core::error::{PulseError, Result};
use pulse_core::types::{normalize_tag, Tag};

use crate::context::StoreContext;
use crate::db::Database;
use crate::error::storage_err;

const TAG_COLUMNS: &str = "t.id, t.value, t.vocabulary_id, t.language";

/// Repository for the tags of one vocabulary and language.
pub struct TagRepository {
    db: Arc<Database>,
    vocabulary_id: i64,
    language: String,
}

impl TagRepository {
    pub fn new(db: Arc<Database>, ctx: &StoreContext) -> Self {
        Self {
            db,
            vocabulary_id: ctx.vocabulary_id,
            language: ctx.language.clone(),
        }
    }

    /// Associate tag `name` with a moment, creating the tag if needed.
    ///
    /// Returns `Ok(None)` when the association cannot be inserted because it
    /// already exists or the moment is unknown; the transaction is rolled
    /// back so no orphan tag is left behind.
    pub fn add_tag(&self, name: &str, moment_id: i64) -> Result<Option<Tag>> {
        let value = required_name(name)?;

        let result = self.db.with_tx(|tx| {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM vocabulary_item
                     WHERE vocabulary_id = ?1 AND language = ?2 AND value = ?3",
                    params![self.vocabulary_id, self.language, value],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("Failed to look up tag"))?;

            let tag_id = match existing {
                Some(id) => id,
                None => {
                    tx.execute(
                        "INSERT INTO vocabulary_item (value, language, vocabulary_id)
                         VALUES (?1, ?2, ?3)",
                        params![value, self.language, self.vocabulary_id],
                    )
                    .map_err(storage_err("Failed to insert tag"))?;
                    tx.last_insert_rowid()
                }
            };

            tx.execute(
                "INSERT INTO moment_tag (moment_id, tag_id) VALUES (?1, ?2)",
                params![moment_id, tag_id],
            )
            .map_err(storage_err("Failed to insert tag relation"))?;

            Ok(Tag {
                id: tag_id,
                name: value.clone(),
                vocabulary_id: self.vocabulary_id,
                language: self.language.clone(),
            })
        });

        match result {
            Ok(tag) => {
                debug!(moment_id, tag = %tag.name, "Tag added");
                Ok(Some(tag))
            }
            Err(e) if e.is_constraint_violation() => {
                warn!(moment_id, tag = %value, error = %e, "Tag relation not inserted");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the association between tag `name` and a moment.
    ///
    /// Deletes the tag itself when no other moment uses it. Returns
    /// `Ok(false)` if there was no such association and
    /// [`PulseError::InvalidInput`] for a blank name, like
    /// [`TagRepository::add_tag`].
    pub fn remove_tag(&self, name: &str, moment_id: i64) -> Result<bool> {
        let value = required_name(name)?;

        let removed = self.db.with_tx(|tx| {
            let tag_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM vocabulary_item
                     WHERE vocabulary_id = ?1 AND language = ?2 AND value = ?3",
                    params![self.vocabulary_id, self.language, value],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("Failed to look up tag"))?;
            let Some(tag_id) = tag_id else {
                return Ok(false);
            };

            let rows = tx
                .execute(
                    "DELETE FROM moment_tag WHERE moment_id = ?1 AND tag_id = ?2",
                    params![moment_id, tag_id],
                )
                .map_err(storage_err("Failed to delete tag relation"))?;
            if rows == 0 {
                return Ok(false);
            }

            reclaim_if_orphan(tx, tag_id)?;
            Ok(true)
        })?;

        if removed {
            debug!(moment_id, tag = %value, "Tag removed");
        }
        Ok(removed)
    }

    /// Tags of a moment within this vocabulary, ordered by name.
    pub fn tags_of_moment(&self, moment_id: i64) -> Result<Vec<Tag>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TAG_COLUMNS} FROM vocabulary_item t
                     INNER JOIN moment_tag mt ON mt.tag_id = t.id
                     WHERE mt.moment_id = ?1 AND t.vocabulary_id = ?2 AND t.language = ?3
                     ORDER BY t.value"
                ))
                .map_err(storage_err("Failed to load tags of moment"))?;
            let rows = stmt
                .query_map(
                    params![moment_id, self.vocabulary_id, self.language],
                    row_to_tag,
                )
                .map_err(storage_err("Failed to load tags of moment"))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to load tags of moment"))
        })
    }

    /// Names of [`TagRepository::tags_of_moment`].
    pub fn tag_names_of_moment(&self, moment_id: i64) -> Result<Vec<String>> {
        Ok(self
            .tags_of_moment(moment_id)?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }

    pub fn find(&self, name: &str) -> Result<Option<Tag>> {
        let Some(value) = normalize_tag(name) else {
            return Ok(None);
        };
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {TAG_COLUMNS} FROM vocabulary_item t
                     WHERE t.vocabulary_id = ?1 AND t.language = ?2 AND t.value = ?3"
                ),
                params![self.vocabulary_id, self.language, value],
                row_to_tag,
            )
            .optional()
            .map_err(storage_err("Failed to look up tag"))
        })
    }

    /// Every tag of the vocabulary, ordered by name.
    pub fn list(&self) -> Result<Vec<Tag>> {
        self.search("")
    }

    /// Tags whose name starts with `prefix` (case-insensitive), ordered by name.
    pub fn search(&self, prefix: &str) -> Result<Vec<Tag>> {
        let pattern = format!("{}%", escape_like(&prefix.trim().to_lowercase()));
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TAG_COLUMNS} FROM vocabulary_item t
                     WHERE t.vocabulary_id = ?1 AND t.language = ?2
                       AND t.value LIKE ?3 ESCAPE '\\'
                     ORDER BY t.value"
                ))
                .map_err(storage_err("Failed to search tags"))?;
            let rows = stmt
                .query_map(
                    params![self.vocabulary_id, self.language, pattern],
                    row_to_tag,
                )
                .map_err(storage_err("Failed to search tags"))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to search tags"))
        })
    }

    /// Number of moments tagged with `name`.
    pub fn usage_count(&self, name: &str) -> Result<u64> {
        let Some(value) = normalize_tag(name) else {
            return Ok(0);
        };
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM moment_tag mt
                     INNER JOIN vocabulary_item t ON t.id = mt.tag_id
                     WHERE t.vocabulary_id = ?1 AND t.language = ?2 AND t.value = ?3",
                    params![self.vocabulary_id, self.language, value],
                    |row| row.get(0),
                )
                .map_err(storage_err("Failed to count tag usage"))?;
            Ok(count as u64)
        })
    }

    /// Number of tags with no associated moment, across all vocabularies.
    ///
    /// Always zero unless the database was written outside this crate.
    pub fn orphan_count(&self) -> Result<u64> {
        self.db.with_conn(count_orphans)
    }
}

/// Remove every tag association of a moment, reclaiming orphaned tags.
///
/// Runs inside the caller's transaction; covers all vocabularies.
pub(crate) fn remove_all_for_moment(conn: &Connection, moment_id: i64) -> Result<usize> {
    let tag_ids: Vec<i64> = {
        let mut stmt = conn
            .prepare("SELECT tag_id FROM moment_tag WHERE moment_id = ?1")
            .map_err(storage_err("Failed to load tag relations"))?;
        let rows = stmt
            .query_map(params![moment_id], |row| row.get(0))
            .map_err(storage_err("Failed to load tag relations"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_err("Failed to load tag relations"))?
    };

    for tag_id in &tag_ids {
        conn.execute(
            "DELETE FROM moment_tag WHERE moment_id = ?1 AND tag_id = ?2",
            params![moment_id, tag_id],
        )
        .map_err(storage_err("Failed to delete tag relation"))?;
        reclaim_if_orphan(conn, *tag_id)?;
    }
    Ok(tag_ids.len())
}

/// Delete the tag if no association references it any more.
fn reclaim_if_orphan(conn: &Connection, tag_id: i64) -> Result<()> {
    let remaining: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM moment_tag WHERE tag_id = ?1",
            params![tag_id],
            |row| row.get(0),
        )
        .map_err(storage_err("Failed to count tag relations"))?;
    if remaining > 0 {
        return Ok(());
    }

    let deleted = conn
        .execute("DELETE FROM vocabulary_item WHERE id = ?1", params![tag_id])
        .map_err(storage_err("Failed to delete orphaned tag"))?;
    if deleted != 1 {
        return Err(PulseError::TransactionAborted(format!(
            "orphaned tag {tag_id} could not be deleted"
        )));
    }
    debug!(tag_id, "Orphaned tag reclaimed");
    Ok(())
}

pub(crate) fn count_orphans(conn: &Connection) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM vocabulary_item t
             WHERE NOT EXISTS (SELECT 1 FROM moment_tag mt WHERE mt.tag_id = t.id)",
            [],
            |row| row.get(0),
        )
        .map_err(storage_err("Failed to count orphaned tags"))?;
    Ok(count as u64)
}

fn row_to_tag(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get("id")?,
        name: row.get("value")?,
        vocabulary_id: row.get("vocabulary_id")?,
        language: row.get("language")?,
    })
}

fn required_name(name: &str) -> Result<String> {
    normalize_tag(name).ok_or_else(|| PulseError::InvalidInput("tag name is empty".to_string()))
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
