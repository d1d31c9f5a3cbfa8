//! Moment repository.
//!
//! Base moment data is written in its own statement or transaction; the
//! attached tag list is then reconciled through the [`RelationSynchronizer`].
//! Tag sync is best effort: a failure is logged and never undoes the moment.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info, warn};

use pulse_core::error::{PulseError, Result};
use pulse_core::time::DayWindow;
use pulse_core::types::{from_millis, to_millis, Moment, NewMoment};

use crate::context::StoreContext;
use crate::db::Database;
use crate::error::storage_err;
use crate::sync::RelationSynchronizer;
use crate::tags::{self, TagRepository};

const MOMENT_COLUMNS: &str =
    "id, timestamp, accepted, title, description, photo_uri, uptime_id, project_id";

/// Repository for moments of the context's project.
pub struct MomentRepository {
    db: Arc<Database>,
    project_id: i64,
    sync: RelationSynchronizer,
}

impl MomentRepository {
    pub fn new(db: Arc<Database>, ctx: &StoreContext) -> Self {
        let tags = TagRepository::new(Arc::clone(&db), ctx);
        Self {
            db,
            project_id: ctx.project_id,
            sync: RelationSynchronizer::new(tags),
        }
    }

    /// Tag repository sharing this repository's scope.
    pub fn tags(&self) -> &TagRepository {
        self.sync.tags()
    }

    /// Insert a moment and attach its tags.
    ///
    /// Fails with [`PulseError::ConstraintViolation`] when another moment
    /// already uses the timestamp. The returned moment carries the tag names
    /// that were actually persisted.
    pub fn insert(&self, moment: &NewMoment) -> Result<Moment> {
        let ts = to_millis(&moment.timestamp);
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO moment (timestamp, accepted, title, description, photo_uri,
                                     uptime_id, project_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    ts,
                    moment.accepted,
                    moment.title,
                    moment.description,
                    moment.photo_uri,
                    moment.uptime_id,
                    self.project_id,
                ],
            )
            .map_err(storage_err("Failed to insert moment"))?;
            Ok(conn.last_insert_rowid())
        })?;

        info!(id, timestamp = ts, accepted = moment.accepted, "Moment stored");

        let tags = self.sync_tags(id, &moment.tags)?;
        Ok(Moment {
            id,
            timestamp: moment.timestamp,
            accepted: moment.accepted,
            title: moment.title.clone(),
            description: moment.description.clone(),
            photo_uri: moment.photo_uri.clone(),
            uptime_id: moment.uptime_id,
            project_id: self.project_id,
            tags,
        })
    }

    /// Load a moment without its tags.
    pub fn get(&self, id: i64) -> Result<Option<Moment>> {
        let row = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MOMENT_COLUMNS} FROM moment WHERE id = ?1"),
                params![id],
                MomentRow::from_row,
            )
            .optional()
            .map_err(storage_err("Failed to load moment"))
        })?;
        row.map(MomentRow::into_moment).transpose()
    }

    /// Load a moment with its tag names, ordered by name.
    pub fn get_with_tags(&self, id: i64) -> Result<Option<Moment>> {
        let Some(mut moment) = self.get(id)? else {
            return Ok(None);
        };
        moment.tags = self.tags().tag_names_of_moment(id)?;
        Ok(Some(moment))
    }

    /// Accepted moments of a project, newest first.
    pub fn list_accepted(&self, project_id: i64) -> Result<Vec<Moment>> {
        self.query_moments(
            &format!(
                "SELECT {MOMENT_COLUMNS} FROM moment
                 WHERE project_id = ?1 AND accepted = 1
                 ORDER BY timestamp DESC"
            ),
            params![project_id],
        )
    }

    /// Accepted and declined moments of a project, newest first.
    pub fn list_all(&self, project_id: i64) -> Result<Vec<Moment>> {
        self.query_moments(
            &format!(
                "SELECT {MOMENT_COLUMNS} FROM moment
                 WHERE project_id = ?1
                 ORDER BY timestamp DESC"
            ),
            params![project_id],
        )
    }

    /// Moments within the local calendar day `date`, newest first.
    pub fn list_of_day(
        &self,
        project_id: i64,
        date: NaiveDate,
        include_declined: bool,
    ) -> Result<Vec<Moment>> {
        let window = DayWindow::for_date(&Local, date)?;
        self.query_moments(
            &format!(
                "SELECT {MOMENT_COLUMNS} FROM moment
                 WHERE project_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
                   AND (?4 OR accepted = 1)
                 ORDER BY timestamp DESC"
            ),
            params![
                project_id,
                to_millis(&window.start),
                to_millis(&window.end),
                include_declined,
            ],
        )
    }

    pub fn count(&self, project_id: i64) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM moment WHERE project_id = ?1",
                    params![project_id],
                    |row| row.get(0),
                )
                .map_err(storage_err("Failed to count moments"))?;
            Ok(count as u64)
        })
    }

    /// Update title, description, accepted flag and photo, then sync tags.
    ///
    /// `moment.tags` is the desired tag set. Returns `false` when no moment
    /// has the given id, in which case tags are left alone.
    pub fn update(&self, moment: &Moment) -> Result<bool> {
        let rows = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE moment
                 SET title = ?1, description = ?2, accepted = ?3, photo_uri = ?4
                 WHERE id = ?5",
                params![
                    moment.title,
                    moment.description,
                    moment.accepted,
                    moment.photo_uri,
                    moment.id,
                ],
            )
            .map_err(storage_err("Failed to update moment"))
        })?;

        if rows == 0 {
            debug!(id = moment.id, "Update skipped: moment not found");
            return Ok(false);
        }

        self.sync_tags(moment.id, &moment.tags)?;
        debug!(id = moment.id, "Moment updated");
        Ok(true)
    }

    /// Delete a moment and its tag associations in one transaction.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let deleted = self.db.with_tx(|tx| {
            let relations = tags::remove_all_for_moment(tx, id)?;
            let rows = tx
                .execute("DELETE FROM moment WHERE id = ?1", params![id])
                .map_err(storage_err("Failed to delete moment"))?;
            if rows > 0 {
                debug!(id, relations, "Moment deleted");
            }
            Ok(rows > 0)
        })?;
        Ok(deleted)
    }

    /// Reconcile tags, downgrading sync failures to warnings.
    ///
    /// Returns the persisted tag names afterwards.
    fn sync_tags(&self, moment_id: i64, desired: &[String]) -> Result<Vec<String>> {
        if let Err(e) = self.sync.sync(moment_id, desired) {
            warn!(moment_id, error = %e, "Tag sync failed");
        }
        match self.tags().tag_names_of_moment(moment_id) {
            Ok(names) => Ok(names),
            Err(e @ PulseError::StorageUnavailable(_)) => Err(e),
            Err(e) => {
                warn!(moment_id, error = %e, "Failed to reload tags");
                Ok(Vec::new())
            }
        }
    }

    fn query_moments(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Moment>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(storage_err("Failed to list moments"))?;
            let rows = stmt
                .query_map(params, MomentRow::from_row)
                .map_err(storage_err("Failed to list moments"))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to list moments"))
        })?;
        rows.into_iter().map(MomentRow::into_moment).collect()
    }
}

/// Raw column values; timestamps are converted after the lock is released.
struct MomentRow {
    id: i64,
    timestamp: i64,
    accepted: bool,
    title: Option<String>,
    description: Option<String>,
    photo_uri: Option<String>,
    uptime_id: Option<i64>,
    project_id: i64,
}

impl MomentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            accepted: row.get("accepted")?,
            title: row.get("title")?,
            description: row.get("description")?,
            photo_uri: row.get("photo_uri")?,
            uptime_id: row.get("uptime_id")?,
            project_id: row.get("project_id")?,
        })
    }

    fn into_moment(self) -> Result<Moment> {
        Ok(Moment {
            id: self.id,
            timestamp: from_millis(self.timestamp)?,
            accepted: self.accepted,
            title: self.title,
            description: self.description,
            photo_uri: self.photo_uri,
            uptime_id: self.uptime_id,
            project_id: self.project_id,
            tags: Vec::new(),
        })
    }
}
