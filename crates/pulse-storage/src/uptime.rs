//! Uptime interval and scheduled beep repository.
//!
//! An interval shorter than the configured minimum is discarded on close
//! together with its beeps, so the store only ever holds intervals that
//! meet the minimum or are still running.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info, warn};

use pulse_core::error::{PulseError, Result};
use pulse_core::time::DayWindow;
use pulse_core::types::{from_millis, to_millis, ScheduledBeep, Timestamp, Uptime, UptimeClose};

use crate::context::StoreContext;
use crate::db::Database;
use crate::error::storage_err;

/// Repository for uptime intervals and the beeps scheduled inside them.
pub struct UptimeRepository {
    db: Arc<Database>,
    ctx: StoreContext,
}

impl UptimeRepository {
    pub fn new(db: Arc<Database>, ctx: &StoreContext) -> Self {
        Self {
            db,
            ctx: ctx.clone(),
        }
    }

    /// Open a new interval starting at `started_at`.
    ///
    /// Fails with [`PulseError::ConstraintViolation`] while another interval
    /// is still open or when the start timestamp is already used.
    pub fn start_uptime(&self, started_at: Timestamp) -> Result<i64> {
        let start = to_millis(&started_at);
        let id = self.db.with_tx(|tx| {
            let open: Option<i64> = tx
                .query_row(
                    "SELECT id FROM uptime WHERE ended_at IS NULL LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("Failed to look up open uptime"))?;
            if let Some(open) = open {
                return Err(PulseError::ConstraintViolation(format!(
                    "uptime {open} is still open"
                )));
            }

            tx.execute(
                "INSERT INTO uptime (started_at) VALUES (?1)",
                params![start],
            )
            .map_err(storage_err("Failed to insert uptime"))?;
            Ok(tx.last_insert_rowid())
        })?;

        info!(id, started_at = start, "Uptime started");
        Ok(id)
    }

    /// Close interval `id` at `ended_at`.
    ///
    /// Intervals shorter than the minimum duration are deleted along with
    /// their beeps; moments that referenced them keep a null uptime.
    pub fn end_uptime(&self, id: i64, ended_at: Timestamp) -> Result<UptimeClose> {
        let end = to_millis(&ended_at);
        let min = self.ctx.min_uptime_millis();

        let outcome = self.db.with_tx(|tx| {
            let row: Option<(i64, Option<i64>)> = tx
                .query_row(
                    "SELECT started_at, ended_at FROM uptime WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get("started_at")?, row.get("ended_at")?)),
                )
                .optional()
                .map_err(storage_err("Failed to load uptime"))?;

            let (start, current_end) = row.ok_or_else(|| PulseError::not_found("uptime", id))?;
            if current_end.is_some() {
                return Err(PulseError::ConstraintViolation(format!(
                    "uptime {id} is already closed"
                )));
            }
            if end < start {
                return Err(PulseError::InvalidInput(format!(
                    "uptime {id} cannot end before it starts"
                )));
            }

            if end - start < min {
                let beeps = tx
                    .execute(
                        "DELETE FROM scheduled_beep WHERE uptime_id = ?1",
                        params![id],
                    )
                    .map_err(storage_err("Failed to delete beeps"))?;
                tx.execute("DELETE FROM uptime WHERE id = ?1", params![id])
                    .map_err(storage_err("Failed to delete uptime"))?;
                debug!(id, beeps, duration_ms = end - start, "Short uptime removed");
                return Ok(UptimeClose::Discarded);
            }

            tx.execute(
                "UPDATE uptime SET ended_at = ?1 WHERE id = ?2",
                params![end, id],
            )
            .map_err(storage_err("Failed to close uptime"))?;
            Ok(UptimeClose::Closed)
        })?;

        info!(id, ?outcome, "Uptime ended");
        Ok(outcome)
    }

    pub fn get(&self, id: i64) -> Result<Option<Uptime>> {
        let row = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, started_at, ended_at FROM uptime WHERE id = ?1",
                params![id],
                raw_uptime,
            )
            .optional()
            .map_err(storage_err("Failed to load uptime"))
        })?;
        row.map(into_uptime).transpose()
    }

    /// The running interval, if any.
    ///
    /// Several open rows can only be left behind by a crash; the latest one
    /// is returned.
    pub fn current(&self) -> Result<Option<Uptime>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, started_at, ended_at FROM uptime
                     WHERE ended_at IS NULL
                     ORDER BY started_at DESC",
                )
                .map_err(storage_err("Failed to load open uptime"))?;
            let rows = stmt
                .query_map([], raw_uptime)
                .map_err(storage_err("Failed to load open uptime"))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to load open uptime"))
        })?;

        if rows.len() > 1 {
            warn!(open = rows.len(), "Multiple open uptime intervals");
        }
        rows.into_iter().next().map(into_uptime).transpose()
    }

    /// Record a beep planned at `timestamp` within `uptime_id`.
    pub fn add_scheduled_beep(&self, timestamp: Timestamp, uptime_id: i64) -> Result<i64> {
        let ts = to_millis(&timestamp);
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scheduled_beep (timestamp, cancelled, uptime_id)
                 VALUES (?1, 0, ?2)",
                params![ts, uptime_id],
            )
            .map_err(storage_err("Failed to insert scheduled beep"))?;
            Ok(conn.last_insert_rowid())
        })?;
        debug!(id, uptime_id, timestamp = ts, "Beep scheduled");
        Ok(id)
    }

    /// Mark a beep as cancelled. The row is kept.
    pub fn cancel(&self, beep_id: i64) -> Result<bool> {
        let rows = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE scheduled_beep SET cancelled = 1 WHERE id = ?1",
                params![beep_id],
            )
            .map_err(storage_err("Failed to cancel beep"))
        })?;
        Ok(rows > 0)
    }

    /// Beeps of an interval in chronological order.
    pub fn beeps_of_uptime(&self, uptime_id: i64) -> Result<Vec<ScheduledBeep>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, timestamp, cancelled, uptime_id FROM scheduled_beep
                     WHERE uptime_id = ?1
                     ORDER BY timestamp ASC, id ASC",
                )
                .map_err(storage_err("Failed to list beeps"))?;
            let rows = stmt
                .query_map(params![uptime_id], raw_beep)
                .map_err(storage_err("Failed to list beeps"))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to list beeps"))
        })?;
        rows.into_iter().map(into_beep).collect()
    }

    /// Length of the run of cancelled beeps at the end of today.
    ///
    /// Today's beeps are scanned from the most recent backward and counting
    /// stops at the first beep that was not cancelled.
    pub fn count_trailing_cancelled_beeps_today(&self) -> Result<u64> {
        self.count_trailing_cancelled_in(&self.ctx.today()?)
    }

    pub(crate) fn count_trailing_cancelled_in(&self, window: &DayWindow) -> Result<u64> {
        let flags: Vec<bool> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT cancelled FROM scheduled_beep
                     WHERE timestamp >= ?1 AND timestamp < ?2
                     ORDER BY timestamp DESC, id DESC",
                )
                .map_err(storage_err("Failed to load beeps of today"))?;
            let rows = stmt
                .query_map(
                    params![to_millis(&window.start), to_millis(&window.end)],
                    |row| row.get("cancelled"),
                )
                .map_err(storage_err("Failed to load beeps of today"))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to load beeps of today"))
        })?;

        Ok(flags.into_iter().take_while(|cancelled| *cancelled).count() as u64)
    }
}

type RawUptime = (i64, i64, Option<i64>);

fn raw_uptime(row: &Row<'_>) -> rusqlite::Result<RawUptime> {
    Ok((row.get("id")?, row.get("started_at")?, row.get("ended_at")?))
}

fn into_uptime((id, started_at, ended_at): RawUptime) -> Result<Uptime> {
    Ok(Uptime {
        id,
        started_at: from_millis(started_at)?,
        ended_at: ended_at.map(from_millis).transpose()?,
    })
}

type RawBeep = (i64, i64, bool, i64);

fn raw_beep(row: &Row<'_>) -> rusqlite::Result<RawBeep> {
    Ok((
        row.get("id")?,
        row.get("timestamp")?,
        row.get("cancelled")?,
        row.get("uptime_id")?,
    ))
}

fn into_beep((id, timestamp, cancelled, uptime_id): RawBeep) -> Result<ScheduledBeep> {
    Ok(ScheduledBeep {
        id,
        timestamp: from_millis(timestamp)?,
        cancelled,
        uptime_id,
    })
}
