//! Aggregation Engine: per-day counts, ratios and uptime durations.
//!
//! Every figure is computed over a half-open local-day [`DayWindow`]. Only
//! reads are issued here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};

use pulse_core::error::Result;
use pulse_core::time::DayWindow;
use pulse_core::types::{to_millis, DailyStats};

use crate::context::StoreContext;
use crate::db::Database;
use crate::error::storage_err;
use crate::uptime::UptimeRepository;

/// Summed uptime of one day.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct UptimeTotal {
    count: u64,
    millis: i64,
}

/// Read-only daily statistics for the context's project.
pub struct StatsService {
    db: Arc<Database>,
    ctx: StoreContext,
    uptimes: UptimeRepository,
}

impl StatsService {
    pub fn new(db: Arc<Database>, ctx: &StoreContext) -> Self {
        let uptimes = UptimeRepository::new(Arc::clone(&db), ctx);
        Self {
            db,
            ctx: ctx.clone(),
            uptimes,
        }
    }

    pub fn accepted_count_today(&self) -> Result<u64> {
        self.moment_count(&self.ctx.today()?, true)
    }

    pub fn total_count_today(&self) -> Result<u64> {
        self.moment_count(&self.ctx.today()?, false)
    }

    /// Accepted share of today's moments, 0.0 when there are none.
    pub fn ratio_accepted_today(&self) -> Result<f64> {
        let window = self.ctx.today()?;
        let total = self.moment_count(&window, false)?;
        let accepted = self.moment_count(&window, true)?;
        Ok(ratio(accepted, total))
    }

    /// Time the scheduler ran today, clipped to the day.
    pub fn uptime_duration_today(&self) -> Result<Duration> {
        Ok(millis_to_duration(self.uptime_total(&self.ctx.today()?)?.millis))
    }

    /// Number of intervals contributing to [`StatsService::uptime_duration_today`].
    pub fn uptime_count_today(&self) -> Result<u64> {
        Ok(self.uptime_total(&self.ctx.today()?)?.count)
    }

    pub fn average_uptime_duration_today(&self) -> Result<Duration> {
        let total = self.uptime_total(&self.ctx.today()?)?;
        Ok(average(total))
    }

    /// All figures for the current local day.
    pub fn today(&self) -> Result<DailyStats> {
        self.collect(self.ctx.today()?)
    }

    /// All figures for an arbitrary local date.
    pub fn for_day(&self, date: NaiveDate) -> Result<DailyStats> {
        self.collect(DayWindow::for_date(&Local, date)?)
    }

    fn collect(&self, window: DayWindow) -> Result<DailyStats> {
        let total = self.moment_count(&window, false)?;
        let accepted = self.moment_count(&window, true)?;
        let uptime = self.uptime_total(&window)?;
        let trailing = self.uptimes.count_trailing_cancelled_in(&window)?;

        Ok(DailyStats {
            date: window.date,
            total_moments: total,
            accepted_moments: accepted,
            ratio_accepted: ratio(accepted, total),
            uptime_count: uptime.count,
            uptime_duration: millis_to_duration(uptime.millis),
            average_uptime: average(uptime),
            trailing_cancelled_beeps: trailing,
        })
    }

    fn moment_count(&self, window: &DayWindow, accepted_only: bool) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM moment
                     WHERE project_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
                       AND (NOT ?4 OR accepted = 1)",
                    params![
                        self.ctx.project_id,
                        to_millis(&window.start),
                        to_millis(&window.end),
                        accepted_only,
                    ],
                    |row| row.get(0),
                )
                .map_err(storage_err("Failed to count moments"))?;
            Ok(count as u64)
        })
    }

    /// Sum intervals overlapping `window`, each clipped to it.
    ///
    /// An open interval counts only when it is the latest interval overall,
    /// the window contains now and it has already run longer than the
    /// minimum; it then ends at now. Other open rows are crash leftovers.
    fn uptime_total(&self, window: &DayWindow) -> Result<UptimeTotal> {
        let start = to_millis(&window.start);
        let end = to_millis(&window.end);

        let (rows, latest_id) = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, started_at, ended_at FROM uptime
                     WHERE started_at < ?2 AND (ended_at IS NULL OR ended_at > ?1)
                     ORDER BY started_at ASC",
                )
                .map_err(storage_err("Failed to load uptimes"))?;
            let rows = stmt
                .query_map(params![start, end], |row| {
                    Ok((
                        row.get::<_, i64>("id")?,
                        row.get::<_, i64>("started_at")?,
                        row.get::<_, Option<i64>>("ended_at")?,
                    ))
                })
                .map_err(storage_err("Failed to load uptimes"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to load uptimes"))?;
            let latest_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM uptime ORDER BY started_at DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("Failed to load latest uptime"))?;
            Ok((rows, latest_id))
        })?;

        let now = self.ctx.now();
        let now_ms = to_millis(&now);
        let min = self.ctx.min_uptime_millis();

        let mut total = UptimeTotal::default();
        for (id, started_at, ended_at) in rows {
            let effective_end = match ended_at {
                Some(e) => e,
                None if Some(id) != latest_id => {
                    warn!(id, started_at, "Ignoring stale open uptime");
                    continue;
                }
                None if !window.contains(&now) || now_ms - started_at <= min => {
                    debug!(id, "Running uptime not counted");
                    continue;
                }
                None => now_ms,
            };

            let clipped = effective_end.min(end) - started_at.max(start);
            if clipped > 0 {
                total.count += 1;
                total.millis += clipped;
            }
        }
        Ok(total)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn average(total: UptimeTotal) -> Duration {
    if total.count == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(total.millis as f64 / total.count as f64 / 1_000.0)
}

fn millis_to_duration(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use pulse_core::time::testing::CentralEurope;
    use pulse_core::time::FixedClock;
    use pulse_core::types::{NewMoment, UptimeClose};

    use crate::moments::MomentRepository;
    use crate::testing::make_store;

    fn local(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2026, 6, d, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn store_at(now: DateTime<Utc>) -> (Arc<Database>, StoreContext, Arc<FixedClock>) {
        let (db, ctx) = make_store();
        let clock = Arc::new(FixedClock::new(now));
        let ctx = ctx.with_clock(clock.clone());
        (db, ctx, clock)
    }

    #[test]
    fn test_empty_day() {
        let (db, ctx, _) = store_at(local(10, 12, 0));
        let stats = StatsService::new(db, &ctx);
        assert_eq!(stats.total_count_today().unwrap(), 0);
        assert_eq!(stats.ratio_accepted_today().unwrap(), 0.0);
        assert_eq!(stats.uptime_duration_today().unwrap(), Duration::ZERO);
        assert_eq!(stats.average_uptime_duration_today().unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_counts_and_ratio() {
        let (db, ctx, _) = store_at(local(10, 18, 0));
        let moments = MomentRepository::new(Arc::clone(&db), &ctx);
        moments.insert(&NewMoment::accepted(local(10, 9, 0))).unwrap();
        moments.insert(&NewMoment::declined(local(10, 9, 5))).unwrap();
        moments.insert(&NewMoment::accepted(local(10, 11, 0))).unwrap();
        moments.insert(&NewMoment::accepted(local(9, 23, 59))).unwrap();

        let stats = StatsService::new(db, &ctx);
        assert_eq!(stats.total_count_today().unwrap(), 3);
        assert_eq!(stats.accepted_count_today().unwrap(), 2);
        assert!((stats.ratio_accepted_today().unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_uptime_clipped_to_day() {
        let (db, ctx, _) = store_at(local(10, 20, 0));
        let uptimes = UptimeRepository::new(Arc::clone(&db), &ctx);

        // 23:00 the day before until 01:00 counts one hour.
        let a = uptimes.start_uptime(local(9, 23, 0)).unwrap();
        uptimes.end_uptime(a, local(10, 1, 0)).unwrap();
        let b = uptimes.start_uptime(local(10, 8, 0)).unwrap();
        uptimes.end_uptime(b, local(10, 10, 0)).unwrap();

        let stats = StatsService::new(db, &ctx);
        assert_eq!(stats.uptime_count_today().unwrap(), 2);
        assert_eq!(stats.uptime_duration_today().unwrap(), Duration::from_secs(3 * 3600));
        assert_eq!(
            stats.average_uptime_duration_today().unwrap(),
            Duration::from_secs(90 * 60)
        );
    }

    #[test]
    fn test_running_uptime_extrapolated_to_now() {
        let (db, ctx, clock) = store_at(local(10, 9, 0));
        let uptimes = UptimeRepository::new(Arc::clone(&db), &ctx);
        uptimes.start_uptime(local(10, 8, 0)).unwrap();

        let stats = StatsService::new(db, &ctx);
        assert_eq!(stats.uptime_duration_today().unwrap(), Duration::from_secs(3600));

        clock.set(local(10, 8, 0) + chrono::Duration::seconds(30));
        assert_eq!(stats.uptime_count_today().unwrap(), 0);
        assert_eq!(stats.uptime_duration_today().unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_stale_open_rows_ignored() {
        let (db, ctx, _) = store_at(local(10, 12, 0));
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO uptime (started_at) VALUES (?1), (?2)",
                params![to_millis(&local(10, 6, 0)), to_millis(&local(10, 10, 0))],
            )
            .map_err(storage_err("insert"))?;
            Ok(())
        })
        .unwrap();

        let stats = StatsService::new(db, &ctx);
        assert_eq!(stats.uptime_count_today().unwrap(), 1);
        assert_eq!(stats.uptime_duration_today().unwrap(), Duration::from_secs(2 * 3600));
    }

    #[test]
    fn test_for_day_snapshot() {
        let (db, ctx, _) = store_at(local(11, 12, 0));
        let moments = MomentRepository::new(Arc::clone(&db), &ctx);
        let uptimes = UptimeRepository::new(Arc::clone(&db), &ctx);

        let up = uptimes.start_uptime(local(10, 8, 0)).unwrap();
        let beep = uptimes.add_scheduled_beep(local(10, 9, 0), up).unwrap();
        uptimes.cancel(beep).unwrap();
        uptimes.end_uptime(up, local(10, 9, 30)).unwrap();
        moments.insert(&NewMoment::accepted(local(10, 9, 10))).unwrap();

        let stats = StatsService::new(db, &ctx);
        let day = stats.for_day(NaiveDate::from_ymd_opt(2026, 6, 10).unwrap()).unwrap();
        assert_eq!(day.total_moments, 1);
        assert_eq!(day.accepted_moments, 1);
        assert_eq!(day.ratio_accepted, 1.0);
        assert_eq!(day.uptime_count, 1);
        assert_eq!(day.uptime_duration, Duration::from_secs(90 * 60));
        assert_eq!(day.trailing_cancelled_beeps, 1);

        let today = stats.today().unwrap();
        assert_eq!(today.date, NaiveDate::from_ymd_opt(2026, 6, 11).unwrap());
        assert_eq!(today.total_moments, 0);
        assert_eq!(today.uptime_count, 0);
    }

    fn utc(mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, mo, d, h, mi, 0).unwrap()
    }

    fn closed_uptime(uptimes: &UptimeRepository, start: DateTime<Utc>, end: DateTime<Utc>) {
        let id = uptimes.start_uptime(start).unwrap();
        assert_eq!(uptimes.end_uptime(id, end).unwrap(), UptimeClose::Closed);
    }

    #[test]
    fn test_spring_forward_day_clips_at_local_midnight() {
        let (db, ctx, _) = store_at(utc(4, 1, 12, 0));
        let uptimes = UptimeRepository::new(Arc::clone(&db), &ctx);
        let moments = MomentRepository::new(Arc::clone(&db), &ctx);

        // 23:30 on the 28th to 01:30 on the 29th local time.
        closed_uptime(&uptimes, utc(3, 28, 22, 30), utc(3, 29, 0, 30));
        // 23:00 on the 29th (summer time) to 01:00 on the 30th.
        closed_uptime(&uptimes, utc(3, 29, 21, 0), utc(3, 29, 23, 0));
        // 23:30 local on the 29th counts, 00:30 on the 30th does not.
        moments.insert(&NewMoment::accepted(utc(3, 29, 21, 30))).unwrap();
        moments.insert(&NewMoment::accepted(utc(3, 29, 22, 30))).unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
        let window = DayWindow::for_date(&CentralEurope, date).unwrap();
        let day = StatsService::new(db, &ctx).collect(window).unwrap();

        assert_eq!(day.date, date);
        assert_eq!(day.uptime_count, 2);
        assert_eq!(day.uptime_duration, Duration::from_secs(150 * 60));
        assert_eq!(day.total_moments, 1);
    }

    #[test]
    fn test_fall_back_day_includes_extra_hour() {
        let (db, ctx, _) = store_at(utc(11, 1, 12, 0));
        let uptimes = UptimeRepository::new(Arc::clone(&db), &ctx);

        // 23:30 to 00:30 local; the first half hour is the 25th hour of the day.
        closed_uptime(&uptimes, utc(10, 25, 22, 30), utc(10, 25, 23, 30));

        let date = NaiveDate::from_ymd_opt(2026, 10, 25).unwrap();
        let window = DayWindow::for_date(&CentralEurope, date).unwrap();
        let stats = StatsService::new(db, &ctx);
        let total = stats.uptime_total(&window).unwrap();

        assert_eq!(total.count, 1);
        assert_eq!(millis_to_duration(total.millis), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_ratio_helper() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(1, 2), 0.5);
        assert_eq!(average(UptimeTotal { count: 2, millis: 3_000 }), Duration::from_millis(1_500));
    }
}
