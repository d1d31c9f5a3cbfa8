//! Command execution against the storage layer.
//!
//! Everything here is synchronous; `main` runs it on the blocking pool.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{info, warn};

use pulse_core::config::SamplingConfig;
use pulse_core::error::{PulseError, Result};
use pulse_core::types::{DailyStats, Moment, NewMoment, UptimeClose};
use pulse_storage::{
    Database, MomentRepository, StatsService, StoreContext, TagRepository, UptimeRepository,
};

use crate::cli::{BeepCommand, Command, MomentAddArgs, MomentCommand, MomentEditArgs, UptimeCommand};

/// Run one command, writing human-readable or JSON output to `out`.
pub fn execute(
    command: Command,
    db: &Arc<Database>,
    ctx: &StoreContext,
    sampling: &SamplingConfig,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Command::Init => {
            writeln!(out, "Database ready (schema version {})", db.schema_version()?)?;
        }
        Command::Moment { action } => moment(action, db, ctx, out)?,
        Command::Tags { prefix } => {
            let tags = TagRepository::new(Arc::clone(db), ctx);
            for tag in tags.search(prefix.as_deref().unwrap_or(""))? {
                writeln!(out, "{}\t{}", tag.name, tags.usage_count(&tag.name)?)?;
            }
        }
        Command::Uptime { action } => uptime(action, db, ctx, out)?,
        Command::Beep { action } => beep(action, db, ctx, out)?,
        Command::Stats { date, json } => {
            let stats = StatsService::new(Arc::clone(db), ctx);
            let day = match date {
                Some(date) => stats.for_day(date)?,
                None => stats.today()?,
            };
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&day)?)?;
            } else {
                write_stats(out, &day)?;
            }
        }
        Command::Reset { yes } => {
            if !yes {
                return Err(PulseError::InvalidInput(
                    "reset deletes all data; pass --yes to confirm".to_string(),
                ));
            }
            db.truncate_all()?;
            StoreContext::bootstrap(db, sampling)?;
            warn!("All data deleted");
            writeln!(out, "All tables recreated")?;
        }
    }
    Ok(())
}

fn moment(
    action: MomentCommand,
    db: &Arc<Database>,
    ctx: &StoreContext,
    out: &mut dyn Write,
) -> Result<()> {
    let moments = MomentRepository::new(Arc::clone(db), ctx);
    match action {
        MomentCommand::Add(args) => {
            let new = new_moment(args, db, ctx)?;
            let stored = moments.insert(&new)?;
            writeln!(out, "{}", stored.id)?;
        }
        MomentCommand::Show { id, json } => {
            let moment = moments
                .get_with_tags(id)?
                .ok_or_else(|| PulseError::not_found("moment", id))?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&moment)?)?;
            } else {
                write_moment(out, &moment)?;
            }
        }
        MomentCommand::List { all, date, json } => {
            let listed = match (date, all) {
                (Some(date), include_declined) => {
                    moments.list_of_day(ctx.project_id, date, include_declined)?
                }
                (None, true) => moments.list_all(ctx.project_id)?,
                (None, false) => moments.list_accepted(ctx.project_id)?,
            };
            let mut with_tags = Vec::with_capacity(listed.len());
            for mut m in listed {
                m.tags = moments.tags().tag_names_of_moment(m.id)?;
                with_tags.push(m);
            }
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&with_tags)?)?;
            } else {
                for m in &with_tags {
                    write_moment(out, m)?;
                }
            }
        }
        MomentCommand::Edit(args) => {
            let id = args.id;
            let mut moment = moments
                .get_with_tags(id)?
                .ok_or_else(|| PulseError::not_found("moment", id))?;
            apply_edit(&mut moment, args);
            if !moments.update(&moment)? {
                return Err(PulseError::not_found("moment", id));
            }
            info!(id, "Moment edited");
            writeln!(out, "{id}")?;
        }
        MomentCommand::Delete { id } => {
            if !moments.delete(id)? {
                return Err(PulseError::not_found("moment", id));
            }
            writeln!(out, "Deleted moment {id}")?;
        }
    }
    Ok(())
}

fn new_moment(args: MomentAddArgs, db: &Arc<Database>, ctx: &StoreContext) -> Result<NewMoment> {
    let uptime_id = match args.uptime {
        Some(id) => Some(id),
        None => UptimeRepository::new(Arc::clone(db), ctx)
            .current()?
            .map(|u| u.id),
    };
    let timestamp = args.at.unwrap_or_else(|| ctx.now());
    let base = if args.declined {
        NewMoment::declined(timestamp)
    } else {
        NewMoment::accepted(timestamp)
    };
    Ok(NewMoment {
        title: args.title,
        description: args.description,
        photo_uri: args.photo,
        uptime_id,
        ..base.with_tags(args.tags)
    })
}

fn apply_edit(moment: &mut Moment, args: MomentEditArgs) {
    if args.title.is_some() {
        moment.title = args.title;
    }
    if args.description.is_some() {
        moment.description = args.description;
    }
    if args.photo.is_some() {
        moment.photo_uri = args.photo;
    }
    if args.accepted {
        moment.accepted = true;
    }
    if args.declined {
        moment.accepted = false;
    }
    if args.clear_tags {
        moment.tags.clear();
    } else if !args.tags.is_empty() {
        moment.tags = args.tags;
    }
}

fn uptime(
    action: UptimeCommand,
    db: &Arc<Database>,
    ctx: &StoreContext,
    out: &mut dyn Write,
) -> Result<()> {
    let uptimes = UptimeRepository::new(Arc::clone(db), ctx);
    match action {
        UptimeCommand::Start { at } => {
            let id = uptimes.start_uptime(at.unwrap_or_else(|| ctx.now()))?;
            writeln!(out, "{id}")?;
        }
        UptimeCommand::End { id, at } => {
            let id = match id {
                Some(id) => id,
                None => uptimes
                    .current()?
                    .map(|u| u.id)
                    .ok_or_else(|| PulseError::InvalidInput("no running uptime".to_string()))?,
            };
            match uptimes.end_uptime(id, at.unwrap_or_else(|| ctx.now()))? {
                UptimeClose::Closed => writeln!(out, "Uptime {id} closed")?,
                UptimeClose::Discarded => writeln!(
                    out,
                    "Uptime {id} discarded (shorter than {})",
                    format_duration(ctx.min_uptime_duration)
                )?,
            }
        }
        UptimeCommand::Current => match uptimes.current()? {
            Some(up) => writeln!(
                out,
                "{}\tstarted {}",
                up.id,
                up.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            )?,
            None => writeln!(out, "No running uptime")?,
        },
    }
    Ok(())
}

fn beep(
    action: BeepCommand,
    db: &Arc<Database>,
    ctx: &StoreContext,
    out: &mut dyn Write,
) -> Result<()> {
    let uptimes = UptimeRepository::new(Arc::clone(db), ctx);
    match action {
        BeepCommand::Schedule { at, uptime } => {
            let uptime_id = match uptime {
                Some(id) => id,
                None => uptimes
                    .current()?
                    .map(|u| u.id)
                    .ok_or_else(|| PulseError::InvalidInput("no running uptime".to_string()))?,
            };
            writeln!(out, "{}", uptimes.add_scheduled_beep(at, uptime_id)?)?;
        }
        BeepCommand::Cancel { id } => {
            if !uptimes.cancel(id)? {
                return Err(PulseError::not_found("beep", id));
            }
            writeln!(out, "Cancelled beep {id}")?;
        }
        BeepCommand::Streak => {
            writeln!(out, "{}", uptimes.count_trailing_cancelled_beeps_today()?)?;
        }
    }
    Ok(())
}

fn write_moment(out: &mut dyn Write, m: &Moment) -> Result<()> {
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}",
        m.id,
        m.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        if m.accepted { "accepted" } else { "declined" },
        m.title.as_deref().unwrap_or("-"),
        m.tags.join(",")
    )?;
    Ok(())
}

fn write_stats(out: &mut dyn Write, day: &DailyStats) -> Result<()> {
    writeln!(out, "date:              {}", day.date)?;
    writeln!(
        out,
        "moments:           {} ({} accepted, {:.1}%)",
        day.total_moments,
        day.accepted_moments,
        day.ratio_accepted * 100.0
    )?;
    writeln!(
        out,
        "uptime:            {} over {} interval(s), avg {}",
        format_duration(day.uptime_duration),
        day.uptime_count,
        format_duration(day.average_uptime)
    )?;
    writeln!(out, "cancelled streak:  {}", day.trailing_cancelled_beeps)?;
    Ok(())
}

/// `1h 05m 09s` style rendering, whole seconds.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}
