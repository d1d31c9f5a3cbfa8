//! CLI argument definitions for the Pulse application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};

/// Pulse - experience-sampling journal backed by a local SQLite store.
#[derive(Parser, Debug)]
#[command(name = "pulse", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the database file.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Write a default config file (if missing) and create the database.
    Init,
    /// Record and edit moments.
    Moment {
        #[command(subcommand)]
        action: MomentCommand,
    },
    /// List tags in use.
    Tags {
        /// Only tags starting with this prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Start and stop uptime intervals.
    Uptime {
        #[command(subcommand)]
        action: UptimeCommand,
    },
    /// Manage scheduled beeps.
    Beep {
        #[command(subcommand)]
        action: BeepCommand,
    },
    /// Daily statistics.
    Stats {
        /// Local date (YYYY-MM-DD); today when omitted.
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Drop and recreate every table, deleting all data.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum MomentCommand {
    /// Record a moment.
    Add(MomentAddArgs),
    /// Show one moment with its tags.
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// List moments, newest first.
    List {
        /// Include declined moments.
        #[arg(long)]
        all: bool,
        /// Only moments of this local date (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Change annotations of a moment.
    Edit(MomentEditArgs),
    /// Delete a moment and its tag associations.
    Delete { id: i64 },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct MomentAddArgs {
    /// Alert time (RFC 3339); now when omitted.
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<DateTime<Utc>>,
    /// Record the alert as declined.
    #[arg(long)]
    pub declined: bool,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub photo: Option<String>,
    /// Tag name; repeat for several.
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,
    /// Uptime interval id; the running one when omitted.
    #[arg(long)]
    pub uptime: Option<i64>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct MomentEditArgs {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub photo: Option<String>,
    /// Mark as accepted.
    #[arg(long, conflicts_with = "declined")]
    pub accepted: bool,
    /// Mark as declined.
    #[arg(long)]
    pub declined: bool,
    /// Replace the tag set; repeat for several.
    #[arg(short = 't', long = "tag", conflicts_with = "clear_tags")]
    pub tags: Vec<String>,
    /// Remove every tag.
    #[arg(long)]
    pub clear_tags: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum UptimeCommand {
    /// Open a new interval.
    Start {
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },
    /// Close an interval; the running one when no id is given.
    End {
        id: Option<i64>,
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },
    /// Show the running interval.
    Current,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum BeepCommand {
    /// Record a planned beep.
    Schedule {
        #[arg(long, value_parser = parse_timestamp)]
        at: DateTime<Utc>,
        /// Uptime interval id; the running one when omitted.
        #[arg(long)]
        uptime: Option<i64>,
    },
    /// Mark a beep as cancelled.
    Cancel { id: i64 },
    /// Number of trailing cancelled beeps today.
    Streak,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PULSE_CONFIG env var > platform default (~/.pulse/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PULSE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > config file value.
    /// Returns `None` if not overridden (use config default).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".pulse").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".pulse").join("config.toml");
    }
    PathBuf::from("config.toml")
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}
