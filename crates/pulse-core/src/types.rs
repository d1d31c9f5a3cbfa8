use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};

/// A point in time, stored with millisecond precision.
pub type Timestamp = DateTime<Utc>;

// =============================================================================
// Timestamp helpers
// =============================================================================

/// Unix milliseconds as stored in the database.
pub fn to_millis(ts: &Timestamp) -> i64 {
    ts.timestamp_millis()
}

/// Inverse of [`to_millis`].
pub fn from_millis(ms: i64) -> Result<Timestamp> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| PulseError::Storage(format!("timestamp out of range: {ms}")))
}

/// Normalize a user-entered tag name: trimmed and lowercased.
///
/// Returns `None` for names that are empty after trimming.
pub fn normalize_tag(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

// =============================================================================
// Projects and vocabularies
// =============================================================================

/// A study project; moments and vocabularies belong to exactly one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
}

/// A named collection of controlled-choice values (tags).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub id: i64,
    pub name: String,
    pub project_id: i64,
}

/// A vocabulary item used as a moment tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    /// Normalized (lowercase) value.
    pub name: String,
    pub vocabulary_id: i64,
    pub language: String,
}

// =============================================================================
// Moments
// =============================================================================

/// A moment as produced by the alert layer, before it has an id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMoment {
    /// Time the alert fired. Unique across all moments.
    pub timestamp: Timestamp,
    pub accepted: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub photo_uri: Option<String>,
    /// Uptime interval that was running when the alert fired.
    pub uptime_id: Option<i64>,
    /// Desired tag names; normalized on write.
    pub tags: Vec<String>,
}

impl NewMoment {
    pub fn accepted(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            accepted: true,
            title: None,
            description: None,
            photo_uri: None,
            uptime_id: None,
            tags: Vec::new(),
        }
    }

    pub fn declined(timestamp: Timestamp) -> Self {
        Self {
            accepted: false,
            ..Self::accepted(timestamp)
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A persisted alert-response event and its annotations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Moment {
    pub id: i64,
    pub timestamp: Timestamp,
    pub accepted: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub photo_uri: Option<String>,
    pub uptime_id: Option<i64>,
    pub project_id: i64,
    /// Tag names. Filled by eager loads; the desired set on update.
    pub tags: Vec<String>,
}

// =============================================================================
// Uptime and scheduled beeps
// =============================================================================

/// A contiguous period during which the alert scheduler was active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uptime {
    pub id: i64,
    pub started_at: Timestamp,
    /// `None` while the interval is running.
    pub ended_at: Option<Timestamp>,
}

impl Uptime {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Outcome of closing an uptime interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UptimeClose {
    /// The end timestamp was recorded.
    Closed,
    /// The interval was shorter than the minimum and was deleted with its beeps.
    Discarded,
}

/// A planned or fired alert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledBeep {
    pub id: i64,
    pub timestamp: Timestamp,
    pub cancelled: bool,
    pub uptime_id: i64,
}

// =============================================================================
// Aggregates
// =============================================================================

/// Dashboard figures for one local calendar day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_moments: u64,
    pub accepted_moments: u64,
    /// `accepted / total`, 0.0 when there are no moments.
    pub ratio_accepted: f64,
    pub uptime_count: u64,
    pub uptime_duration: Duration,
    pub average_uptime: Duration,
    pub trailing_cancelled_beeps: u64,
}
