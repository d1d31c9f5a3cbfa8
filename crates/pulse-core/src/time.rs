//! Clock seam and calendar-day windows.
//!
//! Every "today" figure is computed against a [`Clock`] so tests can pin the
//! current instant. Day windows follow the local calendar: the end of a day
//! is the next date's local midnight, so days around DST transitions are 23
//! or 25 hours long.

use std::sync::Mutex;

use chrono::{Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{PulseError, Result};
use crate::types::Timestamp;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Half-open `[start, end)` span covering one local calendar day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl DayWindow {
    /// Window for `date` in time zone `tz`.
    pub fn for_date<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<Self> {
        let next = date
            .succ_opt()
            .ok_or_else(|| PulseError::InvalidInput(format!("no day after {date}")))?;
        Ok(Self {
            date,
            start: local_midnight(tz, date)?,
            end: local_midnight(tz, next)?,
        })
    }

    /// Window of the local day that contains `instant`.
    pub fn containing<Tz: TimeZone>(tz: &Tz, instant: &Timestamp) -> Result<Self> {
        let date = instant.with_timezone(tz).date_naive();
        Self::for_date(tz, date)
    }

    pub fn contains(&self, instant: &Timestamp) -> bool {
        *instant >= self.start && *instant < self.end
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

/// First instant of `date` in `tz`.
///
/// Where midnight falls into a DST gap the day starts at 01:00.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<Timestamp> {
    for hour in [0, 1] {
        let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
            continue;
        };
        if let Some(ts) = earliest(tz, &naive) {
            return Ok(ts);
        }
    }
    Err(PulseError::InvalidInput(format!(
        "no local midnight for {date}"
    )))
}

fn earliest<Tz: TimeZone>(tz: &Tz, naive: &NaiveDateTime) -> Option<Timestamp> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(a, b) => Some(a.min(b).with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Time zones with DST transitions, for tests of day-bounded queries.
#[cfg(any(test, feature = "test-support"))]
pub mod testing {
    use chrono::{
        Datelike, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone,
    };

    /// Central European Time. UTC+1, and UTC+2 from the last Sunday of March
    /// until the last Sunday of October; both switches happen at 01:00 UTC.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CentralEurope;

    impl CentralEurope {
        pub fn standard() -> FixedOffset {
            FixedOffset::east_opt(3600).expect("+01:00 is a valid offset")
        }

        pub fn summer() -> FixedOffset {
            FixedOffset::east_opt(2 * 3600).expect("+02:00 is a valid offset")
        }

        fn is_summer(utc: &NaiveDateTime) -> bool {
            let year = utc.year();
            match (switch_instant(year, 3), switch_instant(year, 10)) {
                (Some(begin), Some(end)) => *utc >= begin && *utc < end,
                _ => false,
            }
        }
    }

    /// 01:00 UTC on the last Sunday of `month` (March or October).
    fn switch_instant(year: i32, month: u32) -> Option<NaiveDateTime> {
        let last = NaiveDate::from_ymd_opt(year, month, 31)?;
        let sunday = last - Duration::days(i64::from(last.weekday().num_days_from_sunday()));
        sunday.and_hms_opt(1, 0, 0)
    }

    impl TimeZone for CentralEurope {
        type Offset = FixedOffset;

        fn from_offset(_offset: &FixedOffset) -> Self {
            CentralEurope
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            match local.and_hms_opt(12, 0, 0) {
                Some(noon) => self.offset_from_local_datetime(&noon),
                None => LocalResult::None,
            }
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let fits = |offset: FixedOffset| {
                let utc = *local - Duration::seconds(i64::from(offset.local_minus_utc()));
                self.offset_from_utc_datetime(&utc) == offset
            };
            match (fits(Self::summer()), fits(Self::standard())) {
                (true, true) => LocalResult::Ambiguous(Self::summer(), Self::standard()),
                (true, false) => LocalResult::Single(Self::summer()),
                (false, true) => LocalResult::Single(Self::standard()),
                (false, false) => LocalResult::None,
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            match utc.and_hms_opt(0, 0, 0) {
                Some(midnight) => self.offset_from_utc_datetime(&midnight),
                None => Self::standard(),
            }
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if Self::is_summer(utc) {
                Self::summer()
            } else {
                Self::standard()
            }
        }
    }
}
