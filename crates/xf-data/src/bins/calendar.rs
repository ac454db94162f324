//! Calendar units, interval detection and date labels for temporal bins

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize};

use crate::DataError;

/// Calendar granularity, ordered from finest to coarsest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 8] = [
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
        TimeUnit::Week,
        TimeUnit::Month,
        TimeUnit::Quarter,
        TimeUnit::Year,
    ];

    /// Unit name as passed to `date_trunc`
    pub fn as_sql(&self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Quarter => "quarter",
            TimeUnit::Year => "year",
        }
    }

    /// Next coarser unit, `None` at `Year`
    pub fn coarser(self) -> Option<TimeUnit> {
        match self {
            TimeUnit::Second => Some(TimeUnit::Minute),
            TimeUnit::Minute => Some(TimeUnit::Hour),
            TimeUnit::Hour => Some(TimeUnit::Day),
            TimeUnit::Day => Some(TimeUnit::Week),
            TimeUnit::Week => Some(TimeUnit::Month),
            TimeUnit::Month => Some(TimeUnit::Quarter),
            TimeUnit::Quarter => Some(TimeUnit::Year),
            TimeUnit::Year => None,
        }
    }

    /// Start of the bucket containing `instant`
    ///
    /// Weeks start on Monday.
    pub fn truncate(self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let date = instant.date_naive();
        let truncated: Option<NaiveDateTime> = match self {
            TimeUnit::Second => date.and_hms_opt(instant.hour(), instant.minute(), instant.second()),
            TimeUnit::Minute => date.and_hms_opt(instant.hour(), instant.minute(), 0),
            TimeUnit::Hour => date.and_hms_opt(instant.hour(), 0, 0),
            TimeUnit::Day => date.and_hms_opt(0, 0, 0),
            TimeUnit::Week => {
                let back = date.weekday().num_days_from_monday() as i64;
                (date - Duration::days(back)).and_hms_opt(0, 0, 0)
            }
            TimeUnit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            TimeUnit::Quarter => {
                let first_month = (date.month() - 1) / 3 * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), first_month, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
            TimeUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0)),
        };
        truncated.map(|n| Utc.from_utc_datetime(&n)).unwrap_or(instant)
    }

    /// Advance by one unit using calendar arithmetic
    ///
    /// Returns `None` when the result leaves the representable range.
    pub fn add_one(self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeUnit::Second => instant.checked_add_signed(Duration::seconds(1)),
            TimeUnit::Minute => instant.checked_add_signed(Duration::minutes(1)),
            TimeUnit::Hour => instant.checked_add_signed(Duration::hours(1)),
            TimeUnit::Day => instant.checked_add_signed(Duration::days(1)),
            TimeUnit::Week => instant.checked_add_signed(Duration::weeks(1)),
            TimeUnit::Month => instant.checked_add_months(Months::new(1)),
            TimeUnit::Quarter => instant.checked_add_months(Months::new(3)),
            TimeUnit::Year => instant.checked_add_months(Months::new(12)),
        }
    }

    /// Number of buckets from the bucket of `min` through the bucket of `max`
    pub fn buckets_between(self, min: DateTime<Utc>, max: DateTime<Utc>) -> u64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let a = self.truncate(lo);
        let b = self.truncate(hi);
        let elapsed = b - a;

        let steps = match self {
            TimeUnit::Second => elapsed.num_seconds(),
            TimeUnit::Minute => elapsed.num_minutes(),
            TimeUnit::Hour => elapsed.num_hours(),
            TimeUnit::Day => elapsed.num_days(),
            TimeUnit::Week => elapsed.num_weeks(),
            TimeUnit::Month => month_index(b) - month_index(a),
            TimeUnit::Quarter => month_index(b) / 3 - month_index(a) / 3,
            TimeUnit::Year => (b.year() - a.year()) as i64,
        };
        steps.max(0) as u64 + 1
    }
}

fn month_index(instant: DateTime<Utc>) -> i64 {
    instant.year() as i64 * 12 + instant.month0() as i64
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for TimeUnit {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        TimeUnit::ALL
            .iter()
            .copied()
            .find(|unit| unit.as_sql() == lower)
            .ok_or_else(|| DataError::UnknownTimeUnit(s.to_string()))
    }
}

/// Choose a calendar unit for the elapsed range, aiming at a readable bin count
pub fn detect_interval(min: DateTime<Utc>, max: DateTime<Utc>) -> TimeUnit {
    let elapsed = if max >= min { max - min } else { min - max };

    if elapsed < Duration::minutes(2) {
        TimeUnit::Second
    } else if elapsed < Duration::hours(2) {
        TimeUnit::Minute
    } else if elapsed < Duration::days(4) {
        TimeUnit::Hour
    } else if elapsed < Duration::days(60) {
        TimeUnit::Day
    } else if elapsed < Duration::days(183) {
        TimeUnit::Week
    } else if elapsed < Duration::days(1096) {
        TimeUnit::Month
    } else if elapsed < Duration::days(3653) {
        TimeUnit::Quarter
    } else {
        TimeUnit::Year
    }
}

/// Coarsen `unit` until its bucket count fits `max_bins`, stopping at `Year`
pub fn adjust_for_cap(min: DateTime<Utc>, max: DateTime<Utc>, unit: TimeUnit, max_bins: usize) -> TimeUnit {
    let mut unit = unit;
    while unit.buckets_between(min, max) > max_bins as u64 {
        match unit.coarser() {
            Some(next) => unit = next,
            None => break,
        }
    }
    unit
}

/// Whether even yearly buckets overflow the cap
pub fn needs_fallback(min: DateTime<Utc>, max: DateTime<Utc>, max_bins: usize) -> bool {
    TimeUnit::Year.buckets_between(min, max) > max_bins as u64
}

/// Label context shared by every bin of one bin set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelContext {
    pub same_year: bool,
    pub same_day: bool,
}

impl LabelContext {
    pub fn new(min: DateTime<Utc>, max: DateTime<Utc>) -> Self {
        Self {
            same_year: min.year() == max.year(),
            same_day: min.date_naive() == max.date_naive(),
        }
    }
}

/// Short calendar label for the bucket starting at `start`
pub fn format_label(unit: TimeUnit, start: DateTime<Utc>, ctx: LabelContext) -> String {
    let pattern = match unit {
        TimeUnit::Year => "%Y",
        TimeUnit::Quarter => {
            let quarter = start.month0() / 3 + 1;
            return if ctx.same_year {
                format!("Q{}", quarter)
            } else {
                format!("Q{} {}", quarter, start.year())
            };
        }
        TimeUnit::Month if ctx.same_year => "%b",
        TimeUnit::Month => "%b %Y",
        TimeUnit::Week | TimeUnit::Day if ctx.same_year => "%b %-d",
        TimeUnit::Week | TimeUnit::Day => "%b %-d, %Y",
        TimeUnit::Hour if ctx.same_day => "%-I %p",
        TimeUnit::Hour if ctx.same_year => "%b %-d, %-I %p",
        TimeUnit::Hour => "%b %-d, %Y, %-I %p",
        TimeUnit::Minute if ctx.same_day => "%-I:%M %p",
        TimeUnit::Minute if ctx.same_year => "%b %-d, %-I:%M %p",
        TimeUnit::Minute => "%b %-d, %Y, %-I:%M %p",
        TimeUnit::Second if ctx.same_day => "%-I:%M:%S %p",
        TimeUnit::Second if ctx.same_year => "%b %-d, %-I:%M:%S %p",
        TimeUnit::Second => "%b %-d, %Y, %-I:%M:%S %p",
    };
    start.format(pattern).to_string()
}

/// Full timestamp label used by fallback bins
pub fn format_full(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S").to_string()
}

const NAIVE_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%d/%m/%Y %H:%M:%S",
];

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%#z"];

// Month-first wins when a slashed date reads both ways
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%B %d, %Y"];

/// Parse the textual instant forms a SQL engine hands back
///
/// Besides ISO-8601 this accepts US and European slashed dates, compact
/// `YYYYMMDD` and long `March 5, 2024` dates. Naive timestamps are taken
/// as UTC.
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    let compact = text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit());
    let date = if compact {
        NaiveDate::parse_from_str(text, "%Y%m%d").ok()
    } else {
        DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
    };
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| Utc.from_utc_datetime(&n))
}
