//! Aggregation units, their calendar lengths, and bucket rounding.
//!
//! All instants are wall-clock `NaiveDateTime`s in the server's implicit
//! timezone; see `config::SyncConfig::timezone`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Bucket granularity of a widget query. Ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AggregationUnit {
    #[serde(rename = "1 minute")]
    OneMinute,
    #[serde(rename = "15 minutes")]
    FifteenMinutes,
    #[serde(rename = "30 minutes")]
    ThirtyMinutes,
    #[serde(rename = "1 hour")]
    OneHour,
    #[serde(rename = "1 day")]
    OneDay,
    #[serde(rename = "1 week")]
    OneWeek,
    #[serde(rename = "1 month")]
    OneMonth,
    #[serde(rename = "6 months")]
    SixMonths,
    #[serde(rename = "1 year")]
    OneYear,
    #[serde(rename = "100 years")]
    LifeTime,
}

impl AggregationUnit {
    pub const ALL: [AggregationUnit; 10] = [
        AggregationUnit::OneMinute,
        AggregationUnit::FifteenMinutes,
        AggregationUnit::ThirtyMinutes,
        AggregationUnit::OneHour,
        AggregationUnit::OneDay,
        AggregationUnit::OneWeek,
        AggregationUnit::OneMonth,
        AggregationUnit::SixMonths,
        AggregationUnit::OneYear,
        AggregationUnit::LifeTime,
    ];

    /// Wire label, as sent in the `aggregate` query parameter.
    pub fn label(self) -> &'static str {
        match self {
            AggregationUnit::OneMinute => "1 minute",
            AggregationUnit::FifteenMinutes => "15 minutes",
            AggregationUnit::ThirtyMinutes => "30 minutes",
            AggregationUnit::OneHour => "1 hour",
            AggregationUnit::OneDay => "1 day",
            AggregationUnit::OneWeek => "1 week",
            AggregationUnit::OneMonth => "1 month",
            AggregationUnit::SixMonths => "6 months",
            AggregationUnit::OneYear => "1 year",
            AggregationUnit::LifeTime => "100 years",
        }
    }

    /// Calendar length of one bucket.
    pub fn span(self) -> CalendarSpan {
        match self {
            AggregationUnit::OneMinute => CalendarSpan::Fixed(Duration::minutes(1)),
            AggregationUnit::FifteenMinutes => CalendarSpan::Fixed(Duration::minutes(15)),
            AggregationUnit::ThirtyMinutes => CalendarSpan::Fixed(Duration::minutes(30)),
            AggregationUnit::OneHour => CalendarSpan::Fixed(Duration::hours(1)),
            AggregationUnit::OneDay => CalendarSpan::Fixed(Duration::days(1)),
            AggregationUnit::OneWeek => CalendarSpan::Fixed(Duration::weeks(1)),
            AggregationUnit::OneMonth => CalendarSpan::Months(1),
            AggregationUnit::SixMonths => CalendarSpan::Months(6),
            AggregationUnit::OneYear => CalendarSpan::Months(12),
            AggregationUnit::LifeTime => CalendarSpan::Months(1200),
        }
    }
}

impl fmt::Display for AggregationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AggregationUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregationUnit::ALL
            .into_iter()
            .find(|unit| unit.label() == s)
            .ok_or_else(|| format!("invalid aggregation: {s}"))
    }
}

/// A calendar duration. Month-based spans follow the calendar (28..31 days),
/// everything up to a week is a fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarSpan {
    Fixed(Duration),
    Months(u32),
}

impl CalendarSpan {
    /// This span repeated `n` times, or `None` if that does not fit.
    pub fn times(self, n: u32) -> Option<CalendarSpan> {
        match self {
            CalendarSpan::Fixed(d) => d.checked_mul(i32::try_from(n).ok()?).map(CalendarSpan::Fixed),
            CalendarSpan::Months(m) => m.checked_mul(n).map(CalendarSpan::Months),
        }
    }

    pub fn subtract_from(self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            CalendarSpan::Fixed(d) => t.checked_sub_signed(d),
            CalendarSpan::Months(m) => t.checked_sub_months(Months::new(m)),
        }
    }

    pub fn add_to(self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            CalendarSpan::Fixed(d) => t.checked_add_signed(d),
            CalendarSpan::Months(m) => t.checked_add_months(Months::new(m)),
        }
    }

    /// Nominal length in days: a month counts 30 days, a year 365.
    pub fn approx_days(self) -> f64 {
        match self {
            CalendarSpan::Fixed(d) => d.num_milliseconds() as f64 / 86_400_000.0,
            CalendarSpan::Months(m) => (m / 12) as f64 * 365.0 + (m % 12) as f64 * 30.0,
        }
    }
}

/// Nominal number of days covered by `unit`, used for axis formatting.
pub fn duration_in_days(unit: AggregationUnit) -> f64 {
    unit.span().approx_days()
}

/// Data refetch cadence for a widget sampled at `aggregation`.
pub fn refresh_interval(aggregation: AggregationUnit) -> std::time::Duration {
    match aggregation.span() {
        CalendarSpan::Fixed(d) => std::time::Duration::from_millis(d.num_milliseconds().max(0) as u64),
        months => std::time::Duration::from_secs(months.approx_days() as u64 * 86_400),
    }
}

/// Round `t` down to the start of its `unit` bucket.
///
/// Weeks start on Monday. Six-month buckets start on Jan 1 or Jul 1 of the
/// same year; the lifetime bucket rounds to the start of the year.
pub fn round(t: NaiveDateTime, unit: AggregationUnit) -> NaiveDateTime {
    let date = t.date();
    match unit {
        AggregationUnit::OneMinute => minute_floor(t, 1),
        AggregationUnit::FifteenMinutes => minute_floor(t, 15),
        AggregationUnit::ThirtyMinutes => minute_floor(t, 30),
        AggregationUnit::OneHour => minute_floor(t, 60),
        AggregationUnit::OneDay => midnight(date),
        AggregationUnit::OneWeek => {
            midnight(date - Duration::days(date.weekday().num_days_from_monday() as i64))
        }
        AggregationUnit::OneMonth => midnight(date - Duration::days(date.day0() as i64)),
        AggregationUnit::SixMonths => {
            let month = if date.month() > 6 { 7 } else { 1 };
            midnight(first_of_month(date.year(), month).unwrap_or(date))
        }
        AggregationUnit::OneYear | AggregationUnit::LifeTime => {
            midnight(date - Duration::days(date.ordinal0() as i64))
        }
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Floor to a slot of `width` minutes counted from midnight.
fn minute_floor(t: NaiveDateTime, width: u32) -> NaiveDateTime {
    let minutes = t.hour() * 60 + t.minute();
    midnight(t.date()) + Duration::minutes((minutes - minutes % width) as i64)
}

fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}
