//! Absolute time windows for widget queries.
//!
//! A window is either relative (aggregation + duration, anchored on "now"
//! rounded to the aggregation bucket, optionally paged backwards) or an
//! explicit range that is passed through untouched.

use chrono::{Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::DashError;
use crate::window::calendar::{round, AggregationUnit};

/// Inclusive `[from, to]` window. `to` sits one millisecond before the next
/// boundary so adjacent windows never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(from: NaiveDateTime, to: NaiveDateTime) -> Result<Self, DashError> {
        if from > to {
            return Err(DashError::ConfigurationError(format!(
                "range starts after it ends ({from} > {to})"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.from <= t && t <= self.to
    }
}

/// Declarative window request, as carried by a widget.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowQuery {
    pub aggregation: Option<AggregationUnit>,
    pub duration: Option<AggregationUnit>,
    pub range: Option<TimeWindow>,
    /// 0 is the current window, negative values step back one duration each.
    pub page: i32,
    /// Anchor on the start of the current aggregation bucket instead of "now".
    pub rounded: bool,
}

impl Default for WindowQuery {
    fn default() -> Self {
        Self {
            aggregation: None,
            duration: None,
            range: None,
            page: 0,
            rounded: true,
        }
    }
}

impl WindowQuery {
    pub fn relative(aggregation: AggregationUnit, duration: AggregationUnit) -> Self {
        Self {
            aggregation: Some(aggregation),
            duration: Some(duration),
            ..Self::default()
        }
    }

    pub fn fixed(range: TimeWindow) -> Self {
        Self {
            range: Some(range),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: i32) -> Self {
        self.page = page;
        self
    }

    pub fn unrounded(mut self) -> Self {
        self.rounded = false;
        self
    }
}

/// Current wall-clock time in `tz`.
pub fn wall_clock_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

/// Resolve `query` against the current wall-clock time in `tz`.
pub fn resolve(query: &WindowQuery, tz: Tz) -> Result<TimeWindow, DashError> {
    resolve_at(query, wall_clock_now(tz))
}

/// Resolve `query` against an explicit `now`.
///
/// Page `k <= 0` covers `[anchor - span*(|k|+1), anchor - span*|k| - 1ms]`,
/// so consecutive pages tile the timeline with no gap and no overlap.
pub fn resolve_at(query: &WindowQuery, now: NaiveDateTime) -> Result<TimeWindow, DashError> {
    if let (Some(aggregation), Some(duration)) = (query.aggregation, query.duration) {
        if query.page > 0 {
            return Err(DashError::UnsupportedPage(query.page));
        }

        let anchor = if query.rounded {
            round(now, aggregation)
        } else {
            now
        };
        let back = query.page.unsigned_abs();
        let span = duration.span();

        let from = span
            .times(back + 1)
            .and_then(|s| s.subtract_from(anchor))
            .ok_or_else(out_of_range)?;
        let to = span
            .times(back)
            .and_then(|s| s.subtract_from(anchor))
            .and_then(|end| end.checked_sub_signed(Duration::milliseconds(1)))
            .ok_or_else(out_of_range)?;

        return Ok(TimeWindow { from, to });
    }

    match query.range {
        Some(range) => TimeWindow::new(range.from, range.to),
        None => Err(DashError::missing_window()),
    }
}

fn out_of_range() -> DashError {
    DashError::ConfigurationError("window falls outside the representable calendar".to_string())
}
