//! Aggregation calendar, bucket rounding and query window resolution.

pub mod calendar;
pub mod format;
pub mod resolver;

pub use calendar::{round, AggregationUnit, CalendarSpan};
pub use resolver::{resolve, resolve_at, wall_clock_now, TimeWindow, WindowQuery};
