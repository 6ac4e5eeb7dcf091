//! Merging raw widget rows into chart series.

pub mod chart;
pub mod merger;

pub use chart::{adapt, trend_percent, validate_widget, ChartData, ChartType};
pub use merger::{merge, LegendEntry, MergedSeries, SeriesMerger, SeriesPoint, SourceRow};
