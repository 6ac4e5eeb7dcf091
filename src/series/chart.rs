//! Chart kinds and the thin per-kind adapter over the series merger.

use serde::{Deserialize, Serialize};

use crate::series::merger::{MergedSeries, SeriesMerger, SourceRow};
use crate::types::WidgetRecord;
use crate::window::format::{time_formatting, TimeFormatting};

const CURVE_LAYOUTS: &[&str] = &["monotone", "bump", "linear", "step"];
const ORIENTATION_LAYOUTS: &[&str] = &["horizontal", "vertical"];
const GAUGE_LAYOUTS: &[&str] = &["half", "full"];
const PIE_LAYOUTS: &[&str] = &["pie", "donut", "halfpie", "halfdonut"];

const MIN_TITLE_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartType {
    Area,
    Bar,
    Line,
    Gauge,
    Pie,
    MultiBar,
    MultiLine,
    MultiGauge,
    StackedBar,
    StackedArea,
    StackedGauge,
    Heatmap,
}

impl ChartType {
    /// Kinds that draw one series per group and therefore need `groupBy`.
    pub fn stacked(self) -> bool {
        matches!(
            self,
            ChartType::Pie
                | ChartType::MultiBar
                | ChartType::MultiLine
                | ChartType::MultiGauge
                | ChartType::StackedArea
                | ChartType::StackedBar
                | ChartType::StackedGauge
        )
    }

    /// Kinds that show one total per group instead of a time axis.
    pub fn unique_values(self) -> bool {
        matches!(
            self,
            ChartType::Gauge | ChartType::Pie | ChartType::StackedGauge
        )
    }

    pub fn experimental(self) -> bool {
        matches!(self, ChartType::Gauge | ChartType::StackedGauge)
    }

    pub fn layouts(self) -> &'static [&'static str] {
        match self {
            ChartType::Area | ChartType::Line | ChartType::MultiLine | ChartType::StackedArea => {
                CURVE_LAYOUTS
            }
            ChartType::Bar | ChartType::MultiBar | ChartType::StackedBar | ChartType::Heatmap => {
                ORIENTATION_LAYOUTS
            }
            ChartType::Gauge | ChartType::MultiGauge | ChartType::StackedGauge => GAUGE_LAYOUTS,
            ChartType::Pie => PIE_LAYOUTS,
        }
    }

    fn has_time_axis(self) -> bool {
        !self.unique_values() && self != ChartType::Heatmap
    }
}

/// Per-group sum for total-style charts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotal {
    pub group: String,
    pub total: f64,
}

/// Everything a chart of a given kind needs to draw itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub chart_type: ChartType,
    #[serde(flatten)]
    pub merged: MergedSeries,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<Vec<GroupTotal>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatting: Option<TimeFormatting>,
}

/// Shape `rows` for `widget`'s chart kind.
pub fn adapt(widget: &WidgetRecord, rows: &[SourceRow], merger: &SeriesMerger) -> ChartData {
    let kind = widget.chart_type;
    let merged = merger.merge(rows, widget.group_by.as_deref());

    let totals = kind.unique_values().then(|| {
        merged
            .totals()
            .into_iter()
            .map(|(group, total)| GroupTotal { group, total })
            .collect()
    });

    let formatting = kind.has_time_axis().then(|| {
        time_formatting(
            widget.duration.unwrap_or(widget.aggregation),
            merged.series.len(),
            widget.size,
        )
    });

    ChartData {
        chart_type: kind,
        merged,
        totals,
        formatting,
    }
}

/// A single rejected widget field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: &'static str,
}

/// Check a widget definition before it is saved.
///
/// `group_columns` is the list of groupable columns for the widget's table,
/// when the table description is known.
pub fn validate_widget(widget: &WidgetRecord, group_columns: Option<&[String]>) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    let kind = widget.chart_type;

    if widget.title.trim().chars().count() < MIN_TITLE_LEN {
        violations.push(FieldViolation {
            field: "title",
            message: "Title must be at least 3 characters",
        });
    }

    if let Some(duration) = widget.duration {
        if widget.aggregation > duration {
            violations.push(FieldViolation {
                field: "aggregation",
                message: "Aggregation period must be smaller than or equal to duration",
            });
        }
        if kind == ChartType::Pie && widget.aggregation != duration {
            violations.push(FieldViolation {
                field: "aggregation",
                message: "Pie chart must have the same aggregation and duration",
            });
        }
    }

    if !kind.layouts().contains(&widget.layout.as_str()) {
        violations.push(FieldViolation {
            field: "layout",
            message: "Layout is required",
        });
    }

    match widget.group_by.as_deref() {
        None | Some("") if kind.stacked() => violations.push(FieldViolation {
            field: "groupBy",
            message: "Group by is required",
        }),
        Some(column) if !column.is_empty() => {
            if let Some(columns) = group_columns {
                if !columns.iter().any(|c| c == column) {
                    violations.push(FieldViolation {
                        field: "groupBy",
                        message: "Group by column does not exist on this table",
                    });
                }
            }
        }
        _ => {}
    }

    if kind.experimental() {
        violations.push(FieldViolation {
            field: "type",
            message: "Gauge is not yet supported, use Pie instead",
        });
    }

    violations
}

/// Current-window average as a percentage of the all-time average, two decimals.
pub fn trend_percent(actual_avg: f64, global_avg: f64) -> Option<f64> {
    if global_avg == 0.0 || !global_avg.is_finite() || !actual_avg.is_finite() {
        return None;
    }
    let pct = actual_avg / global_avg * 100.0;
    Some((pct * 100.0).round() / 100.0)
}
