//! Reduction of raw widget rows into chart-ready series.
//!
//! One pass, insertion ordered by timestamp: rows sharing a timestamp and
//! group accumulate, they never overwrite each other.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Series label used when the widget has no group-by field.
pub const DEFAULT_SERIES_LABEL: &str = "value";

/// Number of distinct palette colours charts cycle through.
const PALETTE_SIZE: usize = 5;

/// One raw sample returned by the widget data endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub timestamp: String,
    #[serde(default)]
    pub count: f64,
    /// Every other column, including the group-by dimension.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// One merged row: a timestamp plus one value per observed group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl SeriesPoint {
    pub fn get(&self, group: &str) -> Option<f64> {
        self.values.get(group).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendEntry {
    pub key: String,
    pub label: String,
    /// 1-based palette slot, cycling every five series.
    pub color_slot: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergedSeries {
    pub series: Vec<SeriesPoint>,
    pub legend: Vec<LegendEntry>,
}

impl MergedSeries {
    /// Sum of every group across all timestamps, in legend order.
    pub fn totals(&self) -> Vec<(String, f64)> {
        self.legend
            .iter()
            .map(|entry| {
                let total = self
                    .series
                    .iter()
                    .filter_map(|point| point.get(&entry.key))
                    .sum();
                (entry.key.clone(), total)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Merger with a configurable label for ungrouped series (e.g. a translated "value").
#[derive(Debug, Clone)]
pub struct SeriesMerger {
    default_label: String,
}

impl Default for SeriesMerger {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_LABEL)
    }
}

impl SeriesMerger {
    pub fn new(default_label: impl Into<String>) -> Self {
        Self {
            default_label: default_label.into(),
        }
    }

    pub fn merge(&self, rows: &[SourceRow], group_by: Option<&str>) -> MergedSeries {
        let mut series: Vec<SeriesPoint> = Vec::new();
        let mut by_timestamp: HashMap<&str, usize> = HashMap::new();
        let mut legend: Vec<LegendEntry> = Vec::new();

        for row in rows {
            let group = match group_by {
                Some(field) => group_label(row.fields.get(field)),
                None => self.default_label.clone(),
            };

            let idx = *by_timestamp.entry(row.timestamp.as_str()).or_insert_with(|| {
                series.push(SeriesPoint {
                    timestamp: row.timestamp.clone(),
                    values: BTreeMap::new(),
                });
                series.len() - 1
            });
            *series[idx].values.entry(group.clone()).or_insert(0.0) += row.count;

            if !legend.iter().any(|entry| entry.key == group) {
                let color_slot = (legend.len() % PALETTE_SIZE + 1) as u8;
                legend.push(LegendEntry {
                    label: group.clone(),
                    key: group,
                    color_slot,
                });
            }
        }

        MergedSeries { series, legend }
    }
}

/// Merge `rows` with the default series label.
pub fn merge(rows: &[SourceRow], group_by: Option<&str>) -> MergedSeries {
    SeriesMerger::default().merge(rows, group_by)
}

/// String form of a group-by cell. Missing and null cells share the "null" series.
fn group_label(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "null".to_string(),
        Some(other) => other.to_string(),
    }
}
