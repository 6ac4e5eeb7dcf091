use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::series::chart::ChartType;
use crate::window::format::ChartSize;
use crate::window::{AggregationUnit, TimeWindow, WindowQuery};

/// Prefix of locally generated ids for records the server has not acknowledged yet.
pub const PLACEHOLDER_PREFIX: &str = "pending-";

/// Generate a fresh placeholder id.
pub fn placeholder_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4())
}

pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// A record that lives in a synced collection: keyed by a string id and
/// ranked by a dense zero-based `order`.
pub trait SyncRecord:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + std::fmt::Debug + 'static
{
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn order(&self) -> u32;
    fn set_order(&mut self, order: u32);
}

/// One `column = value` filter. A comma-separated value means any of the listed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhereClause {
    pub column: String,
    pub value: String,
}

impl WhereClause {
    /// Individual values to send, one query parameter each.
    ///
    /// Empty values and the `any` column select nothing.
    pub fn values(&self) -> Vec<&str> {
        if self.column.is_empty() || self.column.eq_ignore_ascii_case("any") {
            return Vec::new();
        }
        self.value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect()
    }
}

/// A widget on a dashboard tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetRecord {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub table: String,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub size: ChartSize,
    pub aggregation: AggregationUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<AggregationUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, rename = "where", skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<WhereClause>,
    pub layout: String,
    #[serde(default)]
    pub order: u32,
}

impl WidgetRecord {
    /// Window request for page `page` of this widget.
    pub fn window_query(&self, page: i32) -> WindowQuery {
        WindowQuery {
            aggregation: Some(self.aggregation),
            duration: self.duration,
            range: self.range,
            ..WindowQuery::default()
        }
        .with_page(page)
    }
}

impl SyncRecord for WidgetRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}

/// A dashboard tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRecord {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub order: u32,
}

impl SyncRecord for DashboardRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}
