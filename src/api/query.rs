//! Query string for the widget data endpoint.

use chrono::NaiveDateTime;
use url::Url;

use crate::error::DashError;
use crate::types::{WhereClause, WidgetRecord};
use crate::window::{resolve_at, AggregationUnit, TimeWindow};

/// Wall-clock timestamp format the server expects: ISO-8601, millisecond
/// precision, no offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

pub fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// One resolved request for a widget's rows.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetDataQuery {
    /// Table name (or widget id) the rows come from.
    pub source: String,
    pub aggregation: AggregationUnit,
    pub window: TimeWindow,
    pub group_by: Option<String>,
    pub filters: Vec<WhereClause>,
}

impl WidgetDataQuery {
    /// Resolve page `page` of `widget` as seen at wall-clock `now`.
    pub fn for_widget(widget: &WidgetRecord, page: i32, now: NaiveDateTime) -> Result<Self, DashError> {
        let window = resolve_at(&widget.window_query(page), now)?;
        Ok(Self {
            source: widget.table.clone(),
            aggregation: widget.aggregation,
            window,
            group_by: widget.group_by.clone().filter(|g| !g.is_empty()),
            filters: widget.filters.clone(),
        })
    }

    /// Query parameters in wire order. Filters expand to one pair per value.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("aggregate".to_string(), self.aggregation.label().to_string()),
            ("time_from".to_string(), format_timestamp(self.window.from)),
            ("time_to".to_string(), format_timestamp(self.window.to)),
        ];
        if let Some(group_by) = &self.group_by {
            params.push(("group_by".to_string(), group_by.clone()));
        }
        for clause in &self.filters {
            for value in clause.values() {
                params.push((clause.column.clone(), value.to_string()));
            }
        }
        params
    }

    /// `{base}/widgets/{source}?...`
    pub fn url(&self, base: &Url) -> Result<Url, DashError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| DashError::ConfigurationError(format!("base URL cannot hold a path: {base}")))?
            .pop_if_empty()
            .extend(["widgets", self.source.as_str()]);
        url.query_pairs_mut().extend_pairs(self.params());
        Ok(url)
    }
}
