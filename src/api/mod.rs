//! HTTP side of the dashboard: REST client and widget data queries.

pub mod client;
pub mod query;

pub use client::{DashboardClient, TabRemote, WidgetRemote, TABS_KEY};
pub use query::{format_timestamp, WidgetDataQuery};
