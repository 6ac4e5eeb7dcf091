//! REST client for the dashboard service.
//!
//! Every path hangs off the configured base URL (`{base}/tabs`,
//! `{base}/tabs/{dashId}/widgets`, `{base}/widgets/{table}`). Non-2xx
//! responses become `DashError::Http`; nothing here retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::api::query::{format_timestamp, WidgetDataQuery};
use crate::config::SyncConfig;
use crate::error::DashError;
use crate::series::{trend_percent, SourceRow};
use crate::sync::{PatchEntry, RemoteCollection};
use crate::types::{DashboardRecord, WidgetRecord};
use crate::window::TimeWindow;

/// Store key of the single tab collection.
pub const TABS_KEY: &str = "tabs";

/// Body of a create response: either a bare id or `{ "id": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreatedId {
    Bare(String),
    Wrapped { id: String },
}

impl CreatedId {
    fn into_id(self) -> String {
        match self {
            CreatedId::Bare(id) | CreatedId::Wrapped { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrendSummary {
    global: TrendStats,
}

#[derive(Debug, Deserialize)]
struct TrendStats {
    avg: f64,
}

pub struct DashboardClient {
    client: reqwest::Client,
    base: Url,
}

impl DashboardClient {
    pub fn new(config: &SyncConfig) -> Result<Self, DashError> {
        let base = Url::parse(&config.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DashError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| DashError::ConfigurationError(format!("base URL cannot hold a path: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DashError> {
        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(DashError::Http { status, body });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, DashError> {
        let resp = self.send(self.client.get(url)).await?;
        Ok(resp.json().await?)
    }

    async fn write<B: Serialize + ?Sized>(&self, method: Method, url: Url, body: Option<&B>) -> Result<Response, DashError> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }

    // -- tabs --------------------------------------------------------------

    /// All tabs, sorted by `order`. The server keys them by id.
    pub async fn list_tabs(&self) -> Result<Vec<DashboardRecord>, DashError> {
        let by_id: HashMap<String, DashboardRecord> = self.get_json(self.endpoint(&["tabs"])?).await?;
        Ok(tabs_from_map(by_id))
    }

    pub async fn create_tab(&self, tab: &DashboardRecord) -> Result<String, DashError> {
        let resp = self
            .write(Method::POST, self.endpoint(&["tabs"])?, Some(tab))
            .await?;
        Ok(resp.json::<CreatedId>().await?.into_id())
    }

    pub async fn update_tab(&self, tab: &DashboardRecord) -> Result<(), DashError> {
        self.write(Method::PUT, self.endpoint(&["tabs", tab.id.as_str()])?, Some(tab))
            .await?;
        Ok(())
    }

    pub async fn delete_tab(&self, id: &str) -> Result<(), DashError> {
        self.write::<()>(Method::DELETE, self.endpoint(&["tabs", id])?, None)
            .await?;
        Ok(())
    }

    pub async fn patch_tabs(&self, changes: &[PatchEntry]) -> Result<(), DashError> {
        self.write(Method::PATCH, self.endpoint(&["tabs"])?, Some(changes))
            .await?;
        Ok(())
    }

    // -- widgets -----------------------------------------------------------

    pub async fn list_widgets(&self, dashboard_id: &str) -> Result<Vec<WidgetRecord>, DashError> {
        self.get_json(self.endpoint(&["tabs", dashboard_id, "widgets"])?)
            .await
    }

    pub async fn create_widget(&self, dashboard_id: &str, widget: &WidgetRecord) -> Result<String, DashError> {
        let resp = self
            .write(
                Method::POST,
                self.endpoint(&["tabs", dashboard_id, "widgets"])?,
                Some(widget),
            )
            .await?;
        Ok(resp.json::<CreatedId>().await?.into_id())
    }

    pub async fn update_widget(&self, dashboard_id: &str, widget: &WidgetRecord) -> Result<(), DashError> {
        self.write(
            Method::PUT,
            self.endpoint(&["tabs", dashboard_id, "widgets", widget.id.as_str()])?,
            Some(widget),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_widget(&self, dashboard_id: &str, widget_id: &str) -> Result<(), DashError> {
        self.write::<()>(
            Method::DELETE,
            self.endpoint(&["tabs", dashboard_id, "widgets", widget_id])?,
            None,
        )
        .await?;
        Ok(())
    }

    /// Save the full widget layout of a tab.
    pub async fn put_widgets(&self, dashboard_id: &str, widgets: &[WidgetRecord]) -> Result<(), DashError> {
        self.write(
            Method::PUT,
            self.endpoint(&["tabs", dashboard_id, "widgets"])?,
            Some(widgets),
        )
        .await?;
        Ok(())
    }

    pub async fn patch_widgets(&self, dashboard_id: &str, changes: &[PatchEntry]) -> Result<(), DashError> {
        self.write(
            Method::PATCH,
            self.endpoint(&["tabs", dashboard_id, "widgets"])?,
            Some(changes),
        )
        .await?;
        Ok(())
    }

    // -- data --------------------------------------------------------------

    pub async fn widget_data(&self, query: &WidgetDataQuery) -> Result<Vec<SourceRow>, DashError> {
        self.get_json(query.url(&self.base)?).await
    }

    /// Groupable columns per table, used to validate `groupBy`.
    pub async fn groupable_columns(&self) -> Result<HashMap<String, Vec<String>>, DashError> {
        self.get_json(self.endpoint(&["widgets"])?).await
    }

    /// Average over `window` as a percentage of the all-time average.
    ///
    /// Both figures are fetched concurrently. `None` when the all-time average is zero.
    pub async fn widget_trend(
        &self,
        dashboard_id: &str,
        widget_id: &str,
        window: TimeWindow,
    ) -> Result<Option<f64>, DashError> {
        let global_url = self.endpoint(&["tabs", dashboard_id, "widgets", widget_id, "trends"])?;
        let actual_url = trend_url(&global_url, window);

        let (actual, global) = tokio::join!(
            self.get_json::<TrendSummary>(actual_url),
            self.get_json::<TrendSummary>(global_url),
        );
        Ok(trend_percent(actual?.global.avg, global?.global.avg))
    }
}

fn trend_url(base: &Url, window: TimeWindow) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("time_from", &format_timestamp(window.from))
        .append_pair("time_to", &format_timestamp(window.to));
    url
}

fn tabs_from_map(by_id: HashMap<String, DashboardRecord>) -> Vec<DashboardRecord> {
    let mut tabs: Vec<DashboardRecord> = by_id
        .into_iter()
        .map(|(id, mut tab)| {
            if tab.id.is_empty() {
                tab.id = id;
            }
            tab
        })
        .collect();
    tabs.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
    tabs
}

/// Widgets of one tab per store key (the dashboard id).
pub struct WidgetRemote {
    client: Arc<DashboardClient>,
}

impl WidgetRemote {
    pub fn new(client: Arc<DashboardClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteCollection<WidgetRecord> for WidgetRemote {
    async fn fetch(&self, key: &str) -> Result<Vec<WidgetRecord>, DashError> {
        self.client.list_widgets(key).await
    }

    async fn create(&self, key: &str, record: &WidgetRecord) -> Result<String, DashError> {
        self.client.create_widget(key, record).await
    }

    async fn update(&self, key: &str, record: &WidgetRecord) -> Result<(), DashError> {
        self.client.update_widget(key, record).await
    }

    async fn delete(&self, key: &str, id: &str) -> Result<(), DashError> {
        self.client.delete_widget(key, id).await
    }

    async fn patch(&self, key: &str, changes: &[PatchEntry]) -> Result<(), DashError> {
        self.client.patch_widgets(key, changes).await
    }

    async fn replace(&self, key: &str, records: &[WidgetRecord]) -> Result<(), DashError> {
        self.client.put_widgets(key, records).await
    }
}

/// The tab list. There is one collection, so the store key is ignored.
pub struct TabRemote {
    client: Arc<DashboardClient>,
}

impl TabRemote {
    pub fn new(client: Arc<DashboardClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteCollection<DashboardRecord> for TabRemote {
    async fn fetch(&self, _key: &str) -> Result<Vec<DashboardRecord>, DashError> {
        self.client.list_tabs().await
    }

    async fn create(&self, _key: &str, record: &DashboardRecord) -> Result<String, DashError> {
        self.client.create_tab(record).await
    }

    async fn update(&self, _key: &str, record: &DashboardRecord) -> Result<(), DashError> {
        self.client.update_tab(record).await
    }

    async fn delete(&self, _key: &str, id: &str) -> Result<(), DashError> {
        self.client.delete_tab(id).await
    }

    async fn patch(&self, _key: &str, changes: &[PatchEntry]) -> Result<(), DashError> {
        self.client.patch_tabs(changes).await
    }

    /// The tab API has no bulk PUT; a full save is sent as a patch of every tab.
    async fn replace(&self, _key: &str, records: &[DashboardRecord]) -> Result<(), DashError> {
        let changes = records
            .iter()
            .map(|tab| match serde_json::to_value(tab)? {
                serde_json::Value::Object(fields) => Ok(fields),
                other => Err(DashError::Parse(format!("tab is not an object: {other}"))),
            })
            .collect::<Result<Vec<PatchEntry>, DashError>>()?;
        self.client.patch_tabs(&changes).await
    }
}
