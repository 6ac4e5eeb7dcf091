//! dashsync: print a dashboard's tabs, or the chart data of one tab's widgets.
//!
//! Usage:
//!   dashsync                       list tabs
//!   dashsync <dashboard-id> [page] chart data for every widget (page <= 0)
//!   dashsync <dashboard-id> --watch
//!                                  keep the widget list in sync and report changes

use std::sync::Arc;

use tokio::sync::Notify;

use dashsync_lib::api::{DashboardClient, TabRemote, WidgetDataQuery, WidgetRemote, TABS_KEY};
use dashsync_lib::config::load_config;
use dashsync_lib::series::{adapt, SeriesMerger};
use dashsync_lib::sync::{run_revalidation_poller, CollectionSyncStore};
use dashsync_lib::types::{DashboardRecord, WidgetRecord};
use dashsync_lib::window::wall_clock_now;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load dashsync config: {e}"))?;
    let tz = config.tz()?;
    let client = Arc::new(DashboardClient::new(&config)?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(dashboard_id) = args.first().cloned() else {
        let tabs = CollectionSyncStore::<DashboardRecord>::new(Arc::new(TabRemote::new(client.clone())));
        tabs.revalidate(TABS_KEY).await?;
        println!("{}", serde_json::to_string_pretty(&tabs.query(TABS_KEY))?);
        return Ok(());
    };

    let widgets: Arc<CollectionSyncStore<WidgetRecord>> =
        Arc::new(CollectionSyncStore::<WidgetRecord>::new(Arc::new(WidgetRemote::new(client.clone()))));

    if args.get(1).map(String::as_str) == Some("--watch") {
        let mut changes = widgets.subscribe(&dashboard_id);
        let poller = tokio::spawn(run_revalidation_poller(
            widgets.clone(),
            dashboard_id.clone(),
            config.poll_interval(),
            Arc::new(Notify::new()),
        ));
        log::info!("Watching dashboard {} every {:?}", dashboard_id, config.poll_interval());

        while changes.changed().await.is_ok() {
            let snapshot = widgets.query(&dashboard_id);
            let count = snapshot.data.as_ref().map(Vec::len).unwrap_or(0);
            println!("{} widgets (error: {})", count, snapshot.is_error);
        }
        poller.abort();
        return Ok(());
    }

    let page: i32 = match args.get(1) {
        Some(raw) => raw.parse()?,
        None => 0,
    };

    widgets.revalidate(&dashboard_id).await?;
    let now = wall_clock_now(tz);
    let merger = SeriesMerger::default();
    let mut charts = Vec::new();

    for widget in widgets.query(&dashboard_id).data.unwrap_or_default() {
        let query = match WidgetDataQuery::for_widget(&widget, page, now) {
            Ok(query) => query,
            Err(e) => {
                log::warn!("Skipping widget {}: {}", widget.id, e);
                continue;
            }
        };
        match client.widget_data(&query).await {
            Ok(rows) => charts.push(serde_json::json!({
                "id": widget.id,
                "title": widget.title,
                "chart": adapt(&widget, &rows, &merger),
            })),
            Err(e) => log::warn!("Widget {} data fetch failed: {}", widget.id, e),
        }
    }

    println!("{}", serde_json::to_string_pretty(&charts)?);
    Ok(())
}
