//! Background revalidation of one synced collection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::sync::store::CollectionSyncStore;
use crate::types::SyncRecord;

/// Revalidate `key` now and then every `interval`, or sooner when `wake` fires.
///
/// Runs until the task is aborted. Failures are logged and retried on the
/// next tick; the store keeps its last good data.
pub async fn run_revalidation_poller<R: SyncRecord>(
    store: Arc<CollectionSyncStore<R>>,
    key: String,
    interval: Duration,
    wake: Arc<Notify>,
) {
    loop {
        match store.revalidate(&key).await {
            Ok(true) => log::debug!("Revalidation poller: refreshed {}", key),
            Ok(false) => log::debug!("Revalidation poller: {} busy, result dropped", key),
            Err(e) => log::warn!("Revalidation poller: failed to fetch {}: {}", key, e),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = wake.notified() => {
                log::info!("Revalidation poller: woken for {}", key);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fake::FakeRemote;
    use crate::sync::store::RemoteCollection;
    use crate::types::DashboardRecord;

    fn setup() -> (Arc<FakeRemote<DashboardRecord>>, Arc<CollectionSyncStore<DashboardRecord>>) {
        let remote = Arc::new(FakeRemote::new());
        remote.seed(
            "tabs",
            vec![DashboardRecord {
                id: "t1".into(),
                title: "Main".into(),
                order: 0,
            }],
        );
        let store = Arc::new(CollectionSyncStore::new(
            remote.clone() as Arc<dyn RemoteCollection<DashboardRecord>>
        ));
        (remote, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_fetches_on_interval() {
        let (remote, store) = setup();
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(run_revalidation_poller(
            store.clone(),
            "tabs".into(),
            Duration::from_secs(60),
            wake,
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(store.query("tabs").data.map(|d| d.len()), Some(1));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(remote.fetch_count(), 2);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_wakes_early_and_survives_errors() {
        let (remote, store) = setup();
        remote.fail_reads(true);
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(run_revalidation_poller(
            store.clone(),
            "tabs".into(),
            Duration::from_secs(3600),
            wake.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(remote.fetch_count(), 1);
        assert!(store.query("tabs").is_error);

        remote.fail_reads(false);
        wake.notify_one();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(remote.fetch_count(), 2);
        assert!(!store.query("tabs").is_error);
        task.abort();
    }
}
