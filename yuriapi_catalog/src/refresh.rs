//! Periodic catalog refresh.
use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};
use yuriapi_shutdown::ShutdownToken;

use crate::{CatalogStore, RefreshSummary, Result};

/// Run [`CatalogStore::refresh`] on the blocking thread pool
pub async fn refresh_catalog(store: Arc<CatalogStore>) -> Result<RefreshSummary> {
    tokio::task::spawn_blocking(move || store.refresh()).await?
}

/// Spawn a task that refreshes `store` every `refresh_interval` until shutdown
///
/// The first refresh happens one interval after the call; the store is expected to have been
/// seeded already. A failed refresh is logged and the previous snapshot stays published.
///
/// Shutdown is only observed between refreshes: a refresh that has started runs to completion
/// before the task reports back through `shutdown`.
///
/// # Panics
///
/// Panics if `refresh_interval` is zero.
pub fn background_refresh_process(
    store: Arc<CatalogStore>,
    refresh_interval: Duration,
    shutdown: ShutdownToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval_at(Instant::now() + refresh_interval, refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for_shutdown() => break,
                _ = interval.tick() => {}
            }

            match refresh_catalog(Arc::clone(&store)).await {
                Ok(RefreshSummary {
                    decoded,
                    skipped,
                    total,
                }) => info!(decoded, skipped, total, "refreshed catalog"),
                Err(error) => error!(%error, "error refreshing catalog, keeping previous snapshot"),
            }
        }

        info!("catalog refresh stopped");
        shutdown.complete();
    })
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path, time::Duration};

    use yuriapi_shutdown::{ShutdownManager, ShutdownOutcome, drain_within};

    use super::*;

    fn write_item(dir: &Path, cid: &str) {
        fs::write(
            dir.join(format!("{cid}.json")),
            format!(r#"{{"cid": "{cid}", "url": "", "source": "", "images": []}}"#),
        )
        .unwrap();
    }

    async fn wait_for_len(store: &CatalogStore, len: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while store.len() != len {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("store never reached expected size");
    }

    #[test_log::test(tokio::test)]
    async fn picks_up_new_files_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        write_item(dir.path(), "a");
        let store = Arc::new(CatalogStore::new(dir.path()));
        let seeded = refresh_catalog(Arc::clone(&store)).await.unwrap();
        assert_eq!(seeded.total, 1);

        let manager = ShutdownManager::new();
        let handle = background_refresh_process(
            Arc::clone(&store),
            Duration::from_millis(20),
            manager.register(),
        );

        write_item(dir.path(), "b");
        wait_for_len(&store, 2).await;

        manager.shutdown();
        let outcome = drain_within(Duration::from_secs(5), manager.join()).await;
        assert_eq!(outcome, ShutdownOutcome::Clean);
        handle.await.unwrap();

        // no further ticks once stopped
        write_item(dir.path(), "c");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.len(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn failed_refresh_keeps_serving_and_retries() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("catalog");
        fs::create_dir(&source).unwrap();
        write_item(&source, "a");

        let store = Arc::new(CatalogStore::new(&source));
        refresh_catalog(Arc::clone(&store)).await.unwrap();

        let manager = ShutdownManager::new();
        let handle = background_refresh_process(
            Arc::clone(&store),
            Duration::from_millis(20),
            manager.register(),
        );

        fs::remove_dir_all(&source).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.len(), 1);
        assert!(!handle.is_finished(), "a failed refresh must not stop the loop");

        fs::create_dir(&source).unwrap();
        write_item(&source, "b");
        wait_for_len(&store, 2).await;

        manager.shutdown();
        manager.join().await;
        handle.await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn seeding_a_missing_directory_fails() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(CatalogStore::new(root.path().join("missing")));
        assert!(refresh_catalog(store).await.is_err());
    }
}
