//! Service wiring and lifecycle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use grid_providers::DataProvider;
use sync_common::{DateCursor, SyncResult};
use tree_store::{StoreClient, Tree};

use crate::ingest::GridIngestor;
use crate::paths;
use crate::poll::{IncrementalPoller, PollCycle, PollStatus};
use crate::tree::service_tree;
use crate::watch::{ListWatch, WatchStatus};

/// Ensure the service root exists, creating it empty and tree-conformant
/// when the initial get reports NotFound.
///
/// Check-then-create is not atomic; racing a concurrent initializer is
/// benign (last-writer-wins on an empty body).
pub async fn ensure_service_root(store: &Arc<dyn StoreClient>, tree: &Tree) -> SyncResult<()> {
    match store.get(paths::SERVICE_PATH).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_not_found() => {
            info!(path = paths::SERVICE_PATH, "Creating service root");
            store.put(paths::SERVICE_PATH, json!({}), tree).await
        }
        Err(err) => Err(err),
    }
}

/// Owns the two watches and the poller: wires them to one live store
/// connection and controls their startup and shutdown.
pub struct Orchestrator {
    store: Arc<dyn StoreClient>,
    tree: Tree,
    weather_watch: Arc<ListWatch>,
    solar_watch: Arc<ListWatch>,
    poller: Arc<IncrementalPoller>,
    polling: bool,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StoreClient>,
        weather_provider: Arc<dyn DataProvider>,
        solar_provider: Arc<dyn DataProvider>,
        cursor: DateCursor,
        poll_interval: Duration,
        polling: bool,
    ) -> Self {
        let tree = service_tree();

        let weather_watch = Arc::new(ListWatch::new(
            "weather-sync",
            paths::WEATHER_PATH,
            store.clone(),
            GridIngestor::new(
                store.clone(),
                weather_provider.clone(),
                paths::WEATHER_PATH,
                tree.clone(),
            ),
            cursor,
            tree.clone(),
        ));

        let solar_watch = Arc::new(ListWatch::new(
            "solar-sync",
            paths::SOLAR_PATH,
            store.clone(),
            GridIngestor::new(store.clone(), solar_provider, paths::SOLAR_PATH, tree.clone()),
            cursor,
            tree.clone(),
        ));

        // The poller refreshes locations through the weather binding and the
        // same write discipline the weather watch uses.
        let poller = Arc::new(IncrementalPoller::new(
            store.clone(),
            GridIngestor::new(
                store.clone(),
                weather_provider,
                paths::WEATHER_PATH,
                tree.clone(),
            ),
            cursor,
            poll_interval,
            tree.clone(),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            store,
            tree,
            weather_watch,
            solar_watch,
            poller,
            polling,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    pub fn weather_status(&self) -> Arc<WatchStatus> {
        self.weather_watch.status()
    }

    pub fn solar_status(&self) -> Arc<WatchStatus> {
        self.solar_watch.status()
    }

    pub fn poll_status(&self) -> Arc<PollStatus> {
        self.poller.status()
    }

    pub fn polling(&self) -> bool {
        self.polling
    }

    /// Run one poll cycle without starting the long-lived tasks.
    pub async fn poll_once(&self) -> SyncResult<PollCycle> {
        ensure_service_root(&self.store, &self.tree).await?;
        self.poller.poll_cycle().await
    }

    /// Ensure the service root, then start the poller (first cycle runs
    /// immediately) and both watches.
    pub async fn start(&mut self) -> SyncResult<()> {
        ensure_service_root(&self.store, &self.tree).await?;

        if self.polling {
            let poller = self.poller.clone();
            let shutdown = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(async move {
                if let Err(err) = poller.run(shutdown).await {
                    error!(error = %err, "Poller exited with error");
                }
            }));
            info!("Started incremental poller");
        }

        for watch in [self.weather_watch.clone(), self.solar_watch.clone()] {
            let shutdown = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(async move {
                if let Err(err) = watch.run(shutdown).await {
                    error!(watch = watch.name(), error = %err, "Watch exited with error");
                }
            }));
        }

        info!("Service running");
        Ok(())
    }

    /// Cooperative shutdown: signal every task, then wait for each to
    /// finish. In-flight ingestion completes best-effort; a task that ended
    /// abnormally is logged, never re-thrown.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "Task ended abnormally");
            }
        }
        info!("Shutdown complete");
    }
}
