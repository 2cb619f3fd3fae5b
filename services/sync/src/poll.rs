//! Incremental location polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use sync_common::{epoch_start, DateCursor, SyncError, SyncResult};
use tree_store::{StoreClient, Tree};

use crate::ingest::GridIngestor;
use crate::paths;

/// Observable poller counters, shared with the status server.
#[derive(Debug, Default)]
pub struct PollStatus {
    pub cycles: AtomicU64,
    pub locations_polled: AtomicU64,
    pub locations_failed: AtomicU64,
    last_cycle_end: Mutex<Option<String>>,
}

impl PollStatus {
    pub fn last_cycle_end(&self) -> Option<String> {
        self.last_cycle_end.lock().ok().and_then(|end| end.clone())
    }
}

/// Result of one poll cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollCycle {
    pub polled: u64,
    pub failed: u64,
}

/// Refreshes every registered location on a fixed interval.
///
/// Each cycle re-reads the location collection and fetches only the date
/// range past each location's high-water mark, through the same bucketed
/// write discipline the watches use. After a successful fetch the mark is
/// advanced, so the next cycle fetches only new days.
pub struct IncrementalPoller {
    store: Arc<dyn StoreClient>,
    ingestor: GridIngestor,
    cursor: DateCursor,
    interval: Duration,
    tree: Tree,
    status: Arc<PollStatus>,
}

impl IncrementalPoller {
    pub fn new(
        store: Arc<dyn StoreClient>,
        ingestor: GridIngestor,
        cursor: DateCursor,
        interval: Duration,
        tree: Tree,
    ) -> Self {
        Self {
            store,
            ingestor,
            cursor,
            interval,
            tree,
            status: Arc::new(PollStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<PollStatus> {
        self.status.clone()
    }

    /// Run until shutdown. The first cycle runs immediately, not after one
    /// full interval.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> SyncResult<()> {
        info!(interval_secs = self.interval.as_secs(), "Starting incremental poller");

        loop {
            if let Err(err) = self.poll_cycle().await {
                warn!(error = %err, "Poll cycle failed");
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Poller stopped");
        Ok(())
    }

    /// One pass over every registered location.
    pub async fn poll_cycle(&self) -> SyncResult<PollCycle> {
        let end = self.cursor.current();

        let locations = match self.store.get(paths::LOCATION_PATH).await {
            Ok(doc) => doc,
            Err(err) if err.is_not_found() => {
                debug!("No locations registered yet");
                return Ok(PollCycle::default());
            }
            Err(err) => return Err(err),
        };

        let keys: Vec<String> = locations
            .as_object()
            .map(|map| {
                map.keys()
                    .filter(|key| !key.starts_with('_'))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut cycle = PollCycle::default();
        for key in keys {
            match self.poll_location(&key, end).await {
                Ok(()) => cycle.polled += 1,
                Err(err) => {
                    // One bad location never aborts the rest of the cycle.
                    error!(location = %key, error = %err, "Location poll failed");
                    cycle.failed += 1;
                }
            }
        }

        self.status.cycles.fetch_add(1, Ordering::Relaxed);
        self.status
            .locations_polled
            .fetch_add(cycle.polled, Ordering::Relaxed);
        self.status
            .locations_failed
            .fetch_add(cycle.failed, Ordering::Relaxed);
        if let Ok(mut last) = self.status.last_cycle_end.lock() {
            *last = Some(end.to_string());
        }

        info!(polled = cycle.polled, failed = cycle.failed, end = %end, "Poll cycle complete");
        Ok(cycle)
    }

    async fn poll_location(&self, key: &str, end: NaiveDate) -> SyncResult<()> {
        let record_path = format!("{}/{}", paths::LOCATION_PATH, key);
        let record = self.store.get(&record_path).await?;

        let start = match record.get("lastDate").and_then(Value::as_str) {
            Some(raw) => raw
                .parse::<NaiveDate>()
                .map_err(|_| SyncError::InvalidDate(raw.to_string()))?,
            // Never fetched: full history from the default epoch.
            None => epoch_start(),
        };

        if start > end {
            debug!(location = %key, start = %start, end = %end, "Already ahead of cursor");
            return Ok(());
        }

        info!(location = %key, start = %start, end = %end, "Polling location");

        // Records carry their own coordinates; fall back to decoding the
        // key as a geohash when they are absent.
        let lat = record.get("lat").and_then(Value::as_f64);
        let lon = record.get("lon").and_then(Value::as_f64);
        match (lat, lon) {
            (Some(lat), Some(lon)) => self.ingestor.ingest_at(key, lat, lon, start, end).await?,
            _ => self.ingestor.ingest(key, start, end).await?,
        }

        // Advance the high-water mark only after the fetch succeeded, so an
        // interrupted refresh re-covers the same window next cycle.
        self.store
            .put(&record_path, json!({ "lastDate": end.to_string() }), &self.tree)
            .await?;

        Ok(())
    }
}
