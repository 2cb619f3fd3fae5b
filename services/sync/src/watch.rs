//! List watch: one-shot ingestion per newly registered grid cell.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use sync_common::{epoch_start, DateCursor, SyncResult};
use tree_store::{ListChange, ResumeToken, StoreClient, Tree};

use crate::ingest::GridIngestor;
use crate::paths;

/// Lifecycle of one watched collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Initializing,
    Watching,
    Stopped,
}

impl WatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchState::Initializing => "initializing",
            WatchState::Watching => "watching",
            WatchState::Stopped => "stopped",
        }
    }
}

/// Observable status of a watch, shared with the status server.
#[derive(Debug)]
pub struct WatchStatus {
    state: Mutex<WatchState>,
    pub keys_processed: AtomicU64,
    pub keys_failed: AtomicU64,
}

impl Default for WatchStatus {
    fn default() -> Self {
        Self {
            state: Mutex::new(WatchState::Initializing),
            keys_processed: AtomicU64::new(0),
            keys_failed: AtomicU64::new(0),
        }
    }
}

impl WatchStatus {
    pub fn state(&self) -> WatchState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(WatchState::Stopped)
    }

    fn set_state(&self, next: WatchState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }
}

/// Watches one collection for newly added keys and ingests each exactly
/// once per delivery.
///
/// Keys are handled strictly in feed order, one at a time; a slow ingestion
/// delays detection of the next key but bounds concurrent fetch load.
/// Ingestion failures are isolated per key and never stop the watch. The
/// resume token advances after each handled key, so a crash between
/// ingestion and token persistence re-delivers at most that one key on
/// restart — safe, because re-ingestion overwrites idempotently.
pub struct ListWatch {
    name: String,
    path: String,
    store: Arc<dyn StoreClient>,
    ingestor: GridIngestor,
    cursor: DateCursor,
    tree: Tree,
    status: Arc<WatchStatus>,
}

impl ListWatch {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        store: Arc<dyn StoreClient>,
        ingestor: GridIngestor,
        cursor: DateCursor,
        tree: Tree,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            store,
            ingestor,
            cursor,
            tree,
            status: Arc::new(WatchStatus::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Arc<WatchStatus> {
        self.status.clone()
    }

    fn token_path(&self) -> String {
        format!("{}/{}", paths::WATCHES_PATH, self.name)
    }

    /// The persisted resume token, if any. Absence means this watch has
    /// never run here: start from the current tail rather than replaying
    /// keys registered before the service existed.
    async fn load_token(&self) -> SyncResult<Option<ResumeToken>> {
        match self.store.get(&self.token_path()).await {
            Ok(doc) => Ok(doc
                .get("token")
                .and_then(Value::as_str)
                .map(|token| ResumeToken(token.to_string()))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn save_token(&self, token: &ResumeToken) {
        let body = json!({ "token": token.0 });
        if let Err(err) = self.store.put(&self.token_path(), body, &self.tree).await {
            // At-least-once: losing a token write means one key may be
            // re-delivered on restart, which re-ingests idempotently.
            warn!(watch = %self.name, error = %err, "Failed to persist resume token");
        }
    }

    /// Run until the shutdown signal fires or the feed ends.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> SyncResult<()> {
        let resume = self.load_token().await?;
        let mut feed = self.store.watch(&self.path, resume).await?;

        self.status.set_state(WatchState::Watching);
        info!(watch = %self.name, path = %self.path, "Watching for new grid registrations");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                change = feed.next() => match change {
                    Ok(Some(change)) => self.handle(change).await,
                    Ok(None) => break,
                    Err(err) => {
                        error!(watch = %self.name, error = %err, "Change feed failed");
                        break;
                    }
                },
            }
        }

        feed.stop().await.ok();
        self.status.set_state(WatchState::Stopped);
        info!(watch = %self.name, "Watch stopped");
        Ok(())
    }

    async fn handle(&self, change: ListChange) {
        let key = change.key.trim_start_matches('/');

        if key.starts_with('_') {
            // Store bookkeeping (_id, _rev, _meta), not a registration.
            debug!(watch = %self.name, key, "Skipping metadata key");
            self.save_token(&change.token).await;
            return;
        }

        let start = epoch_start();
        let end = self.cursor.current();
        match self.ingestor.ingest(key, start, end).await {
            Ok(()) => {
                self.save_token(&change.token).await;
                self.status.keys_processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                // Isolate the failure to this key; the watch keeps
                // delivering, and a later re-registration retries naturally.
                error!(watch = %self.name, key, error = %err, "Ingestion failed");
                self.save_token(&change.token).await;
                self.status.keys_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
