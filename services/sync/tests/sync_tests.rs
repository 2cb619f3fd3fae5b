//! End-to-end tests of the watch-and-sync pipeline against the in-memory
//! store binding, with a scripted provider standing in for the upstream
//! data sources.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use grid_providers::{DataProvider, FetchedSeries};
use sync_common::{DailySeries, DateCursor, SyncError, SyncResult};
use tree_store::{MemoryStore, StoreClient, Tree};
use weather_sync::ingest::GridIngestor;
use weather_sync::orchestrator::{ensure_service_root, Orchestrator};
use weather_sync::paths;
use weather_sync::poll::IncrementalPoller;
use weather_sync::tree::service_tree;
use weather_sync::watch::ListWatch;

// ============================================================================
// Test fixtures
// ============================================================================

#[derive(Debug, Clone)]
struct Call {
    lat: f64,
    lon: f64,
    start: NaiveDate,
    end: NaiveDate,
}

/// Provider returning a fixed set of days (clamped to the requested range)
/// and recording every fetch it serves.
struct ScriptedProvider {
    days: Vec<NaiveDate>,
    template: Value,
    fail_calls: HashSet<usize>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedProvider {
    fn new(days: &[&str]) -> Self {
        Self {
            days: days.iter().map(|day| day.parse().unwrap()).collect(),
            template: json!({ "units": { "maxt": "degF" } }),
            fail_calls: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_template(mut self, template: Value) -> Self {
        self.template = template;
        self
    }

    /// Inject a failure on the nth fetch (1-based).
    fn failing_on(mut self, call: usize) -> Self {
        self.fail_calls.insert(call);
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_daily(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<FetchedSeries> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call { lat, lon, start, end });
            calls.len()
        };

        if self.fail_calls.contains(&call_number) {
            return Err(SyncError::provider_fetch("scripted", "injected failure"));
        }

        let series: DailySeries = self
            .days
            .iter()
            .filter(|day| **day >= start && **day <= end)
            .map(|day| (*day, json!({ "maxt": 70.0, "mint": 50.0 })))
            .collect();

        Ok(FetchedSeries {
            series,
            template: self.template.clone(),
        })
    }
}

fn cursor() -> DateCursor {
    DateCursor::Fixed("2021-06-10".parse().unwrap())
}

fn weather_ingestor(
    store: &Arc<dyn StoreClient>,
    provider: &Arc<ScriptedProvider>,
    tree: &Tree,
) -> GridIngestor {
    GridIngestor::new(
        store.clone(),
        provider.clone(),
        paths::WEATHER_PATH,
        tree.clone(),
    )
}

fn weather_watch(
    store: &Arc<dyn StoreClient>,
    provider: &Arc<ScriptedProvider>,
    tree: &Tree,
) -> Arc<ListWatch> {
    Arc::new(ListWatch::new(
        "weather-sync",
        paths::WEATHER_PATH,
        store.clone(),
        weather_ingestor(store, provider, tree),
        cursor(),
        tree.clone(),
    ))
}

/// Register a grid cell the way the external orchestration layer does:
/// append a key to the collection.
async fn register(store: &Arc<dyn StoreClient>, collection: &str, key: &str, tree: &Tree) {
    store
        .put(collection, json!({ key: {} }), tree)
        .await
        .unwrap();
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn spawn_watch(
    watch: &Arc<ListWatch>,
) -> (broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn({
        let watch = watch.clone();
        async move {
            watch.run(shutdown_rx).await.unwrap();
        }
    });
    (shutdown_tx, task)
}

// ============================================================================
// Watch pipeline
// ============================================================================

#[tokio::test]
async fn test_new_weather_key_backfills_grid() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();
    let provider = Arc::new(ScriptedProvider::new(&[
        "2019-12-31",
        "2020-06-01",
        "2020-06-02",
        "2021-01-15",
    ]));

    let watch = weather_watch(&store, &provider, &tree);
    let status = watch.status();
    let (shutdown, task) = spawn_watch(&watch);

    register(&store, paths::WEATHER_PATH, "9q8yy", &tree).await;
    wait_until("key processed", || {
        status.keys_processed.load(std::sync::atomic::Ordering::Relaxed) == 1
    })
    .await;

    // One full-history fetch at the decoded cell center.
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].start.to_string(), "2000-01-01");
    assert_eq!(calls[0].end.to_string(), "2021-06-10");
    assert!((calls[0].lat - 37.77).abs() < 0.01);
    assert!((calls[0].lon + 122.41).abs() < 0.01);

    // Template at the grid root, one partition per year, each holding only
    // its own year's dates.
    let grid = store
        .get(&format!("{}/9q8yy", paths::WEATHER_PATH))
        .await
        .unwrap();
    assert_eq!(grid["template"]["units"]["maxt"], "degF");

    let years = grid["year-index"].as_object().unwrap();
    assert_eq!(
        years.keys().collect::<Vec<_>>(),
        vec!["2019", "2020", "2021"]
    );
    let days_2020 = years["2020"]["day-index"].as_object().unwrap();
    assert_eq!(days_2020.len(), 2);
    assert!(days_2020.keys().all(|day| day.starts_with("2020")));

    shutdown.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_ingest_twice_is_idempotent() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();
    let provider = Arc::new(ScriptedProvider::new(&["2020-06-01", "2021-01-15"]));
    let ingestor = weather_ingestor(&store, &provider, &tree);

    let start = "2000-01-01".parse().unwrap();
    let end = "2021-06-10".parse().unwrap();

    ingestor.ingest("9q8yy", start, end).await.unwrap();
    let first = store
        .get(&format!("{}/9q8yy", paths::WEATHER_PATH))
        .await
        .unwrap();

    ingestor.ingest("9q8yy", start, end).await.unwrap();
    let second = store
        .get(&format!("{}/9q8yy", paths::WEATHER_PATH))
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_watch_resumes_after_restart() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();
    let first_provider = Arc::new(ScriptedProvider::new(&["2020-06-01"]));

    let watch = weather_watch(&store, &first_provider, &tree);
    let status = watch.status();
    let (shutdown, task) = spawn_watch(&watch);

    register(&store, paths::WEATHER_PATH, "9q8yy", &tree).await;
    register(&store, paths::WEATHER_PATH, "dp3wm", &tree).await;
    wait_until("first two keys processed", || {
        status.keys_processed.load(std::sync::atomic::Ordering::Relaxed) == 2
    })
    .await;

    shutdown.send(()).unwrap();
    task.await.unwrap();

    // A third key arrives while the service is down.
    register(&store, paths::WEATHER_PATH, "dr5rs", &tree).await;

    // Restart with a fresh provider: exactly the missed key is processed,
    // never k1 or k2 again.
    let second_provider = Arc::new(ScriptedProvider::new(&["2020-06-01"]));
    let restarted = weather_watch(&store, &second_provider, &tree);
    let restarted_status = restarted.status();
    let (shutdown, task) = spawn_watch(&restarted);

    wait_until("missed key processed", || {
        restarted_status
            .keys_processed
            .load(std::sync::atomic::Ordering::Relaxed)
            == 1
    })
    .await;

    let calls = second_provider.calls();
    assert_eq!(calls.len(), 1);
    let (lat, lon) = sync_common::geohash::decode("dr5rs").unwrap();
    assert!((calls[0].lat - lat).abs() < 1e-9);
    assert!((calls[0].lon - lon).abs() < 1e-9);

    assert_eq!(first_provider.calls().len(), 2);

    shutdown.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_provider_failure_is_isolated() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();
    // The second fetch (k2) fails; k1 and k3 succeed.
    let provider = Arc::new(ScriptedProvider::new(&["2020-06-01"]).failing_on(2));

    let watch = weather_watch(&store, &provider, &tree);
    let status = watch.status();
    let (shutdown, task) = spawn_watch(&watch);

    register(&store, paths::WEATHER_PATH, "9q8yy", &tree).await;
    register(&store, paths::WEATHER_PATH, "dp3wm", &tree).await;
    register(&store, paths::WEATHER_PATH, "dr5rs", &tree).await;

    wait_until("surviving keys processed", || {
        status.keys_processed.load(std::sync::atomic::Ordering::Relaxed) == 2
            && status.keys_failed.load(std::sync::atomic::Ordering::Relaxed) == 1
    })
    .await;

    // The failed cell is left resumable: registered but without data.
    let failed = store
        .get(&format!("{}/dp3wm", paths::WEATHER_PATH))
        .await
        .unwrap();
    assert!(failed.get("template").is_none());

    // The key after the failure was still ingested.
    let survived = store
        .get(&format!("{}/dr5rs", paths::WEATHER_PATH))
        .await
        .unwrap();
    assert!(survived.get("template").is_some());

    shutdown.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_invalid_geohash_key_is_isolated() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();
    let provider = Arc::new(ScriptedProvider::new(&["2020-06-01"]));

    let watch = weather_watch(&store, &provider, &tree);
    let status = watch.status();
    let (shutdown, task) = spawn_watch(&watch);

    // "oops" contains characters outside the geohash alphabet.
    register(&store, paths::WEATHER_PATH, "oops", &tree).await;
    register(&store, paths::WEATHER_PATH, "9q8yy", &tree).await;

    wait_until("valid key processed despite bad key", || {
        status.keys_processed.load(std::sync::atomic::Ordering::Relaxed) == 1
            && status.keys_failed.load(std::sync::atomic::Ordering::Relaxed) == 1
    })
    .await;

    // The malformed key never reached the provider.
    assert_eq!(provider.calls().len(), 1);

    shutdown.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_metadata_keys_are_skipped() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();
    let provider = Arc::new(ScriptedProvider::new(&["2020-06-01"]));

    let watch = weather_watch(&store, &provider, &tree);
    let status = watch.status();
    let (shutdown, task) = spawn_watch(&watch);

    register(&store, paths::WEATHER_PATH, "_meta", &tree).await;
    register(&store, paths::WEATHER_PATH, "9q8yy", &tree).await;

    wait_until("real key processed", || {
        status.keys_processed.load(std::sync::atomic::Ordering::Relaxed) == 1
    })
    .await;

    assert_eq!(status.keys_failed.load(std::sync::atomic::Ordering::Relaxed), 0);
    assert_eq!(provider.calls().len(), 1);

    shutdown.send(()).unwrap();
    task.await.unwrap();
}

// ============================================================================
// Incremental poller
// ============================================================================

fn poller(
    store: &Arc<dyn StoreClient>,
    provider: &Arc<ScriptedProvider>,
    tree: &Tree,
) -> IncrementalPoller {
    IncrementalPoller::new(
        store.clone(),
        weather_ingestor(store, provider, tree),
        cursor(),
        Duration::from_secs(3600),
        tree.clone(),
    )
}

#[tokio::test]
async fn test_poll_fetches_exact_delta_and_advances_mark() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();
    let provider = Arc::new(ScriptedProvider::new(&["2021-06-03", "2021-06-08"]));

    store
        .put(
            &format!("{}/9q8yy", paths::LOCATION_PATH),
            json!({ "lon": -122.42, "lat": 37.78, "lastDate": "2021-06-01" }),
            &tree,
        )
        .await
        .unwrap();

    let cycle = poller(&store, &provider, &tree).poll_cycle().await.unwrap();
    assert_eq!(cycle.polled, 1);
    assert_eq!(cycle.failed, 0);

    // Exactly the delta window, at the record's own coordinates.
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].start.to_string(), "2021-06-01");
    assert_eq!(calls[0].end.to_string(), "2021-06-10");
    assert_eq!(calls[0].lat, 37.78);
    assert_eq!(calls[0].lon, -122.42);

    // The delta was written through the shared grid layout.
    let grid = store
        .get(&format!("{}/9q8yy", paths::WEATHER_PATH))
        .await
        .unwrap();
    let days = grid["year-index"]["2021"]["day-index"].as_object().unwrap();
    assert_eq!(days.len(), 2);

    // High-water mark advanced to the cursor.
    let record = store
        .get(&format!("{}/9q8yy", paths::LOCATION_PATH))
        .await
        .unwrap();
    assert_eq!(record["lastDate"], "2021-06-10");
    assert_eq!(record["lat"], 37.78);
}

#[tokio::test]
async fn test_poll_full_history_when_never_fetched() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();
    let provider = Arc::new(ScriptedProvider::new(&["2020-06-01"]));

    store
        .put(
            &format!("{}/9q8yy", paths::LOCATION_PATH),
            json!({ "lon": -122.42, "lat": 37.78 }),
            &tree,
        )
        .await
        .unwrap();

    poller(&store, &provider, &tree).poll_cycle().await.unwrap();

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].start.to_string(), "2000-01-01");
    assert_eq!(calls[0].end.to_string(), "2021-06-10");

    let record = store
        .get(&format!("{}/9q8yy", paths::LOCATION_PATH))
        .await
        .unwrap();
    assert_eq!(record["lastDate"], "2021-06-10");
}

#[tokio::test]
async fn test_poll_isolates_failing_location() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();
    // Locations enumerate in key order; the first fetch fails.
    let provider = Arc::new(ScriptedProvider::new(&["2021-06-03"]).failing_on(1));

    store
        .put(
            &format!("{}/9q8yy", paths::LOCATION_PATH),
            json!({ "lon": -122.42, "lat": 37.78, "lastDate": "2021-06-01" }),
            &tree,
        )
        .await
        .unwrap();
    store
        .put(
            &format!("{}/dp3wm", paths::LOCATION_PATH),
            json!({ "lon": -87.65, "lat": 41.85, "lastDate": "2021-06-01" }),
            &tree,
        )
        .await
        .unwrap();

    let cycle = poller(&store, &provider, &tree).poll_cycle().await.unwrap();
    assert_eq!(cycle.polled, 1);
    assert_eq!(cycle.failed, 1);

    // The failed location keeps its old mark and is retried next cycle; the
    // healthy one advanced.
    let failed = store
        .get(&format!("{}/9q8yy", paths::LOCATION_PATH))
        .await
        .unwrap();
    assert_eq!(failed["lastDate"], "2021-06-01");

    let polled = store
        .get(&format!("{}/dp3wm", paths::LOCATION_PATH))
        .await
        .unwrap();
    assert_eq!(polled["lastDate"], "2021-06-10");
}

// ============================================================================
// Orchestrator
// ============================================================================

#[tokio::test]
async fn test_service_root_created_when_missing() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();

    let before = store.get(paths::SERVICE_PATH).await;
    assert!(before.unwrap_err().is_not_found());

    ensure_service_root(&store, &tree).await.unwrap();
    assert!(store.get(paths::SERVICE_PATH).await.is_ok());

    // Existing content is left untouched on later startups.
    store
        .put(
            &format!("{}/9q8yy", paths::LOCATION_PATH),
            json!({ "lon": 1.0, "lat": 2.0 }),
            &tree,
        )
        .await
        .unwrap();
    ensure_service_root(&store, &tree).await.unwrap();
    assert!(store
        .get(&format!("{}/9q8yy", paths::LOCATION_PATH))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_orchestrator_runs_both_watches_and_poller() {
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
    let tree = service_tree();

    let weather = Arc::new(ScriptedProvider::new(&["2020-06-01"]));
    let solar = Arc::new(
        ScriptedProvider::new(&["2020-06-01"])
            .with_template(json!({ "source": "nsrdb-psmv3" })),
    );

    let mut orchestrator = Orchestrator::new(
        store.clone(),
        weather.clone(),
        solar.clone(),
        cursor(),
        Duration::from_secs(3600),
        true,
    );
    orchestrator.start().await.unwrap();

    // Startup created the service root.
    assert!(store.get(paths::SERVICE_PATH).await.is_ok());

    register(&store, paths::WEATHER_PATH, "9q8yy", &tree).await;
    register(&store, paths::SOLAR_PATH, "dp3wm", &tree).await;

    let weather_path = format!("{}/9q8yy", paths::WEATHER_PATH);
    let solar_path = format!("{}/dp3wm", paths::SOLAR_PATH);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let written = async {
            let weather_grid = store.get(&weather_path).await.ok()?;
            let solar_grid = store.get(&solar_path).await.ok()?;
            Some(
                weather_grid.get("template").is_some()
                    && solar_grid.get("template").is_some(),
            )
        }
        .await
        .unwrap_or(false);

        if written {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for both grids"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let solar_grid = store.get(&solar_path).await.unwrap();
    assert_eq!(solar_grid["template"]["source"], "nsrdb-psmv3");

    orchestrator.shutdown().await;
}
