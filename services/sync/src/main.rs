//! Weather-grid sync service.
//!
//! Watches the store for newly registered grid cells (weather and solar),
//! backfills their history into the year-bucketed layout, and incrementally
//! refreshes registered locations on a poll interval.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use grid_providers::{AcisClient, DataProvider, NsrdbClient};
use tree_store::{HttpStore, StoreClient};
use weather_sync::config::SyncConfig;
use weather_sync::orchestrator::Orchestrator;
use weather_sync::server::{self, ServerState};

#[derive(Parser, Debug)]
#[command(name = "weather-sync")]
#[command(about = "Grid-cell weather and solar history sync service")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config/sync.yaml")]
    config: PathBuf,

    /// Run one poll cycle and exit (vs continuous watching and polling)
    #[arg(long)]
    once: bool,

    /// Disable the incremental poller regardless of configuration
    #[arg(long)]
    no_poll: bool,

    /// Port for the status HTTP server
    #[arg(long, env = "STATUS_PORT", default_value = "8084")]
    status_port: u16,

    /// Disable the status HTTP server
    #[arg(long)]
    no_status_server: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting weather-grid sync service");

    let config = SyncConfig::load(&args.config)?;

    // A failed store connection is fatal: the service cannot run without it.
    let store: Arc<dyn StoreClient> = Arc::new(HttpStore::connect(
        &config.store.domain,
        &config.store.token,
    )?);

    let weather: Arc<dyn DataProvider> = Arc::new(AcisClient::new()?);
    let solar: Arc<dyn DataProvider> = Arc::new(NsrdbClient::new(
        &config.service.solar_api_key,
        &config.service.solar_email,
    )?);

    let mut orchestrator = Orchestrator::new(
        store,
        weather,
        solar,
        config.cursor(),
        Duration::from_secs(config.service.poll_interval_secs),
        config.service.polling && !args.no_poll,
    );

    if args.once {
        // Single run mode
        info!("Running single poll cycle");
        let cycle = orchestrator.poll_once().await?;
        info!(polled = cycle.polled, failed = cycle.failed, "Poll cycle finished");
        return Ok(());
    }

    orchestrator.start().await?;

    // Start status server (unless disabled)
    if !args.no_status_server {
        let state = Arc::new(ServerState {
            watches: vec![
                ("weather-sync", orchestrator.weather_status()),
                ("solar-sync", orchestrator.solar_status()),
            ],
            poll: orchestrator.poll_status(),
            polling: orchestrator.polling(),
        });
        let status_port = args.status_port;
        tokio::spawn(async move {
            if let Err(err) = server::run_server(state, status_port).await {
                error!(error = %err, "Status server failed");
            }
        });
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
    orchestrator.shutdown().await;

    Ok(())
}
