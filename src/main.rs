//! forecast-sync: cached daily forecast lookups.
//!
//! Single-binary Tokio application that:
//! 1. Serves a place's forecast from the local record store while it is fresh
//! 2. Otherwise shows the cached records as loading and refreshes them from
//!    OpenWeatherMap
//! 3. Prints every state it publishes (loading, success, error)

mod config;
mod render;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use cache_sync::{new_store, SyncOptions, Synchronizer};
use common::config::StoreBackend;
use common::CacheSettings;
use owm_client::OwmClient;

use crate::render::Renderer;

/// Stale-while-revalidate daily forecast lookup
#[derive(Parser)]
#[command(name = "forecast-sync", about = "Cached daily forecast lookups")]
struct Cli {
    /// Place to look up. Starts an interactive session when omitted.
    place: Option<String>,

    /// Number of days to request.
    #[arg(long, short = 'n')]
    count: Option<i64>,

    /// Cache duration in seconds (overrides config).
    #[arg(long)]
    cache_secs: Option<u64>,

    /// Path to a TOML config file (default: ./config.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Record store backend: memory or sqlite.
    #[arg(long)]
    store: Option<String>,

    /// Print each state as a JSON line.
    #[arg(long)]
    json: bool,

    /// Keep reading places from stdin after the first lookup.
    #[arg(long, short = 'i')]
    interactive: bool,
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "forecast_sync=info,cache_sync=info,owm_client=info".into()
            }),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(secs) = cli.cache_secs {
        cfg.cache.timeout_secs = secs;
    }
    if let Some(raw) = cli.store.as_deref() {
        match config::parse_backend(raw) {
            Ok(backend) => cfg.store.backend = backend,
            Err(e) => {
                error!("Configuration error: {}", e);
                std::process::exit(1);
            }
        }
    }

    info!("API: {}", cfg.api_base_url);
    match cfg.store.backend {
        StoreBackend::Memory => info!("Store: memory"),
        StoreBackend::Sqlite => info!("Store: sqlite ({})", cfg.store.path.display()),
    }
    info!(
        "Cache: timeout={}s, serialize_per_place={}",
        cfg.cache.timeout_secs, cfg.cache.serialize_per_place
    );
    if cfg.api_key.is_empty() {
        info!("OWM_API_KEY is not set; requests are sent without an appid");
    }

    let store = match new_store(&cfg.store) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to open record store: {}", e);
            std::process::exit(1);
        }
    };
    let client = match OwmClient::from_config(&cfg) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build forecast client: {}", e);
            std::process::exit(1);
        }
    };

    let settings = CacheSettings::new(cfg.cache.timeout_secs);
    let sync = Arc::new(Synchronizer::new(
        store,
        Arc::new(client),
        settings,
        SyncOptions::from(&cfg.cache),
    ));
    let renderer = Renderer::new(cfg.units.clone(), cli.json);
    let count = cli.count.unwrap_or(cfg.default_count);

    let mut exit_code = 0;
    if let Some(place) = cli.place.as_deref() {
        let last = session::lookup(&sync, &renderer, place, count).await;
        if last.map_or(true, |state| state.error().is_some()) {
            exit_code = 1;
        }
        if !cli.interactive {
            std::process::exit(exit_code);
        }
    }

    if let Err(e) = session::run(sync, renderer, count).await {
        error!("Session error: {}", e);
        exit_code = 1;
    }
    std::process::exit(exit_code);
}
