//! Configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the forecast API (without trailing slash).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// OpenWeatherMap application id.
    #[serde(default)]
    pub api_key: String,

    /// Units requested from the API ("metric", "imperial" or "standard").
    #[serde(default = "default_units")]
    pub units: String,

    /// Days requested when the caller does not pass a count.
    #[serde(default = "default_count")]
    pub default_count: i64,

    /// Cache freshness and synchronization settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Record store backend.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Freshness and synchronization parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Max age of a cached record before a refresh is needed (seconds).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Queue concurrent refreshes of the same place behind each other.
    #[serde(default)]
    pub serialize_per_place: bool,

    /// Per-place publisher channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Database file for the sqlite backend.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────

/// Cache-duration presets offered by the settings command (seconds, label).
pub const CACHE_DURATION_PRESETS: [(u64, &str); 3] =
    [(0, "No cache"), (3, "3 seconds"), (7, "7 seconds")];

fn default_api_base_url() -> String {
    "https://api.openweathermap.org/data/2.5".into()
}
fn default_units() -> String {
    "metric".into()
}
fn default_count() -> i64 {
    7
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_channel_capacity() -> usize {
    64
}
fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}
fn default_db_path() -> PathBuf {
    PathBuf::from("forecast-cache.sqlite3")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            serialize_per_place: false,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: String::new(),
            units: default_units(),
            default_count: default_count(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

// ── Runtime settings ──────────────────────────────────────────────────

/// Mutable cache-duration setting shared between the settings UI and the
/// synchronizer. Cloning shares the underlying value.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    timeout_secs: Arc<AtomicU64>,
}

impl CacheSettings {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_secs: Arc::new(AtomicU64::new(timeout_secs)),
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.load(Ordering::Relaxed)
    }

    pub fn set_timeout_secs(&self, secs: u64) {
        self.timeout_secs.store(secs, Ordering::Relaxed);
    }

    /// Label for the current value, if it matches a preset.
    pub fn preset_label(&self) -> Option<&'static str> {
        let current = self.timeout_secs();
        CACHE_DURATION_PRESETS
            .iter()
            .find(|(secs, _)| *secs == current)
            .map(|(_, label)| *label)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::new(default_timeout_secs())
    }
}
