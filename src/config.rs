//! Configuration loader — merges env vars, .env file, and config.toml.

use std::path::Path;

use common::config::{AppConfig, StoreBackend};
use common::Error;

fn parse_non_negative_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn parse_positive_i64(raw: &str, env_name: &str) -> Result<i64, Error> {
    let parsed = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed <= 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

pub fn parse_backend(raw: &str) -> Result<StoreBackend, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "memory" | "mem" => Ok(StoreBackend::Memory),
        "sqlite" => Ok(StoreBackend::Sqlite),
        _ => Err(Error::Config(
            "store backend must be one of: memory, sqlite".into(),
        )),
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    let base = config.api_base_url.trim();
    if base.is_empty() {
        issues.push("api_base_url must not be empty".into());
    } else if !(base.starts_with("http://") || base.starts_with("https://")) {
        issues.push("api_base_url must start with http:// or https://".into());
    }
    if config.default_count <= 0 {
        issues.push("default_count must be > 0".into());
    }
    if !matches!(config.units.as_str(), "metric" | "imperial" | "standard") {
        issues.push("units must be one of: metric, imperial, standard".into());
    }
    if config.cache.channel_capacity == 0 {
        issues.push("cache.channel_capacity must be > 0".into());
    }
    if config.store.backend == StoreBackend::Sqlite && config.store.path.as_os_str().is_empty() {
        issues.push("store.path is required for the sqlite backend".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply environment overrides. `lookup` is `std::env::var` in production.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("OWM_API_KEY") {
        config.api_key = key.trim().to_string();
    }
    if let Some(url) = lookup("OWM_BASE_URL") {
        config.api_base_url = url.trim().trim_end_matches('/').to_string();
    }
    if let Some(units) = lookup("FORECAST_UNITS") {
        config.units = units.trim().to_ascii_lowercase();
    }
    if let Some(raw) = lookup("FORECAST_DEFAULT_COUNT") {
        config.default_count = parse_positive_i64(&raw, "FORECAST_DEFAULT_COUNT")?;
    }
    if let Some(raw) = lookup("FORECAST_CACHE_TIMEOUT_SECS") {
        config.cache.timeout_secs = parse_non_negative_u64(&raw, "FORECAST_CACHE_TIMEOUT_SECS")?;
    }
    if let Some(raw) = lookup("FORECAST_SERIALIZE_PER_PLACE") {
        config.cache.serialize_per_place = parse_bool(&raw);
    }
    if let Some(raw) = lookup("FORECAST_STORE") {
        config.store.backend = parse_backend(&raw)?;
    }
    if let Some(path) = lookup("FORECAST_DB_PATH") {
        config.store.path = path.trim().into();
    }
    Ok(())
}

/// Load configuration from `.env`, an optional TOML file, and environment.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults, then the config file if there is one.
    let mut config = AppConfig::default();
    let path = config_path.unwrap_or_else(|| Path::new("config.toml"));
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    } else if config_path.is_some() {
        return Err(Error::Config(format!(
            "Config file {} does not exist",
            path.display()
        )));
    }

    // 3. Environment variables take priority.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;
    Ok(config)
}
