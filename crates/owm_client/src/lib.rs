//! OpenWeatherMap daily forecast client.
//!
//! Issues `GET {base}/forecast/daily?q=<place>&cnt=<count>` and returns the
//! raw `list` items. Error bodies are parsed best-effort into
//! `Error::RemoteApi`.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use common::{ApiErrorBody, AppConfig, DailyForecastResponse, Error, ForecastFetcher, RawForecastItem};
use tracing::{debug, warn};

const DAILY_FORECAST_PATH: &str = "/forecast/daily";

/// OpenWeatherMap client with connection pooling.
#[derive(Debug, Clone)]
pub struct OwmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    units: String,
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    // Keep chained causes so DNS/TLS/socket failures are visible.
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

fn summarize_response_body(raw: &str) -> String {
    const MAX_CHARS: usize = 500;
    let compact = raw.replace(['\n', '\r'], " ");
    match compact.char_indices().nth(MAX_CHARS) {
        Some((idx, _)) => format!("{}…", &compact[..idx]),
        None => compact,
    }
}

/// Turn a non-2xx response body into an error.
///
/// A body shaped like `{ "cod", "message" }` becomes `RemoteApi`; anything
/// else falls back to a transport-level message.
pub fn parse_error_response(status: u16, body: &str) -> Error {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => Error::RemoteApi {
            status,
            code: parsed.cod,
            message: parsed.message,
        },
        Err(_) => Error::Transport(format!(
            "server returned HTTP {}: {}",
            status,
            summarize_response_body(body)
        )),
    }
}

impl OwmClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        units: impl Into<String>,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("forecast-sync/0.1")
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Transport(format_reqwest_error(&e)))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            api_key: api_key.into(),
            units: units.into(),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, Error> {
        Self::new(&cfg.api_base_url, cfg.api_key.clone(), cfg.units.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the daily forecast for `place`, `count` days.
    pub async fn get_daily_forecast(
        &self,
        place: &str,
        count: i64,
    ) -> Result<DailyForecastResponse, Error> {
        let url = format!("{}{}", self.base_url, DAILY_FORECAST_PATH);
        debug!("Fetching daily forecast: {} q={:?} cnt={}", url, place, count);

        let mut query = vec![("q", place.to_string()), ("cnt", count.to_string())];
        if !self.api_key.is_empty() {
            query.push(("appid", self.api_key.clone()));
        }
        if !self.units.is_empty() {
            query.push(("units", self.units.clone()));
        }

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Transport(format_reqwest_error(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = parse_error_response(status.as_u16(), &body);
            warn!("Forecast request for {:?} failed: {}", place, err);
            return Err(err);
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transport(format_reqwest_error(&e)))?;
        let data: DailyForecastResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Transport(format!("malformed forecast response for {:?}: {}", place, e))
        })?;

        debug!("Got {} forecast days for {:?}", data.list.len(), place);
        Ok(data)
    }
}

#[async_trait]
impl ForecastFetcher for OwmClient {
    async fn fetch(&self, place: &str, count: i64) -> Result<Vec<RawForecastItem>, Error> {
        Ok(self.get_daily_forecast(place, count).await?.list)
    }
}
