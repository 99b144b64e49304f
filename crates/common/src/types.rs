//! Domain types shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ── Cached records ────────────────────────────────────────────────────

/// One day's forecast for one place, as held by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub place: String,
    /// Forecast day, epoch seconds.
    pub date: i64,
    pub average_temperature: f64,
    pub pressure: i64,
    pub humidity: i64,
    #[serde(default)]
    pub description: String,
    /// Write time (epoch seconds), not the forecast date.
    pub fetched_at: i64,
}

impl ForecastRecord {
    /// Forecast day as a UTC timestamp, if `date` is in chrono's range.
    pub fn date_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }
}

// ── OpenWeatherMap wire types ─────────────────────────────────────────

/// Success body of `GET /forecast/daily`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DailyForecastResponse {
    #[serde(default)]
    pub list: Vec<RawForecastItem>,
}

/// A single day in the daily forecast list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawForecastItem {
    pub dt: i64,
    pub temp: DayTemp,
    #[serde(default)]
    pub pressure: i64,
    #[serde(default)]
    pub humidity: i64,
    #[serde(default)]
    pub weather: Vec<WeatherDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayTemp {
    pub day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDescription {
    #[serde(default)]
    pub description: String,
}

impl RawForecastItem {
    /// First weather description, or an empty string when there is none.
    pub fn description(&self) -> &str {
        self.weather
            .first()
            .map(|w| w.description.as_str())
            .unwrap_or("")
    }
}

/// Error body returned with non-2xx responses.
///
/// The API sends `cod` as a string on most errors but as a bare number on
/// some (e.g. 401), so both are accepted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiErrorBody {
    #[serde(deserialize_with = "string_or_number")]
    pub cod: String,
    pub message: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Int(i64),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Text(s) => s,
        Code::Int(n) => n.to_string(),
    })
}
