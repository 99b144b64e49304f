//! Terminal presentation of forecast states.

use cache_sync::ForecastResource;
use chrono::DateTime;
use common::ForecastRecord;
use serde::Serialize;
use serde_json::json;

/// One display row, already formatted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastView {
    pub date: String,
    pub temperature: String,
    pub pressure: String,
    pub humidity: String,
    pub description: String,
}

fn unit_symbol(units: &str) -> &'static str {
    match units {
        "imperial" => "°F",
        "standard" => "K",
        _ => "°C",
    }
}

impl ForecastView {
    pub fn from_record(record: &ForecastRecord, units: &str) -> Self {
        let date = DateTime::from_timestamp(record.date, 0)
            .map(|d| d.format("%a, %d %b %Y").to_string())
            .unwrap_or_else(|| record.date.to_string());
        Self {
            date,
            temperature: format!("{:.0}{}", record.average_temperature, unit_symbol(units)),
            pressure: format!("{} hPa", record.pressure),
            humidity: format!("{}%", record.humidity),
            description: record.description.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    units: String,
    json: bool,
}

impl Renderer {
    pub fn new(units: impl Into<String>, json: bool) -> Self {
        Self {
            units: units.into(),
            json,
        }
    }

    pub fn views(&self, records: &[ForecastRecord]) -> Vec<ForecastView> {
        records
            .iter()
            .map(|r| ForecastView::from_record(r, &self.units))
            .collect()
    }

    /// Render one published state for `place`.
    pub fn render(&self, place: &str, state: &ForecastResource) -> String {
        if self.json {
            return self.render_json(place, state);
        }

        let mut out = String::new();
        match state {
            ForecastResource::Loading(_) => {
                out.push_str(&format!("⏳ Loading forecast for {place}…\n"));
            }
            ForecastResource::Error(_, err) => {
                out.push_str(&format!("⚠️  {err}\n"));
            }
            ForecastResource::Success(records) if records.is_empty() => {
                out.push_str(&format!("No forecast data for {place}\n"));
            }
            ForecastResource::Success(_) => {}
        }

        // Data carried by loading/error states is the last known forecast.
        for view in self.views(state.data()) {
            out.push_str(&format!(
                "  {:<17} {:>6}  {:>9}  {:>4}  {}\n",
                view.date, view.temperature, view.pressure, view.humidity, view.description
            ));
        }
        out
    }

    fn render_json(&self, place: &str, state: &ForecastResource) -> String {
        let value = json!({
            "place": place,
            "status": state.status(),
            "error": state.error().map(|e| e.to_string()),
            "forecast": self.views(state.data()),
        });
        format!("{value}\n")
    }
}
