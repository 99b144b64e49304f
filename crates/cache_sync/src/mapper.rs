//! Raw API items → cached records.

use common::{ForecastRecord, RawForecastItem};

/// Map one fetched day into a record for `place`, stamped with `fetched_at`.
pub fn map_record(place: &str, item: &RawForecastItem, fetched_at: i64) -> ForecastRecord {
    ForecastRecord {
        place: place.to_string(),
        date: item.dt,
        average_temperature: item.temp.day,
        pressure: item.pressure,
        humidity: item.humidity,
        description: item.description().to_string(),
        fetched_at,
    }
}

pub fn map_records(place: &str, items: &[RawForecastItem], fetched_at: i64) -> Vec<ForecastRecord> {
    items
        .iter()
        .map(|item| map_record(place, item, fetched_at))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DayTemp, WeatherDescription};

    fn item(dt: i64, day: f64, pressure: i64, humidity: i64, weather: &[&str]) -> RawForecastItem {
        RawForecastItem {
            dt,
            temp: DayTemp { day },
            pressure,
            humidity,
            weather: weather
                .iter()
                .map(|d| WeatherDescription {
                    description: d.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_maps_all_fields() {
        let raw = item(1584896400, 4.95, 1038, 63, &["overcast clouds"]);
        let record = map_record("new york", &raw, 1_700_000_000);

        assert_eq!(record.place, "new york");
        assert_eq!(record.date, 1584896400);
        assert!((record.average_temperature - 4.95).abs() < 1e-9);
        assert_eq!(record.pressure, 1038);
        assert_eq!(record.humidity, 63);
        assert_eq!(record.description, "overcast clouds");
        assert_eq!(record.fetched_at, 1_700_000_000);
    }

    #[test]
    fn test_place_is_copied_verbatim() {
        let raw = item(1588219524, 0.0, 0, 0, &[]);
        for place in ["Saigon", "", "!@)(NN  "] {
            assert_eq!(map_record(place, &raw, 0).place, place);
        }
    }

    #[test]
    fn test_negative_temperature() {
        let raw = item(1588219524, -15.0, 0, 0, &[]);
        assert_eq!(map_record("", &raw, 0).average_temperature, -15.0);

        let raw = item(1588219524, -20012.0, 0, 0, &[]);
        assert_eq!(map_record("", &raw, 0).average_temperature, -20012.0);
    }

    #[test]
    fn test_empty_weather_gives_empty_description() {
        let raw = item(1588219524, 0.0, 0, 0, &[]);
        assert_eq!(map_record("", &raw, 0).description, "");
    }

    #[test]
    fn test_first_weather_entry_wins() {
        let raw = item(1588219524, 0.0, 0, 0, &["light rain", "mist"]);
        assert_eq!(map_record("", &raw, 0).description, "light rain");
    }

    #[test]
    fn test_map_records_keeps_order() {
        let items = vec![item(3, 0.0, 0, 0, &[]), item(1, 0.0, 0, 0, &[])];
        let records = map_records("x", &items, 9);
        assert_eq!(records.iter().map(|r| r.date).collect::<Vec<_>>(), vec![3, 1]);
        assert!(records.iter().all(|r| r.fetched_at == 9));
    }
}
