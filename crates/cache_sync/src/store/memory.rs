//! In-memory record store.
//!
//! Each place owns a `watch` channel whose current value *is* the cached
//! record set, so a replace is a single `send_replace` and every observer
//! sees it atomically. `DashMap` shards keep different places from
//! contending with each other.

use common::{Error, ForecastRecord};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use super::{normalize_batch, RecordStore};
use crate::freshness::is_fresh;

#[derive(Debug, Default)]
pub struct MemoryStore {
    places: DashMap<String, watch::Sender<Vec<ForecastRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of places that have ever been written or watched.
    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn get_records(&self, place: &str) -> Result<Vec<ForecastRecord>, Error> {
        Ok(self
            .places
            .get(place)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default())
    }

    fn watch(&self, place: &str) -> Result<watch::Receiver<Vec<ForecastRecord>>, Error> {
        let tx = self
            .places
            .entry(place.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0);
        Ok(tx.subscribe())
    }

    fn has_fresh_data(&self, place: &str, count: i64, cutoff: i64) -> Result<bool, Error> {
        Ok(match self.places.get(place) {
            Some(tx) => is_fresh(&tx.borrow(), count, cutoff),
            None => is_fresh(&[], count, cutoff),
        })
    }

    fn replace_all(&self, place: &str, records: Vec<ForecastRecord>) -> Result<(), Error> {
        let records = normalize_batch(place, records);
        debug!("Replacing {} records for {:?}", records.len(), place);

        let tx = self
            .places
            .entry(place.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0);
        tx.send_replace(records);
        Ok(())
    }
}
