//! Record store: place → ordered forecast records.
//!
//! Stores are blocking; the synchronizer calls them from tokio's blocking
//! pool. Every store keeps records ordered by ascending `date` and holds at
//! most one record per date for a place.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::config::{StoreBackend, StoreConfig};
use common::{Error, ForecastRecord};
use tokio::sync::watch;

mod memory;
#[cfg(feature = "store-sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "store-sqlite")]
pub use sqlite::SqliteStore;

/// Keyed forecast record storage.
pub trait RecordStore: Send + Sync {
    /// Records for `place` ordered by date; empty when nothing is cached.
    fn get_records(&self, place: &str) -> Result<Vec<ForecastRecord>, Error>;

    /// Observe `place`. The receiver holds the current set and is notified
    /// after every replace for that place.
    fn watch(&self, place: &str) -> Result<watch::Receiver<Vec<ForecastRecord>>, Error>;

    /// Whether the first `count` records for `place` exist and were all
    /// fetched at or after `cutoff`. Always true for `count <= 0`.
    fn has_fresh_data(&self, place: &str, count: i64, cutoff: i64) -> Result<bool, Error>;

    /// Atomically swap every record for `place` with `records`. Other places
    /// are untouched. Observers see the old set or the new set, never a mix.
    fn replace_all(&self, place: &str, records: Vec<ForecastRecord>) -> Result<(), Error>;
}

/// Store handle shared between the synchronizer and its blocking tasks.
pub type SharedStore = Arc<dyn RecordStore>;

/// Build the store selected by configuration.
pub fn new_store(cfg: &StoreConfig) -> Result<SharedStore, Error> {
    match cfg.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "store-sqlite")]
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&cfg.path)?)),
        #[cfg(not(feature = "store-sqlite"))]
        StoreBackend::Sqlite => Err(Error::Config(
            "store.backend = \"sqlite\" requires the store-sqlite feature".into(),
        )),
    }
}

/// Order a replacement batch by date, keep the last record for each date,
/// and pin every record to `place`.
pub(crate) fn normalize_batch(place: &str, records: Vec<ForecastRecord>) -> Vec<ForecastRecord> {
    let mut by_date: BTreeMap<i64, ForecastRecord> = BTreeMap::new();
    for mut record in records {
        if record.place != place {
            record.place = place.to_string();
        }
        by_date.insert(record.date, record);
    }
    by_date.into_values().collect()
}
