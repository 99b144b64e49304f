//! Stale-while-revalidate forecast cache.
//!
//! Decides whether the record store is fresh enough for a place, refreshes it
//! from a remote fetcher when it is not, and publishes every state change
//! (`Loading`, `Success`, `Error`) to per-place subscribers.

pub mod freshness;
pub mod mapper;
pub mod publisher;
pub mod store;
pub mod synchronizer;

pub use freshness::{cutoff_for, is_fresh};
pub use mapper::{map_record, map_records};
pub use publisher::{ResultPublisher, Subscription};
pub use store::{new_store, MemoryStore, RecordStore, SharedStore};
#[cfg(feature = "store-sqlite")]
pub use store::SqliteStore;
pub use synchronizer::{ForecastResource, SyncHandle, SyncOptions, Synchronizer};
