//! Stale-while-revalidate synchronizer.
//!
//! `synchronize` walks one request through the state machine:
//!
//! ```text
//! Checking ─┬─ fresh ──────────────────────────────► Success(current)
//!           └─ stale ─► Loading(current) ─► fetch ─┬─► Success(new)
//!                                                   └─► Error(current, detail)
//! ```
//!
//! Every state is published under the place key. Failures never escape:
//! fetch and store errors become `Resource::Error` carrying the best data
//! known at that point.

use std::sync::Arc;

use chrono::Utc;
use common::config::CacheConfig;
use common::{CacheSettings, Error, ForecastFetcher, ForecastRecord, Resource};
use dashmap::DashMap;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::freshness::cutoff_for;
use crate::mapper::map_records;
use crate::publisher::{ResultPublisher, Subscription, DEFAULT_CHANNEL_CAPACITY};
use crate::store::{RecordStore, SharedStore};

pub type ForecastResource = Resource<Vec<ForecastRecord>>;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Queue requests for the same place behind a per-place lock. Off by
    /// default: overlapping refreshes of one place are allowed and the last
    /// replace wins.
    pub serialize_per_place: bool,
    /// Publisher channel capacity per place.
    pub channel_capacity: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            serialize_per_place: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl From<&CacheConfig> for SyncOptions {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            serialize_per_place: cfg.serialize_per_place,
            channel_capacity: cfg.channel_capacity,
        }
    }
}

pub struct Synchronizer {
    store: SharedStore,
    fetcher: Arc<dyn ForecastFetcher>,
    publisher: ResultPublisher<Vec<ForecastRecord>>,
    settings: CacheSettings,
    options: SyncOptions,
    place_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Synchronizer {
    pub fn new(
        store: SharedStore,
        fetcher: Arc<dyn ForecastFetcher>,
        settings: CacheSettings,
        options: SyncOptions,
    ) -> Self {
        Self {
            publisher: ResultPublisher::new(options.channel_capacity),
            store,
            fetcher,
            settings,
            options,
            place_locks: DashMap::new(),
        }
    }

    pub fn publisher(&self) -> &ResultPublisher<Vec<ForecastRecord>> {
        &self.publisher
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Observe every state published for `place`, starting with the latest.
    pub fn subscribe(&self, place: &str) -> Subscription<Vec<ForecastRecord>> {
        self.publisher.subscribe(place)
    }

    /// Cached records for `place`, read on the blocking pool.
    pub async fn records(&self, place: &str) -> Result<Vec<ForecastRecord>, Error> {
        let place = place.to_string();
        self.store_call(move |store| store.get_records(&place)).await
    }

    /// Observe raw store contents for `place`.
    pub fn watch_records(&self, place: &str) -> Result<watch::Receiver<Vec<ForecastRecord>>, Error> {
        self.store.watch(place)
    }

    /// Start a synchronization in the background and return immediately.
    ///
    /// The timeout is read from the runtime settings once, and `now` is the
    /// wall clock at the time of the call.
    pub fn request(self: &Arc<Self>, place: &str, count: i64) -> SyncHandle {
        let timeout_secs = i64::try_from(self.settings.timeout_secs()).unwrap_or(i64::MAX);
        let now = Utc::now().timestamp();
        let subscription = self.publisher.subscribe_updates(place);

        let this = Arc::clone(self);
        let key = place.to_string();
        let task = tokio::spawn(async move { this.synchronize(&key, count, timeout_secs, now).await });

        SyncHandle {
            subscription,
            task: Some(task),
            outcome: None,
        }
    }

    /// Run one synchronization for `place` and return its terminal state.
    pub async fn synchronize(
        &self,
        place: &str,
        count: i64,
        timeout_secs: i64,
        now: i64,
    ) -> ForecastResource {
        let _guard = if self.options.serialize_per_place {
            let lock = Arc::clone(&self.place_locks.entry(place.to_string()).or_default());
            Some(PlaceGuard {
                locks: &self.place_locks,
                place,
                guard: Some(lock.lock_owned().await),
            })
        } else {
            None
        };
        self.run(place, count, timeout_secs, now).await
    }

    /// Places with a live per-place lock entry.
    pub fn locked_places(&self) -> usize {
        self.place_locks.len()
    }

    async fn run(&self, place: &str, count: i64, timeout_secs: i64, now: i64) -> ForecastResource {
        let cutoff = cutoff_for(now, timeout_secs);

        let key = place.to_string();
        let fresh = match self
            .store_call(move |store| store.has_fresh_data(&key, count, cutoff))
            .await
        {
            Ok(fresh) => fresh,
            Err(e) => return self.emit(place, Resource::Error(Vec::new(), e)),
        };

        if fresh {
            debug!("Cache hit for {:?} (count={})", place, count);
            return match self.records(place).await {
                Ok(records) => self.emit(place, Resource::Success(records)),
                Err(e) => self.emit(place, Resource::Error(Vec::new(), e)),
            };
        }

        debug!("Cache miss for {:?} (count={})", place, count);
        let stale = match self.records(place).await {
            Ok(records) => records,
            Err(e) => return self.emit(place, Resource::Error(Vec::new(), e)),
        };
        self.emit(place, Resource::Loading(stale.clone()));

        match self.fetcher.fetch(place, count).await {
            Ok(items) => {
                let records = map_records(place, &items, now);
                let fetched = records.len();

                let key = place.to_string();
                if let Err(e) = self
                    .store_call(move |store| store.replace_all(&key, records))
                    .await
                {
                    warn!("Replace failed for {:?}: {}", place, e);
                    return self.emit(place, Resource::Error(stale, e));
                }
                info!("Cached {} forecast records for {:?}", fetched, place);

                match self.records(place).await {
                    Ok(records) => self.emit(place, Resource::Success(records)),
                    Err(e) => self.emit(place, Resource::Error(stale, e)),
                }
            }
            Err(e) => {
                warn!("Fetch failed for {:?}: {}", place, e);
                let current = match self.records(place).await {
                    Ok(records) => records,
                    Err(read_err) => {
                        warn!("Re-read after failed fetch for {:?} failed: {}", place, read_err);
                        stale
                    }
                };
                self.emit(place, Resource::Error(current, e))
            }
        }
    }

    fn emit(&self, place: &str, state: ForecastResource) -> ForecastResource {
        debug!(
            "Publishing {} for {:?} ({} records)",
            state.status(),
            place,
            state.data().len()
        );
        self.publisher.publish(place, state.clone());
        state
    }

    /// Run a store call on the blocking pool. The closure runs to completion
    /// even if the calling task is aborted.
    async fn store_call<R, F>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&dyn RecordStore) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| Error::Store(format!("store task failed: {e}")))?
    }
}

/// Holds a place's lock and drops the map entry once nobody else holds or
/// waits on it.
struct PlaceGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    place: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PlaceGuard<'_> {
    fn drop(&mut self) {
        // Release first so the guard's own reference is gone.
        self.guard.take();
        self.locks
            .remove_if(self.place, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn join_error(err: JoinError) -> Error {
    if err.is_cancelled() {
        Error::Other("synchronization was cancelled".into())
    } else {
        Error::Other(format!("synchronization task failed: {err}"))
    }
}

/// Caller's handle on a background synchronization.
///
/// Yields the place's states published after the request was made. Dropping
/// or cancelling the handle detaches from the task without stopping it.
pub struct SyncHandle {
    subscription: Subscription<Vec<ForecastRecord>>,
    task: Option<JoinHandle<ForecastResource>>,
    outcome: Option<Result<ForecastResource, Error>>,
}

impl SyncHandle {
    pub fn place(&self) -> &str {
        self.subscription.key()
    }

    /// Next published state. Returns `None` after cancellation, or once the
    /// task has finished and every state it published has been delivered.
    pub async fn next(&mut self) -> Option<ForecastResource> {
        loop {
            if let Some(state) = self.subscription.try_recv() {
                return Some(state);
            }
            let task = self.task.as_mut()?;
            let joined = tokio::select! {
                biased;
                state = self.subscription.recv() => return state,
                joined = task => joined,
            };
            self.task = None;
            self.outcome = Some(joined.map_err(join_error));
        }
    }

    /// Stop delivery to this handle and detach from the task. The
    /// synchronization still runs to its terminal state for every other
    /// subscriber of the place. Safe to call more than once.
    pub fn cancel(&mut self) {
        if self.task.take().is_some() {
            self.outcome = Some(Err(Error::Other("synchronization was cancelled".into())));
        }
        self.subscription.unsubscribe();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait for the terminal state of this synchronization.
    pub async fn finish(mut self) -> Result<ForecastResource, Error> {
        if let Some(task) = self.task.take() {
            return task.await.map_err(join_error);
        }
        self.outcome
            .take()
            .unwrap_or_else(|| Err(Error::Other("synchronization was cancelled".into())))
    }
}
