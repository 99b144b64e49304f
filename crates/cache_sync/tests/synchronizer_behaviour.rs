//! End-to-end behaviour of the synchronizer against scripted fetchers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cache_sync::{
    map_records, ForecastResource, MemoryStore, RecordStore, SharedStore, SyncOptions,
    Synchronizer,
};
use common::{
    CacheSettings, DayTemp, Error, ForecastFetcher, ForecastRecord, RawForecastItem, Resource,
    WeatherDescription,
};
use tokio::sync::{watch, Notify};

const NOW: i64 = 1_588_300_000;
const TIMEOUT: i64 = 5;

// ── Fixtures ──────────────────────────────────────────────────────────

fn raw_item(dt: i64, day: f64, pressure: i64, humidity: i64, description: &str) -> RawForecastItem {
    RawForecastItem {
        dt,
        temp: DayTemp { day },
        pressure,
        humidity,
        weather: vec![WeatherDescription {
            description: description.into(),
        }],
    }
}

fn raw_days(n: i64) -> Vec<RawForecastItem> {
    (0..n)
        .map(|i| raw_item(1_588_219_200 + i * 86_400, 31.0 + i as f64, 1008, 65, "light rain"))
        .collect()
}

fn stored(place: &str, n: i64, fetched_at: i64) -> Vec<ForecastRecord> {
    (0..n)
        .map(|i| ForecastRecord {
            place: place.into(),
            date: 1_500_000_000 + i * 86_400,
            average_temperature: 10.0,
            pressure: 1000,
            humidity: 40,
            description: "old".into(),
            fetched_at,
        })
        .collect()
}

/// Fetcher that plays back queued responses and counts calls.
#[derive(Default)]
struct ScriptedFetcher {
    calls: AtomicUsize,
    responses: Mutex<VecDeque<Result<Vec<RawForecastItem>, Error>>>,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedFetcher {
    fn with(responses: Vec<Result<Vec<RawForecastItem>, Error>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForecastFetcher for ScriptedFetcher {
    async fn fetch(&self, _place: &str, _count: i64) -> Result<Vec<RawForecastItem>, Error> {
        if let Some(gate) = &self.gate {
            // Register before counting so a test that saw the call can
            // release the gate without racing the wait.
            let notified = gate.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.calls.fetch_add(1, Ordering::SeqCst);
            notified.await;
        } else {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transport("no scripted response".into())))
    }
}

/// Memory store whose writes, or reads past a budget, can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_replace: bool,
    reads_allowed: Option<usize>,
    reads: AtomicUsize,
}

impl RecordStore for FlakyStore {
    fn get_records(&self, place: &str) -> Result<Vec<ForecastRecord>, Error> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.reads_allowed.is_some_and(|allowed| read >= allowed) {
            return Err(Error::Store("database is locked".into()));
        }
        self.inner.get_records(place)
    }

    fn watch(&self, place: &str) -> Result<watch::Receiver<Vec<ForecastRecord>>, Error> {
        self.inner.watch(place)
    }

    fn has_fresh_data(&self, place: &str, count: i64, cutoff: i64) -> Result<bool, Error> {
        self.inner.has_fresh_data(place, count, cutoff)
    }

    fn replace_all(&self, place: &str, records: Vec<ForecastRecord>) -> Result<(), Error> {
        if self.fail_replace {
            return Err(Error::Store("disk full".into()));
        }
        self.inner.replace_all(place, records)
    }
}

fn build(store: SharedStore, fetcher: Arc<ScriptedFetcher>) -> Arc<Synchronizer> {
    Arc::new(Synchronizer::new(
        store,
        fetcher,
        CacheSettings::new(TIMEOUT as u64),
        SyncOptions::default(),
    ))
}

fn drain(sub: &mut cache_sync::Subscription<Vec<ForecastRecord>>) -> Vec<ForecastResource> {
    let mut states = Vec::new();
    while let Some(state) = sub.try_recv() {
        states.push(state);
    }
    states
}

// ── Freshness decisions ───────────────────────────────────────────────

#[tokio::test]
async fn test_fresh_hit_emits_single_success_without_fetch() {
    let store = Arc::new(MemoryStore::new());
    store.replace_all("hanoi", stored("hanoi", 7, NOW - 2)).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let sync = build(store, fetcher.clone());
    let mut sub = sync.publisher().subscribe_updates("hanoi");

    let result = sync.synchronize("hanoi", 7, TIMEOUT, NOW).await;

    assert_eq!(result, Resource::Success(stored("hanoi", 7, NOW - 2)));
    assert_eq!(drain(&mut sub), vec![result]);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_stale_records_trigger_loading_then_fetch() {
    let store = Arc::new(MemoryStore::new());
    let old = stored("hanoi", 7, NOW - 60);
    store.replace_all("hanoi", old.clone()).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(7))]));
    let sync = build(store.clone(), fetcher.clone());
    let mut sub = sync.publisher().subscribe_updates("hanoi");

    let result = sync.synchronize("hanoi", 7, TIMEOUT, NOW).await;

    let states = drain(&mut sub);
    assert_eq!(states.len(), 2);
    assert_eq!(states[0], Resource::Loading(old));
    assert!(states[1].is_success());
    assert_eq!(states[1], result);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_too_few_records_trigger_fetch() {
    let store = Arc::new(MemoryStore::new());
    store.replace_all("hue", stored("hue", 3, NOW)).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(7))]));
    let sync = build(store, fetcher.clone());

    let result = sync.synchronize("hue", 7, TIMEOUT, NOW).await;

    assert!(result.is_success());
    assert_eq!(result.data().len(), 7);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_non_positive_count_never_fetches() {
    let store = Arc::new(MemoryStore::new());
    store.replace_all("dalat", stored("dalat", 2, 0)).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(7))]));
    let sync = build(store, fetcher.clone());

    assert_eq!(
        sync.synchronize("nowhere", 0, TIMEOUT, NOW).await,
        Resource::Success(Vec::new())
    );
    assert_eq!(
        sync.synchronize("dalat", -4, TIMEOUT, NOW).await,
        Resource::Success(stored("dalat", 2, 0))
    );
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_empty_place_is_an_ordinary_key() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(2))]));
    let sync = build(store.clone(), fetcher.clone());

    let result = sync.synchronize("", 2, TIMEOUT, NOW).await;

    assert!(result.is_success());
    assert!(store.get_records("").unwrap().iter().all(|r| r.place.is_empty()));
}

// ── Refresh outcomes ──────────────────────────────────────────────────

#[tokio::test]
async fn test_saigon_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(7))]));
    let sync = build(store.clone(), fetcher.clone());
    let mut sub = sync.publisher().subscribe_updates("saigon");

    sync.synchronize("saigon", 7, TIMEOUT, NOW).await;

    let states = drain(&mut sub);
    assert_eq!(states.len(), 2);
    assert_eq!(states[0], Resource::Loading(Vec::new()));
    let Resource::Success(records) = &states[1] else {
        panic!("expected success, got {:?}", states[1]);
    };
    assert_eq!(records.len(), 7);
    assert!(records.iter().all(|r| r.place == "saigon" && r.fetched_at == NOW));

    // Within the timeout the cache answers alone.
    let again = sync.synchronize("saigon", 7, TIMEOUT, NOW + 3).await;
    assert_eq!(drain(&mut sub), vec![again.clone()]);
    assert_eq!(again, Resource::Success(records.clone()));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_fetched_items_are_mapped_and_stamped() {
    let store = Arc::new(MemoryStore::new());
    let item = raw_item(1584896400, 4.95, 1038, 63, "overcast clouds");
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(vec![item])]));
    let sync = build(store, fetcher);

    let result = sync.synchronize("new york", 1, TIMEOUT, NOW).await;

    assert_eq!(
        result,
        Resource::Success(vec![ForecastRecord {
            place: "new york".into(),
            date: 1584896400,
            average_temperature: 4.95,
            pressure: 1038,
            humidity: 63,
            description: "overcast clouds".into(),
            fetched_at: NOW,
        }])
    );
}

#[tokio::test]
async fn test_replace_drops_previous_records() {
    let store = Arc::new(MemoryStore::new());
    store.replace_all("hanoi", stored("hanoi", 10, 0)).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(3))]));
    let sync = build(store.clone(), fetcher);

    sync.synchronize("hanoi", 3, TIMEOUT, NOW).await;

    let records = store.get_records("hanoi").unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.description == "light rain" && r.fetched_at == NOW));
}

#[tokio::test]
async fn test_replace_leaves_other_places_alone() {
    let store = Arc::new(MemoryStore::new());
    store.replace_all("a", stored("a", 2, 0)).unwrap();
    store.replace_all("b", stored("b", 4, 0)).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(7))]));
    let sync = build(store.clone(), fetcher);

    sync.synchronize("a", 7, TIMEOUT, NOW).await;

    assert_eq!(store.get_records("a").unwrap().len(), 7);
    assert_eq!(store.get_records("b").unwrap(), stored("b", 4, 0));
}

#[tokio::test]
async fn test_city_not_found_for_unseeded_place() {
    let store = Arc::new(MemoryStore::new());
    let not_found = Error::RemoteApi {
        status: 404,
        code: "404".into(),
        message: "city not found".into(),
    };
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Err(not_found.clone())]));
    let sync = build(store.clone(), fetcher);
    let mut sub = sync.publisher().subscribe_updates("atlantis");

    let result = sync.synchronize("atlantis", 7, TIMEOUT, NOW).await;

    assert_eq!(result, Resource::Error(Vec::new(), not_found));
    let states = drain(&mut sub);
    assert_eq!(states, vec![Resource::Loading(Vec::new()), result]);
    assert!(store.get_records("atlantis").unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_fetch_keeps_stale_data_and_store() {
    let store = Arc::new(MemoryStore::new());
    let old = stored("hanoi", 7, NOW - 600);
    store.replace_all("hanoi", old.clone()).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Err(Error::Transport(
        "connection refused".into(),
    ))]));
    let sync = build(store.clone(), fetcher);

    let result = sync.synchronize("hanoi", 7, TIMEOUT, NOW).await;

    assert_eq!(
        result,
        Resource::Error(old.clone(), Error::Transport("connection refused".into()))
    );
    assert_eq!(store.get_records("hanoi").unwrap(), old);
}

#[tokio::test]
async fn test_store_failure_becomes_error_state() {
    let inner = MemoryStore::new();
    let old = stored("hanoi", 2, 0);
    inner.replace_all("hanoi", old.clone()).unwrap();
    let store = Arc::new(FlakyStore {
        inner,
        fail_replace: true,
        ..Default::default()
    });
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(7))]));
    let sync = build(store.clone(), fetcher);

    let result = sync.synchronize("hanoi", 7, TIMEOUT, NOW).await;

    assert_eq!(result, Resource::Error(old.clone(), Error::Store("disk full".into())));
    assert_eq!(store.get_records("hanoi").unwrap(), old);
}

#[tokio::test]
async fn test_failed_reread_after_failed_fetch_keeps_stale_snapshot() {
    let inner = MemoryStore::new();
    let old = stored("hanoi", 2, 0);
    inner.replace_all("hanoi", old.clone()).unwrap();
    // The stale read before the fetch succeeds, the re-read after it fails.
    let store = Arc::new(FlakyStore {
        inner,
        reads_allowed: Some(1),
        ..Default::default()
    });
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Err(Error::Transport(
        "connection reset".into(),
    ))]));
    let sync = build(store, fetcher);

    let result = sync.synchronize("hanoi", 7, TIMEOUT, NOW).await;

    assert_eq!(
        result,
        Resource::Error(old, Error::Transport("connection reset".into()))
    );
}

#[cfg(feature = "store-sqlite")]
#[tokio::test]
async fn test_sqlite_store_end_to_end() {
    let store = Arc::new(cache_sync::SqliteStore::open_in_memory().unwrap());
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(7))]));
    let sync = build(store.clone(), fetcher.clone());

    let first = sync.synchronize("saigon", 7, TIMEOUT, NOW).await;
    let second = sync.synchronize("saigon", 7, TIMEOUT, NOW + TIMEOUT).await;

    assert!(first.is_success());
    assert_eq!(first, second);
    assert_eq!(fetcher.calls(), 1);
}

// ── Background requests ───────────────────────────────────────────────

#[tokio::test]
async fn test_request_streams_states_and_finishes() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(7))]));
    let sync = build(store, fetcher);

    let mut handle = sync.request("saigon", 7);
    assert_eq!(handle.place(), "saigon");

    let first = handle.next().await.expect("loading state");
    assert_eq!(first, Resource::Loading(Vec::new()));
    let second = handle.next().await.expect("terminal state");
    assert!(second.is_success());
    assert_eq!(handle.next().await, None);
    assert!(handle.is_finished());

    assert_eq!(handle.finish().await.unwrap(), second);
}

#[tokio::test]
async fn test_late_subscriber_sees_latest_state() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(3))]));
    let sync = build(store, fetcher);

    let result = sync.request("hue", 3).finish().await.unwrap();

    let mut late = sync.subscribe("hue");
    assert_eq!(late.recv().await, Some(result));
}

#[tokio::test]
async fn test_cancel_detaches_only_the_cancelling_caller() {
    let store = Arc::new(MemoryStore::new());
    let old = stored("hanoi", 1, 0);
    store.replace_all("hanoi", old.clone()).unwrap();
    let gate = Arc::new(Notify::new());
    let fetcher = Arc::new(ScriptedFetcher {
        responses: Mutex::new(vec![Ok(raw_days(7))].into()),
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let sync = build(store.clone(), fetcher.clone());
    let mut observer = sync.subscribe("hanoi");

    let mut handle = sync.request("hanoi", 7);
    assert_eq!(handle.next().await, Some(Resource::Loading(old.clone())));
    while fetcher.calls() == 0 {
        tokio::task::yield_now().await;
    }

    handle.cancel();
    handle.cancel();
    gate.notify_waiters();

    assert_eq!(handle.next().await, None);
    assert!(handle.is_finished());
    assert!(handle.finish().await.is_err());

    // Everyone else still sees the refresh through to its terminal state.
    assert_eq!(observer.recv().await, Some(Resource::Loading(old)));
    let terminal = observer.recv().await.expect("terminal state");
    assert!(terminal.is_success());
    assert_eq!(terminal.data().len(), 7);
    assert_eq!(sync.publisher().latest("hanoi"), Some(terminal.clone()));
    assert_eq!(sync.subscribe("hanoi").recv().await, Some(terminal.clone()));
    assert_eq!(store.get_records("hanoi").unwrap(), *terminal.data());
}

#[tokio::test]
async fn test_different_places_run_concurrently() {
    let store = Arc::new(MemoryStore::new());
    let gate = Arc::new(Notify::new());
    let fetcher = Arc::new(ScriptedFetcher {
        responses: Mutex::new(vec![Ok(raw_days(1)), Ok(raw_days(1))].into()),
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let sync = build(store, fetcher.clone());

    let a = sync.request("a", 1);
    let b = sync.request("b", 1);
    // Both fetches are in flight at once.
    while fetcher.calls() < 2 {
        tokio::task::yield_now().await;
    }
    gate.notify_waiters();

    assert!(a.finish().await.unwrap().is_success());
    assert!(b.finish().await.unwrap().is_success());
}

#[tokio::test]
async fn test_serialized_requests_share_one_fetch() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher {
        responses: Mutex::new(vec![Ok(raw_days(7))].into()),
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    });
    let sync = Synchronizer::new(
        store,
        fetcher.clone(),
        CacheSettings::new(TIMEOUT as u64),
        SyncOptions {
            serialize_per_place: true,
            ..Default::default()
        },
    );

    let (first, second) = tokio::join!(
        sync.synchronize("saigon", 7, TIMEOUT, NOW),
        sync.synchronize("saigon", 7, TIMEOUT, NOW),
    );

    assert!(first.is_success());
    assert_eq!(first, second);
    assert_eq!(fetcher.calls(), 1);
}

fn batch(first_day: i64, n: i64, description: &str) -> Vec<RawForecastItem> {
    (0..n)
        .map(|i| raw_item(first_day + i * 86_400, 20.0 + i as f64, 1010, 70, description))
        .collect()
}

/// Two unserialized refreshes of one place race; the store must end up with
/// exactly one of the two batches.
async fn overlapping_refreshes_keep_one_whole_batch(store: SharedStore) {
    let first = batch(1_588_219_200, 7, "light rain");
    let second = batch(1_588_305_600, 4, "clear sky");
    let fetcher = Arc::new(ScriptedFetcher {
        responses: Mutex::new(vec![Ok(first.clone()), Ok(second.clone())].into()),
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    });
    let sync = build(store.clone(), fetcher.clone());

    let (a, b) = tokio::join!(
        sync.synchronize("saigon", 7, TIMEOUT, NOW),
        sync.synchronize("saigon", 7, TIMEOUT, NOW),
    );

    assert_eq!(fetcher.calls(), 2);
    assert!(a.is_success());
    assert!(b.is_success());

    let kept = store.get_records("saigon").unwrap();
    let from_first = map_records("saigon", &first, NOW);
    let from_second = map_records("saigon", &second, NOW);
    assert!(
        kept == from_first || kept == from_second,
        "store holds a mix of both batches: {kept:?}"
    );
}

#[tokio::test]
async fn test_overlapping_refreshes_memory_store() {
    overlapping_refreshes_keep_one_whole_batch(Arc::new(MemoryStore::new())).await;
}

#[cfg(feature = "store-sqlite")]
#[tokio::test]
async fn test_overlapping_refreshes_sqlite_store() {
    let store = cache_sync::SqliteStore::open_in_memory().unwrap();
    overlapping_refreshes_keep_one_whole_batch(Arc::new(store)).await;
}

#[tokio::test]
async fn test_runtime_timeout_setting_is_read_per_request() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(2)), Ok(raw_days(2))]));
    let sync = build(store, fetcher.clone());

    sync.request("hue", 2).finish().await.unwrap();
    sync.request("hue", 2).finish().await.unwrap();
    assert_eq!(fetcher.calls(), 1);

    // "No cache": every request refreshes.
    sync.settings().set_timeout_secs(0);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    sync.request("hue", 2).finish().await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_watch_records_follows_refresh() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with(vec![Ok(raw_days(4))]));
    let sync = build(store, fetcher);

    let mut rx = sync.watch_records("hue").unwrap();
    assert!(rx.borrow().is_empty());

    sync.synchronize("hue", 4, TIMEOUT, NOW).await;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().len(), 4);
    assert_eq!(sync.records("hue").await.unwrap().len(), 4);
}
