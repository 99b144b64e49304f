//! Per-key result fan-out.
//!
//! Each key owns a broadcast channel plus the last published state. Every
//! subscriber of a key receives every emission for that key in publish
//! order. `subscribe` additionally replays the last state first; the replay
//! and the live receiver are captured under the same lock, so nothing is
//! missed or delivered twice.
//!
//! A key that never had a state published is dropped again once its last
//! subscriber goes away. Published states are kept for replay.

use std::sync::{Arc, Mutex, Weak};

use common::Resource;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

struct KeyChannel<T> {
    latest: Mutex<Option<Resource<T>>>,
    tx: broadcast::Sender<Resource<T>>,
}

impl<T> KeyChannel<T> {
    fn new(capacity: usize) -> Self
    where
        T: Clone,
    {
        Self {
            latest: Mutex::new(None),
            tx: broadcast::channel(capacity).0,
        }
    }

    fn lock_latest(&self) -> std::sync::MutexGuard<'_, Option<Resource<T>>> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Inner<T> {
    channels: DashMap<String, KeyChannel<T>>,
    capacity: usize,
}

impl<T> Inner<T> {
    fn prune_idle(&self, key: &str) {
        self.channels.remove_if(key, |_, chan| {
            chan.tx.receiver_count() == 0 && chan.lock_latest().is_none()
        });
    }
}

/// Observable broadcast of `Resource<T>` states keyed by string.
pub struct ResultPublisher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ResultPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for ResultPublisher<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl<T: Clone + Send + 'static> ResultPublisher<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: DashMap::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Run `f` on the channel for `key` while holding its map shard, so
    /// pruning cannot interleave with a publish or subscribe.
    fn with_channel<R>(&self, key: &str, f: impl FnOnce(&KeyChannel<T>) -> R) -> R {
        let capacity = self.inner.capacity;
        let chan = self
            .inner
            .channels
            .entry(key.to_string())
            .or_insert_with(|| KeyChannel::new(capacity));
        f(&chan)
    }

    /// Record `state` as the latest for `key` and deliver it to subscribers.
    pub fn publish(&self, key: &str, state: Resource<T>) {
        self.with_channel(key, |chan| {
            let mut latest = chan.lock_latest();
            *latest = Some(state.clone());
            // No receivers is not an error; the state is still kept for replay.
            let _ = chan.tx.send(state);
        });
    }

    /// Subscribe to `key`, starting with the latest state if there is one.
    pub fn subscribe(&self, key: &str) -> Subscription<T> {
        let (replay, rx) = self.with_channel(key, |chan| {
            let latest = chan.lock_latest();
            (latest.clone(), chan.tx.subscribe())
        });
        self.subscription(key, replay, rx)
    }

    /// Subscribe to `key`, receiving only states published from now on.
    pub fn subscribe_updates(&self, key: &str) -> Subscription<T> {
        let rx = self.with_channel(key, |chan| {
            let _latest = chan.lock_latest();
            chan.tx.subscribe()
        });
        self.subscription(key, None, rx)
    }

    fn subscription(
        &self,
        key: &str,
        replay: Option<Resource<T>>,
        rx: broadcast::Receiver<Resource<T>>,
    ) -> Subscription<T> {
        Subscription {
            key: key.to_string(),
            replay,
            rx: Some(rx),
            publisher: Arc::downgrade(&self.inner),
        }
    }

    pub fn latest(&self, key: &str) -> Option<Resource<T>> {
        let chan = self.inner.channels.get(key)?;
        let latest = chan.lock_latest();
        latest.clone()
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .channels
            .get(key)
            .map(|chan| chan.tx.receiver_count())
            .unwrap_or(0)
    }
}

/// One subscriber's view of a key.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    key: String,
    replay: Option<Resource<T>>,
    rx: Option<broadcast::Receiver<Resource<T>>>,
    publisher: Weak<Inner<T>>,
}

impl<T> Subscription<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    /// Stop delivery to this subscriber. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.replay = None;
        let Some(rx) = self.rx.take() else {
            return;
        };
        drop(rx);
        if let Some(inner) = self.publisher.upgrade() {
            inner.prune_idle(&self.key);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T: Clone> Subscription<T> {
    /// Next state for the key. Returns `None` once unsubscribed.
    ///
    /// A subscriber that falls more than the channel capacity behind skips
    /// ahead to the oldest retained state.
    pub async fn recv(&mut self) -> Option<Resource<T>> {
        if let Some(state) = self.replay.take() {
            return Some(state);
        }
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(state) => return Some(state),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber for {:?} lagged, skipped {} states", self.key, skipped);
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Next state if one is already queued.
    pub fn try_recv(&mut self) -> Option<Resource<T>> {
        if let Some(state) = self.replay.take() {
            return Some(state);
        }
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(state) => return Some(state),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Subscriber for {:?} lagged, skipped {} states", self.key, skipped);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }
}
