//! Shared, injectable query cache used for identity and configuration.
//!
//! Each key holds one [`EntryState`]. Concurrent fetches of the same key collapse
//! into a single in-flight request: the first caller leads the fetch, later callers
//! wait on a `watch` channel for the leader's outcome. Every commit is checked against
//! the cache epoch (bumped by [`QueryCache::clear`]) and the flight id (bumped by
//! seeding or eviction), so a resolution that belongs to a torn-down session never
//! repopulates the cache.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ConsoleError, ConsoleResult};

pub mod config;
pub mod identity;

pub use config::{ConfigDomain, OrgConfig, RetryPolicy, ScopedConfigCache};
pub use identity::{IdentityCache, IdentityState};

#[derive(Debug, Clone, PartialEq)]
pub enum EntryState<V> {
    Absent,
    Loading,
    Ready(V),
    Errored(ConsoleError),
}

impl<V> EntryState<V> {
    pub fn is_loading(&self) -> bool { matches!(self, EntryState::Loading) }

    pub fn is_ready(&self) -> bool { matches!(self, EntryState::Ready(_)) }

    pub fn ready(&self) -> Option<&V> {
        match self {
            EntryState::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_ready(self) -> Option<V> {
        match self {
            EntryState::Ready(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent<K> {
    Updated(K),
    Invalidated(K),
    Evicted(K),
    Cleared,
}

struct Slot<V> {
    state: EntryState<V>,
    fetched_at: Option<Instant>,
    stale: bool,
    flight: u64,
    inflight: Option<watch::Receiver<Option<EntryState<V>>>>,
}

impl<V> Slot<V> {
    fn absent() -> Self { Self { state: EntryState::Absent, fetched_at: None, stale: false, flight: 0, inflight: None } }

    fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        if self.stale || !self.state.is_ready() {
            return false;
        }
        match (ttl, self.fetched_at) {
            (None, _) => true,
            (Some(ttl), Some(at)) => at.elapsed() < ttl,
            (Some(_), None) => false,
        }
    }
}

struct Inner<K, V> {
    name: &'static str,
    slots: Mutex<HashMap<K, Slot<V>>>,
    epoch: AtomicU64,
    next_flight: AtomicU64,
    events: broadcast::Sender<CacheEvent<K>>,
}

enum Claim<V> {
    Lead { tx: watch::Sender<Option<EntryState<V>>>, flight: u64, epoch: u64 },
    Follow(watch::Receiver<Option<EntryState<V>>>),
}

pub struct QueryCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for QueryCache<K, V> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<K, V> QueryCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                name,
                slots: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
                next_flight: AtomicU64::new(1),
                events,
            }),
        }
    }

    pub fn name(&self) -> &'static str { self.inner.name }

    pub fn epoch(&self) -> u64 { self.inner.epoch.load(Ordering::SeqCst) }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<K>> { self.inner.events.subscribe() }

    pub fn peek(&self, key: &K) -> EntryState<V> {
        self.inner.slots.lock().get(key).map(|s| s.state.clone()).unwrap_or(EntryState::Absent)
    }

    pub fn is_fresh(&self, key: &K, ttl: Option<Duration>) -> bool {
        self.inner.slots.lock().get(key).map(|s| s.is_fresh(ttl)).unwrap_or(false)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.inner.slots.lock().get(key).map(|s| s.inflight.is_some()).unwrap_or(false)
    }

    /// Store a value directly, superseding any fetch currently in flight for `key`.
    pub fn seed(&self, key: K, value: V) {
        {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(Slot::absent);
            slot.state = EntryState::Ready(value);
            slot.fetched_at = Some(Instant::now());
            slot.stale = false;
            slot.flight = self.inner.next_flight.fetch_add(1, Ordering::SeqCst);
            slot.inflight = None;
        }
        debug!(target: "console::cache", cache = self.inner.name, key = ?key, "seeded");
        let _ = self.inner.events.send(CacheEvent::Updated(key));
    }

    /// Keep the value but force the next read to refetch.
    pub fn invalidate(&self, key: &K) {
        let hit = {
            let mut slots = self.inner.slots.lock();
            match slots.get_mut(key) {
                Some(slot) => {
                    slot.stale = true;
                    true
                }
                None => false,
            }
        };
        if hit {
            let _ = self.inner.events.send(CacheEvent::Invalidated(key.clone()));
        }
    }

    pub fn evict(&self, key: &K) {
        let removed = self.inner.slots.lock().remove(key).is_some();
        if removed {
            debug!(target: "console::cache", cache = self.inner.name, key = ?key, "evicted");
            let _ = self.inner.events.send(CacheEvent::Evicted(key.clone()));
        }
    }

    /// Drop every entry and start a new epoch. Fetches still in flight will
    /// resolve into nothing.
    pub fn clear(&self) {
        {
            let mut slots = self.inner.slots.lock();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            slots.clear();
        }
        debug!(target: "console::cache", cache = self.inner.name, epoch = self.epoch(), "cleared");
        let _ = self.inner.events.send(CacheEvent::Cleared);
    }

    /// Return the cached value when fresh; otherwise run `fetcher`, or join the
    /// fetch already in flight for `key`. At most one fetch per key is outstanding.
    pub async fn fetch<F, Fut>(&self, key: K, ttl: Option<Duration>, fetcher: F) -> EntryState<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConsoleResult<V>>,
    {
        let mut fetcher = Some(fetcher);
        loop {
            match self.claim(&key, ttl) {
                Ok(hit) => return hit,
                Err(Claim::Follow(mut rx)) => {
                    debug!(target: "console::cache", cache = self.inner.name, key = ?key, "joining in-flight fetch");
                    let outcome = rx.wait_for(|v| v.is_some()).await.map(|v| v.clone());
                    match outcome {
                        Ok(Some(state)) => return state,
                        // Leader went away without an outcome; try again, possibly as leader.
                        _ => continue,
                    }
                }
                Err(Claim::Lead { tx, flight, epoch }) => {
                    let Some(f) = fetcher.take() else {
                        self.abandon(&key, flight);
                        return self.peek(&key);
                    };
                    let guard = FlightGuard { cache: self, key: &key, flight, armed: true };
                    let result = f().await;
                    let state = self.commit(&key, flight, epoch, result);
                    guard.disarm();
                    let _ = tx.send(Some(state.clone()));
                    return state;
                }
            }
        }
    }

    fn claim(&self, key: &K, ttl: Option<Duration>) -> Result<EntryState<V>, Claim<V>> {
        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(key.clone()).or_insert_with(Slot::absent);
        if slot.is_fresh(ttl) {
            debug!(target: "console::cache", cache = self.inner.name, key = ?key, "hit");
            return Ok(slot.state.clone());
        }
        if let Some(rx) = &slot.inflight {
            return Err(Claim::Follow(rx.clone()));
        }
        let (tx, rx) = watch::channel(None);
        let flight = self.inner.next_flight.fetch_add(1, Ordering::SeqCst);
        slot.flight = flight;
        slot.inflight = Some(rx);
        // A stale value stays visible while it is being refreshed.
        if !slot.state.is_ready() {
            slot.state = EntryState::Loading;
        }
        debug!(target: "console::cache", cache = self.inner.name, key = ?key, flight, "miss; fetching");
        Err(Claim::Lead { tx, flight, epoch: self.epoch() })
    }

    fn commit(&self, key: &K, flight: u64, epoch: u64, result: ConsoleResult<V>) -> EntryState<V> {
        let state = {
            let mut slots = self.inner.slots.lock();
            if self.epoch() != epoch {
                debug!(target: "console::cache", cache = self.inner.name, key = ?key, "discarding stale resolution (epoch changed)");
                return slots.get(key).map(|s| s.state.clone()).unwrap_or(EntryState::Absent);
            }
            let Some(slot) = slots.get_mut(key) else {
                debug!(target: "console::cache", cache = self.inner.name, key = ?key, "discarding resolution for evicted key");
                return EntryState::Absent;
            };
            if slot.flight != flight {
                debug!(target: "console::cache", cache = self.inner.name, key = ?key, "discarding superseded resolution");
                return slot.state.clone();
            }
            slot.inflight = None;
            match result {
                Ok(v) => {
                    slot.state = EntryState::Ready(v);
                    slot.fetched_at = Some(Instant::now());
                    slot.stale = false;
                }
                Err(e) => {
                    debug!(target: "console::cache", cache = self.inner.name, key = ?key, error = %e, "fetch failed");
                    slot.state = EntryState::Errored(e);
                    slot.fetched_at = None;
                }
            }
            slot.state.clone()
        };
        let _ = self.inner.events.send(CacheEvent::Updated(key.clone()));
        state
    }

    fn abandon(&self, key: &K, flight: u64) {
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            if slot.flight == flight {
                slot.inflight = None;
                if slot.state.is_loading() {
                    slot.state = EntryState::Absent;
                }
            }
        }
    }
}

/// Releases the in-flight marker if the leading caller is dropped mid-fetch.
struct FlightGuard<'a, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    cache: &'a QueryCache<K, V>,
    key: &'a K,
    flight: u64,
    armed: bool,
}

impl<K, V> FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn disarm(mut self) { self.armed = false; }
}

impl<K, V> Drop for FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn drop(&mut self) {
        if self.armed {
            self.cache.abandon(self.key, self.flight);
        }
    }
}
