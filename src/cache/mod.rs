//! Time-to-live response cache
//!
//! [`TtlCache::get`] returns a stored value while it is younger than the TTL
//! and otherwise runs the supplied fetcher and stores its result. Expired
//! entries are refreshed lazily; nothing sweeps them in the background.
//!
//! By default two concurrent misses on the same key both run their fetcher.
//! [`TtlCache::with_single_flight`] adds a per-key async gate so at most one
//! fetch per key is in flight and the other callers reuse its result.
//!
//! Fetch errors are returned to the caller and never cached.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::clock::{default_clock, SharedClock};
use crate::config::CacheConfig;
use crate::error::Result;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

type Gates<K> = Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>;

/// A caller's reference to a per-key gate. Dropping it, on completion or
/// cancellation, removes the gate once no other caller holds it.
struct GateHandle<'a, K: Hash + Eq> {
    gates: &'a Gates<K>,
    key: K,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<'a, K: Hash + Eq + Clone> GateHandle<'a, K> {
    fn acquire(gates: &'a Gates<K>, key: &K) -> Self {
        let gate = lock(gates).entry(key.clone()).or_default().clone();
        Self {
            gates,
            key: key.clone(),
            gate,
        }
    }
}

impl<K: Hash + Eq> Drop for GateHandle<'_, K> {
    fn drop(&mut self) {
        let mut gates = lock(self.gates);
        // Only the map and this handle still reference the gate.
        if gates
            .get(&self.key)
            .is_some_and(|g| Arc::ptr_eq(g, &self.gate) && Arc::strong_count(g) == 2)
        {
            gates.remove(&self.key);
        }
    }
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
    gates: Option<Gates<K>>,
    clock: SharedClock,
}

impl<K, V> Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .field("single_flight", &self.gates.is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, false, default_clock())
    }

    /// Cache that runs at most one fetch per key at a time.
    pub fn with_single_flight(ttl: Duration) -> Self {
        Self::with_clock(ttl, true, default_clock())
    }

    pub fn with_clock(ttl: Duration, single_flight: bool, clock: SharedClock) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            gates: single_flight.then(|| Mutex::new(HashMap::new())),
            clock,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Ok(Self::with_clock(
            config.ttl()?,
            config.single_flight,
            default_clock(),
        ))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn fresh(&self, key: &K, now: Instant) -> Option<V> {
        let entries = lock(&self.entries);
        entries
            .get(key)
            .filter(|entry| now.saturating_duration_since(entry.inserted_at) < self.ttl)
            .map(|entry| entry.value.clone())
    }

    /// Return the cached value for `key`, or run `fetcher` and cache its result.
    pub async fn get<F, Fut, E>(&self, key: K, fetcher: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if let Some(value) = self.fresh(&key, self.clock.now()) {
            debug!("Cache hit: {:?}", key);
            return Ok(value);
        }

        let Some(gates) = &self.gates else {
            return self.fill(key, fetcher).await;
        };

        let gate = GateHandle::acquire(gates, &key);
        let _held = gate.gate.lock().await;
        match self.fresh(&key, self.clock.now()) {
            Some(value) => {
                debug!("Cache hit after waiting on in-flight fetch: {:?}", key);
                Ok(value)
            }
            None => self.fill(key.clone(), fetcher).await,
        }
    }

    async fn fill<F, Fut, E>(&self, key: K, fetcher: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        debug!("Cache miss: {:?}", key);
        let now = self.clock.now();
        let value = fetcher().await?;
        lock(&self.entries).insert(
            key,
            Entry {
                value: value.clone(),
                inserted_at: now,
            },
        );
        Ok(value)
    }

    /// Remove one entry, or every entry when `key` is `None`.
    pub fn clear(&self, key: Option<&K>) {
        let mut entries = lock(&self.entries);
        match key {
            Some(key) => {
                entries.remove(key);
            }
            None => entries.clear(),
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < self.ttl);
        before - entries.len()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a fetch-shaped lookup produced nothing to cache.
pub(crate) enum CacheMiss<E> {
    /// The governed call ended with "no result"
    Empty,
    Failed(E),
}

impl<E> CacheMiss<E> {
    pub(crate) fn from_outcome<V>(outcome: std::result::Result<Option<V>, E>) -> std::result::Result<V, Self> {
        match outcome {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(CacheMiss::Empty),
            Err(error) => Err(CacheMiss::Failed(error)),
        }
    }

    pub(crate) fn resolve<V>(result: std::result::Result<V, Self>) -> std::result::Result<Option<V>, E> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(CacheMiss::Empty) => Ok(None),
            Err(CacheMiss::Failed(error)) => Err(error),
        }
    }
}
