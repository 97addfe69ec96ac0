// # Caching Engine
//
// High-performance concurrent in-process cache with policy-driven
// eviction and monitoring.
//
// ## Overview
//
// The cache behaves as a thread-safe map from keys to values with:
//
// - **Bounded capacity**: entry-count or weight limits enforced by a
//   frequency-based admission policy over window/probation/protected
//   regions
// - **Expiration**: fixed after-write and after-access deadlines plus a
//   per-entry variable policy backed by a hierarchical timer wheel
// - **Refresh**: asynchronous, coalesced reloads of aging entries
// - **Notification**: a removal listener observing every departure with
//   its cause
// - **Statistics**: lock-free hit/miss/load/eviction counters
//
// ## Architecture
//
// ```text
// ┌─────────────────────────────────────────────────────────┐
// │                     Cache / LoadingCache                │
// │   get · put · compute · invalidate · iterate · stats    │
// └───────────────┬─────────────────────────┬───────────────┘
//                 │                         │
// ┌───────────────▼───────────┐ ┌───────────▼───────────────┐
// │   Striped hash table      │ │   Read / write buffers    │
// │   (per-stripe RwLock)     │ │   (lossy rings · MPSC)    │
// └───────────────────────────┘ └───────────┬───────────────┘
//                                           │ drain (single owner)
//                               ┌───────────▼───────────────┐
//                               │  Policy state             │
//                               │  regions · sketch · wheel │
//                               └───────────────────────────┘
// ```
//
// Reads touch the table and a ring buffer only; all ordering work is
// deferred to the drain, which one thread at a time performs on the
// configured executor.

pub mod builder;
pub(crate) mod core;
pub mod listener;
pub(crate) mod refresh;
pub mod stats;

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::{BoxError, Result};
use crate::map::{Entry, TableIter};

pub use builder::CacheBuilder;
pub use listener::{RemovalCause, RemovalListener};
pub use stats::CacheStats;

use self::core::CacheCore;

/// Per-entry cost function used with a weight bound.
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u32 + Send + Sync>;

/// Per-entry variable expiration policy.
///
/// Durations are relative to the moment of the triggering operation.
/// `Duration::ZERO` expires the entry immediately; any duration at or
/// beyond the eternal cutoff (`u64::MAX` nanoseconds) never expires.
/// The update and read hooks return `None` to leave the current
/// deadline unchanged.
pub trait Expiry<K, V>: Send + Sync + 'static {
    /// Lifetime granted when the entry is created.
    fn expire_after_create(&self, key: &K, value: &V) -> Duration;

    /// Revised lifetime after a value replacement.
    fn expire_after_update(&self, _key: &K, _value: &V) -> Option<Duration> {
        None
    }

    /// Revised lifetime after a read.
    fn expire_after_read(&self, _key: &K, _value: &V) -> Option<Duration> {
        None
    }
}

/// Computes values for read-through and refresh.
pub trait CacheLoader<K, V>: Send + Sync + 'static {
    fn load(&self, key: &K) -> std::result::Result<V, BoxError>;

    /// Reload an existing entry during refresh. Defaults to `load`.
    fn reload(&self, key: &K, _old_value: &V) -> std::result::Result<V, BoxError> {
        self.load(key)
    }
}

impl<K, V, F> CacheLoader<K, V> for F
where
    F: Fn(&K) -> std::result::Result<V, BoxError> + Send + Sync + 'static,
{
    fn load(&self, key: &K) -> std::result::Result<V, BoxError> {
        self(key)
    }
}

/// A concurrent in-process cache.
///
/// Handles are cheap to clone and share one underlying cache. All
/// operations are callable from any thread; none of them suspend.
pub struct Cache<K, V> {
    pub(crate) core: Arc<CacheCore<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache {
            core: Arc::clone(&self.core),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Start configuring a new cache.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    /// Look up a live value. Any borrowed form of the key works, so a
    /// `String`-keyed cache answers `&str` lookups.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.get(key)
    }

    /// Whether a live (unexpired) mapping exists. Does not count as an
    /// access and records no statistics.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.contains_key(key)
    }

    /// Whether any live entry maps to `value`. Linear in cache size.
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.core.contains_value(value)
    }

    /// Associate `value` with `key`, returning the previous live value.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.core.put(key, value, false)
    }

    /// Insert only when no live mapping exists; returns the existing
    /// value otherwise.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        self.core.put(key, value, true)
    }

    /// Insert every pair from `entries`.
    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    /// Replace the value only when a live mapping exists.
    pub fn replace(&self, key: &K, value: V) -> Option<V> {
        self.core.replace(key, value)
    }

    /// Replace the value only when it currently equals `expected`.
    pub fn replace_if(&self, key: &K, expected: &V, value: V) -> bool
    where
        V: PartialEq,
    {
        self.core.replace_if(key, expected, value)
    }

    /// Remove a mapping, returning the previous live value.
    pub fn invalidate<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.invalidate(key)
    }

    /// Remove the mapping only when its value equals `expected`.
    pub fn invalidate_if(&self, key: &K, expected: &V) -> bool
    where
        V: PartialEq,
    {
        self.core.invalidate_if_value(key, expected)
    }

    /// Remove every listed key.
    pub fn invalidate_iter(&self, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            self.invalidate(&key);
        }
    }

    /// Remove every entry.
    pub fn invalidate_all(&self) {
        self.core.invalidate_all();
    }

    /// Atomically remap the value for `key`. The function sees the
    /// current live value (or `None`) and its result is installed
    /// before any concurrent writer can interleave; returning `None`
    /// removes the mapping.
    ///
    /// Fails with `InvalidState` when invoked reentrantly from a user
    /// function already holding the same stripe.
    pub fn compute<F>(&self, key: K, remap: F) -> Result<Option<V>>
    where
        F: FnOnce(&K, Option<&V>) -> Option<V>,
    {
        self.core.compute(key, remap)
    }

    /// Compute and install a value only when absent; an existing live
    /// entry is returned untouched and counts as an access.
    pub fn compute_if_absent<F>(&self, key: K, map: F) -> Result<V>
    where
        F: FnOnce(&K) -> V,
    {
        self.core.compute_if_absent(key, map)
    }

    /// Remap only when a live mapping exists.
    pub fn compute_if_present<F>(&self, key: K, remap: F) -> Result<Option<V>>
    where
        F: FnOnce(&K, &V) -> Option<V>,
    {
        self.core.compute_if_present(key, remap)
    }

    /// Insert `value`, or combine it with the existing value.
    pub fn merge<F>(&self, key: K, value: V, remap: F) -> Result<Option<V>>
    where
        F: FnOnce(&V, V) -> Option<V>,
    {
        self.core.merge(key, value, remap)
    }

    /// Snapshot the live values for the given keys.
    pub fn get_all_present(&self, keys: impl IntoIterator<Item = K>) -> HashMap<K, V> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(&key) {
                out.insert(key, value);
            }
        }
        out
    }

    /// Approximate number of entries, including ones awaiting cleanup.
    pub fn estimated_size(&self) -> usize {
        self.core.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimated_size() == 0
    }

    /// Weakly consistent iteration over live entries. Mutations through
    /// the yielded views write through to the cache.
    pub fn iter(&self) -> CacheIter<'_, K, V> {
        CacheIter {
            core: &self.core,
            inner: TableIter::new(&self.core.table),
            now: self.core.ticker.read(),
        }
    }

    /// Snapshot of the live keys.
    pub fn keys(&self) -> Vec<K> {
        self.iter().map(|view| view.key().clone()).collect()
    }

    /// Snapshot of the live values.
    pub fn values(&self) -> Vec<V> {
        self.iter().map(|view| view.value()).collect()
    }

    /// Performance counters recorded since construction.
    pub fn stats(&self) -> CacheStats {
        self.core.stats_snapshot()
    }

    /// Run a full maintenance pass: apply buffered events, expire, and
    /// enforce the capacity bound. Blocks until the pass completes.
    pub fn clean_up(&self) {
        self.core.clean_up();
    }
}

/// A cache that loads missing values through a [`CacheLoader`].
pub struct LoadingCache<K, V> {
    pub(crate) cache: Cache<K, V>,
}

impl<K, V> Clone for LoadingCache<K, V> {
    fn clone(&self) -> Self {
        LoadingCache {
            cache: self.cache.clone(),
        }
    }
}

impl<K, V> std::ops::Deref for LoadingCache<K, V> {
    type Target = Cache<K, V>;

    fn deref(&self) -> &Cache<K, V> {
        &self.cache
    }
}

impl<K, V> LoadingCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Read through the loader: returns the cached value or loads,
    /// caches, and returns it. Loader errors propagate to the caller
    /// and leave the cache unchanged.
    pub fn get(&self, key: &K) -> Result<V> {
        self.cache.core.get_or_load(key)
    }

    /// Read through for every key, stopping at the first loader error.
    pub fn get_all(&self, keys: impl IntoIterator<Item = K>) -> Result<HashMap<K, V>> {
        let mut out = HashMap::new();
        for key in keys {
            let value = self.get(&key)?;
            out.insert(key, value);
        }
        Ok(out)
    }

    /// Asynchronously reload `key`, coalescing with any refresh already
    /// in flight. Readers observe the old value until the reload lands.
    pub fn refresh(&self, key: &K) {
        let core = &self.cache.core;
        let hash = core.table.hash_key(key);
        let observed = core.table.find(hash, key).map(|entry| entry.write_time());
        core.start_refresh(key.clone(), observed);
    }
}

/// A live view of one cache entry, yielded by [`Cache::iter`].
///
/// The view holds a weak back-reference to its cache: mutating through
/// a view after the cache was dropped is a no-op.
pub struct EntryView<K, V> {
    entry: Arc<Entry<K, V>>,
    core: Weak<CacheCore<K, V>>,
}

impl<K, V> EntryView<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &K {
        self.entry.key()
    }

    /// The entry's value at the time of the call.
    pub fn value(&self) -> V {
        self.entry.read_value()
    }

    /// Write through to the cache, replacing the mapping for this
    /// entry's key. Returns the previous live value.
    pub fn set_value(&self, value: V) -> Option<V> {
        let core = self.core.upgrade()?;
        core.put(self.key().clone(), value, false)
    }

    /// Remove this entry's key from the cache.
    pub fn invalidate(&self) -> Option<V> {
        let core = self.core.upgrade()?;
        core.invalidate(self.entry.key())
    }
}

/// Weakly consistent iterator over live entries.
pub struct CacheIter<'a, K, V> {
    core: &'a Arc<CacheCore<K, V>>,
    inner: TableIter<'a, K, V>,
    now: u64,
}

impl<K, V> Iterator for CacheIter<'_, K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Item = EntryView<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.inner.next()?;
            if entry.is_live() && !self.core.has_expired(&entry, self.now) {
                return Some(EntryView {
                    entry,
                    core: Arc::downgrade(self.core),
                });
            }
        }
    }
}
