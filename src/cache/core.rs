// # Cache Core
//
// Orchestrates the table, buffers, and policy state. Operations follow
// one discipline: table work happens under a single stripe lock with
// the matching write event enqueued before the lock is released (per-key
// event order equals real-time order), and maintenance is only ever
// triggered after every lock is dropped.
//
// The drain is single-owner. Scheduled passes take the policy mutex
// opportunistically and walk away when it is busy; `clean_up` insists
// and blocks until a full pass has run.

use std::borrow::Borrow;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::builder::{CacheBuilder, DEFAULT_INITIAL_CAPACITY};
use crate::cache::listener::{self, RemovalCause, RemovalListener};
use crate::cache::refresh::RefreshCoordinator;
use crate::cache::stats::{CacheStats, StatsCounter};
use crate::cache::{CacheLoader, Expiry, Weigher};
use crate::common::{Executor, Scheduler, Ticker};
use crate::error::{CacheError, Result};
use crate::map::{Entry, StripedTable, ETERNAL};
use crate::maintenance::{DrainStatus, Offer, ReadBuffer, WriteBuffer, WriteEvent};
use crate::policy::PolicyState;

type Notification<K, V> = (K, V, RemovalCause);

pub(crate) struct CacheCore<K, V> {
    pub(crate) table: StripedTable<K, V>,
    policy: Mutex<PolicyState<K, V>>,
    read_buffer: ReadBuffer<Arc<Entry<K, V>>>,
    write_buffer: WriteBuffer<K, V>,
    drain_status: DrainStatus,
    stats: StatsCounter,
    pub(crate) ticker: Arc<dyn Ticker>,
    executor: Arc<dyn Executor>,
    scheduler: Option<Arc<dyn Scheduler>>,
    wakeup_armed: AtomicBool,
    weigher: Option<Weigher<K, V>>,
    expiry: Option<Arc<dyn Expiry<K, V>>>,
    listener: Option<RemovalListener<K, V>>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    refresh: RefreshCoordinator<K>,
    expire_after_write_nanos: Option<u64>,
    expire_after_access_nanos: Option<u64>,
    refresh_after_write_nanos: Option<u64>,
}

/// Absolute deadline for a relative duration, saturating to eternal.
fn deadline_after(now: u64, duration: Duration) -> u64 {
    let nanos = duration.as_nanos();
    if nanos >= u128::from(ETERNAL) {
        ETERNAL
    } else {
        now.saturating_add(nanos as u64)
    }
}

impl<K, V> CacheCore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_builder(
        builder: CacheBuilder<K, V>,
        loader: Option<Arc<dyn CacheLoader<K, V>>>,
    ) -> Self {
        let maximum = builder.maximum_size.or(builder.maximum_weight);
        let now = builder.ticker.read();
        let expire_after_write_nanos = builder.expire_after_write.map(|d| d.as_nanos() as u64);
        let expire_after_access_nanos = builder.expire_after_access.map(|d| d.as_nanos() as u64);
        let refresh_after_write_nanos = builder.refresh_after_write.map(|d| d.as_nanos() as u64);

        CacheCore {
            table: StripedTable::new(builder.initial_capacity.unwrap_or(DEFAULT_INITIAL_CAPACITY)),
            policy: Mutex::new(PolicyState::new(
                maximum,
                expire_after_access_nanos.is_some(),
                expire_after_write_nanos.is_some(),
                builder.expiry.is_some(),
                now,
            )),
            read_buffer: ReadBuffer::new(),
            write_buffer: WriteBuffer::new(),
            drain_status: DrainStatus::new(),
            stats: StatsCounter::new(builder.record_stats),
            ticker: builder.ticker,
            executor: builder.executor,
            scheduler: builder.scheduler,
            wakeup_armed: AtomicBool::new(false),
            weigher: builder.weigher,
            expiry: builder.expiry,
            listener: builder.removal_listener,
            loader,
            refresh: RefreshCoordinator::new(),
            expire_after_write_nanos,
            expire_after_access_nanos,
            refresh_after_write_nanos,
        }
    }

    fn now(&self) -> u64 {
        self.ticker.read()
    }

    fn weigh(&self, key: &K, value: &V) -> u32 {
        self.weigher.as_ref().map_or(1, |w| w(key, value))
    }

    pub(crate) fn has_expired(&self, entry: &Arc<Entry<K, V>>, now: u64) -> bool {
        if let Some(ttl) = self.expire_after_access_nanos {
            if entry.access_time().saturating_add(ttl) <= now {
                return true;
            }
        }
        if let Some(ttl) = self.expire_after_write_nanos {
            if entry.write_time().saturating_add(ttl) <= now {
                return true;
            }
        }
        self.expiry.is_some() && entry.variable_time() <= now
    }

    // ========================================================================
    // Read path
    // ========================================================================

    pub(crate) fn get<Q>(self: &Arc<Self>, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        let hash = self.table.hash_key(key);
        let Some(entry) = self.table.find(hash, key) else {
            self.stats.record_miss();
            return None;
        };

        if self.has_expired(&entry, now) {
            self.stats.record_miss();
            // Surface the expiration promptly rather than waiting for
            // the next write.
            self.drain_status.request();
            self.schedule_drain();
            return None;
        }

        let value = entry.read_value();
        self.record_read(&entry, now);
        self.stats.record_hit();
        self.after_read(&entry, now);
        Some(value)
    }

    pub(crate) fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        let hash = self.table.hash_key(key);
        self.table
            .find(hash, key)
            .is_some_and(|entry| !self.has_expired(&entry, now))
    }

    pub(crate) fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        let now = self.now();
        crate::map::TableIter::new(&self.table)
            .any(|entry| !self.has_expired(&entry, now) && entry.with_value(|v| v == value))
    }

    /// Stamp access metadata on a read hit.
    fn record_read(&self, entry: &Arc<Entry<K, V>>, now: u64) {
        entry.set_access_time(now);
        if let Some(expiry) = &self.expiry {
            let updated = entry.with_value(|v| expiry.expire_after_read(entry.key(), v));
            if let Some(duration) = updated {
                entry.set_variable_time(deadline_after(now, duration));
            }
        }
    }

    fn after_read(self: &Arc<Self>, entry: &Arc<Entry<K, V>>, now: u64) {
        match self.read_buffer.offer(Arc::clone(entry)) {
            Offer::Full => {
                self.drain_status.request();
                self.schedule_drain();
            }
            Offer::Added => {
                if self.drain_status.is_required() {
                    self.schedule_drain();
                }
            }
        }
        self.maybe_refresh(entry, now);
    }

    // ========================================================================
    // Write path
    // ========================================================================

    pub(crate) fn put(self: &Arc<Self>, key: K, value: V, only_if_absent: bool) -> Option<V> {
        let now = self.now();
        let hash = self.table.hash_key(&key);
        let weight = self.weigh(&key, &value);

        let result = {
            let mut guard = self.table.write_stripe(hash);
            match guard.find(hash, &key) {
                Some(entry) => {
                    let expired = self.has_expired(&entry, now);
                    if only_if_absent && !expired {
                        entry.set_access_time(now);
                        return Some(entry.read_value());
                    }
                    let old = self.replace_value(&entry, value, weight, now, expired);
                    if expired {
                        None
                    } else {
                        Some(old)
                    }
                }
                None => {
                    let entry = self.make_entry(key, hash, value, weight, now);
                    guard.insert(Arc::clone(&entry));
                    self.write_buffer.push(WriteEvent::Insert { entry });
                    None
                }
            }
        };

        self.after_write();
        result
    }

    /// Replace an entry's value in place, enqueueing the update event.
    /// Must run under the entry's stripe lock.
    fn replace_value(
        &self,
        entry: &Arc<Entry<K, V>>,
        value: V,
        weight: u32,
        now: u64,
        expired: bool,
    ) -> V {
        let old_weight = entry.set_weight(weight);
        let old_value = entry.swap_value(value);
        entry.set_write_time(now);
        entry.set_access_time(now);
        if let Some(expiry) = &self.expiry {
            let updated = entry.with_value(|v| expiry.expire_after_update(entry.key(), v));
            if let Some(duration) = updated {
                entry.set_variable_time(deadline_after(now, duration));
            }
        }
        let cause = if expired {
            RemovalCause::Expired
        } else {
            RemovalCause::Replaced
        };
        self.write_buffer.push(WriteEvent::Update {
            entry: Arc::clone(entry),
            old_value: old_value.clone(),
            old_weight,
            cause,
        });
        old_value
    }

    fn make_entry(&self, key: K, hash: u64, value: V, weight: u32, now: u64) -> Arc<Entry<K, V>> {
        let entry = Arc::new(Entry::new(key, hash, value, weight, now));
        if let Some(expiry) = &self.expiry {
            let duration = entry.with_value(|v| expiry.expire_after_create(entry.key(), v));
            entry.set_variable_time(deadline_after(now, duration));
        }
        entry
    }

    pub(crate) fn replace(self: &Arc<Self>, key: &K, value: V) -> Option<V> {
        let now = self.now();
        let hash = self.table.hash_key(key);
        let weight = self.weigh(key, &value);

        let result = {
            let guard = self.table.write_stripe(hash);
            match guard.find(hash, key) {
                Some(entry) if !self.has_expired(&entry, now) => {
                    Some(self.replace_value(&entry, value, weight, now, false))
                }
                _ => None,
            }
        };

        if result.is_some() {
            self.after_write();
        }
        result
    }

    pub(crate) fn replace_if(self: &Arc<Self>, key: &K, expected: &V, value: V) -> bool
    where
        V: PartialEq,
    {
        let now = self.now();
        let hash = self.table.hash_key(key);
        let weight = self.weigh(key, &value);

        let replaced = {
            let guard = self.table.write_stripe(hash);
            match guard.find(hash, key) {
                Some(entry)
                    if !self.has_expired(&entry, now)
                        && entry.with_value(|v| v == expected) =>
                {
                    self.replace_value(&entry, value, weight, now, false);
                    true
                }
                _ => false,
            }
        };

        if replaced {
            self.after_write();
        }
        replaced
    }

    pub(crate) fn invalidate<Q>(self: &Arc<Self>, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        let hash = self.table.hash_key(key);

        let result = {
            let mut guard = self.table.write_stripe(hash);
            match guard.remove(hash, key) {
                Some(entry) => {
                    let expired = self.has_expired(&entry, now);
                    let old_value = entry.read_value();
                    let cause = if expired {
                        RemovalCause::Expired
                    } else {
                        RemovalCause::Explicit
                    };
                    self.write_buffer.push(WriteEvent::Remove {
                        entry,
                        old_value: old_value.clone(),
                        cause,
                    });
                    if expired {
                        None
                    } else {
                        Some(old_value)
                    }
                }
                None => None,
            }
        };

        self.after_write();
        result
    }

    pub(crate) fn invalidate_if_value(self: &Arc<Self>, key: &K, expected: &V) -> bool
    where
        V: PartialEq,
    {
        let now = self.now();
        let hash = self.table.hash_key(key);

        let removed = {
            let mut guard = self.table.write_stripe(hash);
            match guard.find(hash, key) {
                Some(entry)
                    if !self.has_expired(&entry, now)
                        && entry.with_value(|v| v == expected) =>
                {
                    guard.remove_entry(&entry);
                    let old_value = entry.read_value();
                    self.write_buffer.push(WriteEvent::Remove {
                        entry,
                        old_value,
                        cause: RemovalCause::Explicit,
                    });
                    true
                }
                _ => false,
            }
        };

        if removed {
            self.after_write();
        }
        removed
    }

    pub(crate) fn invalidate_all(self: &Arc<Self>) {
        let now = self.now();
        for stripe in 0..self.table.stripe_count() {
            let mut guard = self.table.write_stripe_at(stripe);
            for entry in guard.take_all() {
                let expired = self.has_expired(&entry, now);
                let old_value = entry.read_value();
                let cause = if expired {
                    RemovalCause::Expired
                } else {
                    RemovalCause::Explicit
                };
                self.write_buffer.push(WriteEvent::Remove {
                    entry,
                    old_value,
                    cause,
                });
            }
        }
        self.after_write();
    }

    // ========================================================================
    // Atomic compute family
    // ========================================================================

    /// Atomic read-modify-write. The remapping function observes the
    /// live value (or `None`) under the stripe lock and its result is
    /// installed before any other writer can interleave.
    pub(crate) fn compute<F>(self: &Arc<Self>, key: K, remap: F) -> Result<Option<V>>
    where
        F: FnOnce(&K, Option<&V>) -> Option<V>,
    {
        let now = self.now();
        let hash = self.table.hash_key(&key);

        let result = {
            let mut guard = self.table.try_write_stripe(hash)?;
            match guard.find(hash, &key) {
                Some(entry) => {
                    let expired = self.has_expired(&entry, now);
                    let current = entry.read_value();
                    let visible = if expired { None } else { Some(&current) };
                    match remap(&key, visible) {
                        Some(new_value) => {
                            let weight = self.weigh(&key, &new_value);
                            let old_weight = entry.set_weight(weight);
                            let old_value = entry.swap_value(new_value.clone());
                            entry.set_write_time(now);
                            entry.set_access_time(now);
                            if let Some(expiry) = &self.expiry {
                                let updated = entry
                                    .with_value(|v| expiry.expire_after_update(entry.key(), v));
                                if let Some(duration) = updated {
                                    entry.set_variable_time(deadline_after(now, duration));
                                }
                            }
                            let cause = if expired {
                                RemovalCause::Expired
                            } else {
                                RemovalCause::Replaced
                            };
                            self.write_buffer.push(WriteEvent::Compute {
                                entry: Arc::clone(&entry),
                                old_value: Some(old_value),
                                old_weight,
                                cause,
                            });
                            Some(new_value)
                        }
                        None => {
                            guard.remove_entry(&entry);
                            let cause = if expired {
                                RemovalCause::Expired
                            } else {
                                RemovalCause::Explicit
                            };
                            self.write_buffer.push(WriteEvent::Remove {
                                entry,
                                old_value: current,
                                cause,
                            });
                            None
                        }
                    }
                }
                None => match remap(&key, None) {
                    Some(new_value) => {
                        let weight = self.weigh(&key, &new_value);
                        let entry =
                            self.make_entry(key, hash, new_value.clone(), weight, now);
                        guard.insert(Arc::clone(&entry));
                        self.write_buffer.push(WriteEvent::Compute {
                            entry,
                            old_value: None,
                            old_weight: 0,
                            cause: RemovalCause::Replaced,
                        });
                        Some(new_value)
                    }
                    None => None,
                },
            }
        };

        self.after_write();
        Ok(result)
    }

    /// Install the mapping function's value when absent; a live entry is
    /// returned untouched, counting as a read.
    pub(crate) fn compute_if_absent<F>(self: &Arc<Self>, key: K, map: F) -> Result<V>
    where
        F: FnOnce(&K) -> V,
    {
        let now = self.now();
        let hash = self.table.hash_key(&key);

        enum Settled<K, V> {
            Present(Arc<Entry<K, V>>, V),
            Inserted(V),
        }

        let settled = {
            let mut guard = self.table.try_write_stripe(hash)?;
            match guard.find(hash, &key) {
                Some(entry) if !self.has_expired(&entry, now) => {
                    let value = entry.read_value();
                    Settled::Present(entry, value)
                }
                Some(entry) => {
                    // Expired: recompute over the dead value.
                    let new_value = map(&key);
                    let weight = self.weigh(&key, &new_value);
                    self.replace_value(&entry, new_value.clone(), weight, now, true);
                    Settled::Inserted(new_value)
                }
                None => {
                    let new_value = map(&key);
                    let weight = self.weigh(&key, &new_value);
                    let entry = self.make_entry(key, hash, new_value.clone(), weight, now);
                    guard.insert(Arc::clone(&entry));
                    self.write_buffer.push(WriteEvent::Insert { entry });
                    Settled::Inserted(new_value)
                }
            }
        };

        match settled {
            Settled::Present(entry, value) => {
                self.record_read(&entry, now);
                self.after_read(&entry, now);
                Ok(value)
            }
            Settled::Inserted(value) => {
                self.after_write();
                Ok(value)
            }
        }
    }

    pub(crate) fn compute_if_present<F>(self: &Arc<Self>, key: K, remap: F) -> Result<Option<V>>
    where
        F: FnOnce(&K, &V) -> Option<V>,
    {
        self.compute(key, |k, current| current.and_then(|v| remap(k, v)))
    }

    pub(crate) fn merge<F>(self: &Arc<Self>, key: K, value: V, remap: F) -> Result<Option<V>>
    where
        F: FnOnce(&V, V) -> Option<V>,
    {
        self.compute(key, move |_, current| match current {
            None => Some(value),
            Some(old) => remap(old, value),
        })
    }

    // ========================================================================
    // Read-through and refresh
    // ========================================================================

    pub(crate) fn get_or_load(self: &Arc<Self>, key: &K) -> Result<V> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let loader = self
            .loader
            .clone()
            .expect("loading cache built without loader");
        let now = self.now();
        let hash = self.table.hash_key(key);

        let loaded = {
            let mut guard = self.table.try_write_stripe(hash)?;
            if let Some(entry) = guard.find(hash, key) {
                if !self.has_expired(&entry, now) {
                    // Raced with another writer while unlocked.
                    Ok(entry.read_value())
                } else {
                    self.load_over_expired(&entry, key, now, &*loader)
                }
            } else {
                let start = self.ticker.read();
                match loader.load(key) {
                    Ok(value) => {
                        self.stats
                            .record_load_success(self.ticker.read().saturating_sub(start));
                        let weight = self.weigh(key, &value);
                        let entry =
                            self.make_entry(key.clone(), hash, value.clone(), weight, now);
                        guard.insert(Arc::clone(&entry));
                        self.write_buffer.push(WriteEvent::Insert { entry });
                        Ok(value)
                    }
                    Err(err) => {
                        self.stats
                            .record_load_failure(self.ticker.read().saturating_sub(start));
                        Err(CacheError::LoaderFailure(err))
                    }
                }
            }
        };

        self.after_write();
        loaded
    }

    fn load_over_expired(
        &self,
        entry: &Arc<Entry<K, V>>,
        key: &K,
        now: u64,
        loader: &dyn CacheLoader<K, V>,
    ) -> Result<V> {
        let start = self.ticker.read();
        match loader.load(key) {
            Ok(value) => {
                self.stats
                    .record_load_success(self.ticker.read().saturating_sub(start));
                let weight = self.weigh(key, &value);
                self.replace_value(entry, value.clone(), weight, now, true);
                Ok(value)
            }
            Err(err) => {
                self.stats
                    .record_load_failure(self.ticker.read().saturating_sub(start));
                Err(CacheError::LoaderFailure(err))
            }
        }
    }

    /// Launch a coalesced background reload when the entry has aged past
    /// the refresh threshold.
    fn maybe_refresh(self: &Arc<Self>, entry: &Arc<Entry<K, V>>, now: u64) {
        let Some(threshold) = self.refresh_after_write_nanos else {
            return;
        };
        if self.loader.is_none() {
            return;
        }
        let observed_write_time = entry.write_time();
        if now.saturating_sub(observed_write_time) < threshold {
            return;
        }
        self.start_refresh(entry.key().clone(), Some(observed_write_time));
    }

    /// Force a reload of `key`, coalescing with any in-flight refresh.
    pub(crate) fn start_refresh(self: &Arc<Self>, key: K, observed_write_time: Option<u64>) {
        let Some(loader) = self.loader.clone() else {
            return;
        };
        if !self.refresh.try_begin(key.clone()) {
            return;
        }

        let hash = self.table.hash_key(&key);
        let old_value = self.table.find(hash, &key).map(|e| e.read_value());
        let core = Arc::clone(self);
        self.executor.execute(Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| match &old_value {
                Some(old) => loader.reload(&key, old),
                None => loader.load(&key),
            }));
            match outcome {
                Ok(Ok(value)) => core.complete_refresh(&key, observed_write_time, value),
                Ok(Err(err)) => {
                    warn!(error = %err, "refresh load failed; retaining stale value");
                }
                Err(_) => {
                    warn!("refresh loader panicked; retaining stale value");
                }
            }
            core.refresh.complete(&key);
        }));
    }

    /// Install a refreshed value iff the entry is unchanged since the
    /// refresh began; otherwise the reload is discarded.
    fn complete_refresh(self: &Arc<Self>, key: &K, observed_write_time: Option<u64>, value: V) {
        let now = self.now();
        let hash = self.table.hash_key(key);
        let weight = self.weigh(key, &value);

        let installed = {
            let mut guard = self.table.write_stripe(hash);
            match guard.find(hash, key) {
                Some(entry) => match observed_write_time {
                    Some(observed) if entry.write_time() != observed => {
                        debug!("discarding refresh: entry changed while reloading");
                        false
                    }
                    _ => {
                        self.replace_value(&entry, value, weight, now, false);
                        true
                    }
                },
                None => match observed_write_time {
                    Some(_) => {
                        debug!("discarding refresh: entry removed while reloading");
                        false
                    }
                    None => {
                        let entry =
                            self.make_entry(key.clone(), hash, value, weight, now);
                        guard.insert(Arc::clone(&entry));
                        self.write_buffer.push(WriteEvent::Insert { entry });
                        true
                    }
                },
            }
        };

        if installed {
            self.after_write();
        }
    }

    pub(crate) fn refresh_in_flight(&self) -> usize {
        self.refresh.in_flight_count()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    fn after_write(self: &Arc<Self>) {
        self.drain_status.request();
        self.schedule_drain();
    }

    fn schedule_drain(self: &Arc<Self>) {
        let core = Arc::clone(self);
        self.executor.execute(Box::new(move || core.maintenance()));
    }

    /// Opportunistic drain: backs off when another pass holds the
    /// policy lock (its status absorbed our request).
    fn maintenance(self: &Arc<Self>) {
        let Some(mut policy) = self.policy.try_lock() else {
            return;
        };
        self.run_drain(&mut policy);
    }

    /// Forced drain: blocks for the policy lock and always runs at
    /// least one full pass.
    pub(crate) fn clean_up(self: &Arc<Self>) {
        let mut policy = self.policy.lock();
        self.run_drain(&mut policy);
    }

    fn run_drain(self: &Arc<Self>, policy: &mut PolicyState<K, V>) {
        loop {
            self.drain_status.begin();
            let mut notifications: Vec<Notification<K, V>> = Vec::new();

            // 1. Replay reads into the access order and sketch.
            self.read_buffer.drain(|entry| policy.record_access(&entry));

            // 2. Apply writes: ordering, weights, and pending removals.
            while let Some(event) = self.write_buffer.pop() {
                self.apply_write(policy, event, &mut notifications);
            }

            // 3. Advance the clock and expire.
            let now = self.now();
            policy.expire_entries(
                now,
                self.expire_after_write_nanos,
                self.expire_after_access_nanos,
                |entry| {
                    if self
                        .table
                        .remove_entry_if(entry, |e| self.has_expired(e, now))
                    {
                        self.stats.record_eviction(entry.weight());
                        notifications.push((
                            entry.key().clone(),
                            entry.read_value(),
                            RemovalCause::Expired,
                        ));
                        true
                    } else {
                        false
                    }
                },
            );

            // 4. Enforce the size bound via admission.
            policy.evict_entries(|entry| {
                let removed = self.table.remove_entry_if(entry, |_| true);
                if removed {
                    self.stats.record_eviction(entry.weight());
                    notifications.push((
                        entry.key().clone(),
                        entry.read_value(),
                        RemovalCause::Size,
                    ));
                }
                removed
            });

            // 5. Arm the next timed wakeup.
            self.arm_wakeup(policy);

            if let Some(listener_fn) = &self.listener {
                for (key, value, cause) in notifications {
                    listener::dispatch(&self.executor, listener_fn, key, value, cause);
                }
            }

            if self.drain_status.finish() {
                break;
            }
        }
    }

    fn apply_write(
        &self,
        policy: &mut PolicyState<K, V>,
        event: WriteEvent<K, V>,
        notifications: &mut Vec<Notification<K, V>>,
    ) {
        match event {
            WriteEvent::Insert { entry } => policy.record_insert(entry),
            WriteEvent::Update {
                entry,
                old_value,
                old_weight,
                cause,
            } => {
                policy.record_update(&entry, old_weight);
                if cause.was_evicted() {
                    self.stats.record_eviction(old_weight);
                }
                notifications.push((entry.key().clone(), old_value, cause));
            }
            WriteEvent::Remove {
                entry,
                old_value,
                cause,
            } => {
                policy.remove_node(&entry);
                if cause.was_evicted() {
                    self.stats.record_eviction(entry.weight());
                }
                notifications.push((entry.key().clone(), old_value, cause));
            }
            WriteEvent::Compute {
                entry,
                old_value,
                old_weight,
                cause,
            } => match old_value {
                None => policy.record_insert(entry),
                Some(old_value) => {
                    policy.record_update(&entry, old_weight);
                    if cause.was_evicted() {
                        self.stats.record_eviction(old_weight);
                    }
                    notifications.push((entry.key().clone(), old_value, cause));
                }
            },
        }
    }

    fn arm_wakeup(self: &Arc<Self>, policy: &PolicyState<K, V>) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        let Some(deadline) =
            policy.next_expiration(self.expire_after_write_nanos, self.expire_after_access_nanos)
        else {
            return;
        };
        if self.wakeup_armed.swap(true, Ordering::AcqRel) {
            return;
        }

        let delay = deadline.saturating_sub(self.now()).max(1);
        let weak = Arc::downgrade(self);
        scheduler.schedule(
            Duration::from_nanos(delay),
            Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.wakeup_armed.store(false, Ordering::Release);
                    core.clean_up();
                }
            }),
        );
    }

    pub(crate) fn stats_snapshot(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
