// Copyright (c) 2025 RustyCache Contributors
//
// Lock-striped concurrent hash table
//
// The table is a power-of-two set of stripes, each guarding its own bin
// array behind a reader-writer lock. Readers take one stripe's read lock
// and never block writes to other stripes; writers serialize per stripe.
// A stripe's bin array doubles independently when its load factor
// crosses 3/4, so growth never stalls the rest of the map.
//
// Reentrancy: a thread-local registry records the stripes the current
// thread has write-locked. Atomic compute operations consult it and fail
// fast instead of self-deadlocking when a user function re-enters the
// same stripe (including the same key).

use std::borrow::Borrow;
use std::cell::RefCell;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::error::{CacheError, Result};
use crate::map::entry::Entry;

/// Bins per stripe at construction.
const INITIAL_BINS: usize = 4;

/// Monotonic source of table identities for the reentrancy registry.
static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Stripes (table id, stripe index) write-held by this thread.
    static HELD_STRIPES: RefCell<Vec<(u64, usize)>> = const { RefCell::new(Vec::new()) };
}

struct BinArray<K, V> {
    bins: Vec<Vec<Arc<Entry<K, V>>>>,
    len: usize,
}

impl<K, V> BinArray<K, V> {
    fn new(bins: usize) -> Self {
        BinArray {
            bins: (0..bins).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    fn bin_of(&self, hash: u64) -> usize {
        // Stripe selection consumes the low bits; bins use the high ones.
        ((hash >> 32) as usize) & (self.bins.len() - 1)
    }
}

struct Stripe<K, V> {
    bins: RwLock<BinArray<K, V>>,
}

pub(crate) struct StripedTable<K, V> {
    id: u64,
    stripes: Box<[Stripe<K, V>]>,
    stripe_mask: usize,
    size: AtomicUsize,
    hasher: RandomState,
}

impl<K, V> StripedTable<K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn new(initial_capacity: usize) -> Self {
        let stripes = (4 * num_cpus::get()).next_power_of_two();
        let bins_per_stripe = (initial_capacity / stripes)
            .next_power_of_two()
            .max(INITIAL_BINS);

        StripedTable {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            stripes: (0..stripes)
                .map(|_| Stripe {
                    bins: RwLock::new(BinArray::new(bins_per_stripe)),
                })
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            stripe_mask: stripes - 1,
            size: AtomicUsize::new(0),
            hasher: RandomState::new(),
        }
    }

    pub(crate) fn hash_key<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hasher.hash_one(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub(crate) fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    pub(crate) fn stripe_of(&self, hash: u64) -> usize {
        (hash as usize) & self.stripe_mask
    }

    fn held_by_current_thread(&self, stripe: usize) -> bool {
        HELD_STRIPES.with(|held| held.borrow().contains(&(self.id, stripe)))
    }

    /// Read a value under the owning stripe's read lock.
    pub(crate) fn find<Q>(&self, hash: u64, key: &Q) -> Option<Arc<Entry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let stripe = self.stripe_of(hash);
        assert!(
            !self.held_by_current_thread(stripe),
            "cache read re-entered a stripe locked by a compute on this thread"
        );

        let bins = self.stripes[stripe].bins.read();
        let bin = &bins.bins[bins.bin_of(hash)];
        bin.iter()
            .find(|e| e.hash() == hash && e.key().borrow() == key)
            .cloned()
    }

    /// Acquire a stripe's write lock for a direct mutation. Panics on
    /// self-reentry, which would otherwise deadlock.
    pub(crate) fn write_stripe(&self, hash: u64) -> StripeGuard<'_, K, V> {
        self.try_write_stripe(hash)
            .expect("cache write re-entered a stripe locked by a compute on this thread")
    }

    /// Acquire a stripe's write lock, failing with `InvalidState` when
    /// the current thread already holds it (reentrant compute).
    pub(crate) fn try_write_stripe(&self, hash: u64) -> Result<StripeGuard<'_, K, V>> {
        let stripe = self.stripe_of(hash);
        if self.held_by_current_thread(stripe) {
            return Err(CacheError::InvalidState(
                "recursive update: compute re-entered its own stripe".to_string(),
            ));
        }

        let bins = self.stripes[stripe].bins.write();
        HELD_STRIPES.with(|held| held.borrow_mut().push((self.id, stripe)));
        Ok(StripeGuard {
            table: self,
            stripe,
            bins,
        })
    }

    /// Acquire a specific stripe's write lock by index, used for whole
    /// map sweeps. Panics on self-reentry like [`Self::write_stripe`].
    pub(crate) fn write_stripe_at(&self, stripe: usize) -> StripeGuard<'_, K, V> {
        assert!(
            !self.held_by_current_thread(stripe),
            "cache sweep re-entered a stripe locked by a compute on this thread"
        );
        let bins = self.stripes[stripe].bins.write();
        HELD_STRIPES.with(|held| held.borrow_mut().push((self.id, stripe)));
        StripeGuard {
            table: self,
            stripe,
            bins,
        }
    }

    /// Snapshot the live entries of one stripe under its read lock.
    ///
    /// Building block for weakly consistent iteration: each stripe is
    /// observed atomically, stripes at different instants.
    pub(crate) fn collect_stripe(&self, stripe: usize) -> Vec<Arc<Entry<K, V>>> {
        let bins = self.stripes[stripe].bins.read();
        bins.bins.iter().flatten().cloned().collect()
    }

    /// Identity-keyed conditional removal, used by the drain to evict or
    /// expire. The predicate is re-evaluated under the stripe lock so a
    /// concurrently refreshed entry is spared.
    pub(crate) fn remove_entry_if(
        &self,
        entry: &Arc<Entry<K, V>>,
        pred: impl FnOnce(&Arc<Entry<K, V>>) -> bool,
    ) -> bool {
        let mut guard = self.write_stripe(entry.hash());
        if !pred(entry) {
            return false;
        }
        guard.remove_entry(entry)
    }
}

/// Write access to a single stripe. Dropping the guard releases the lock
/// and clears the thread's reentrancy record.
pub(crate) struct StripeGuard<'a, K, V> {
    table: &'a StripedTable<K, V>,
    stripe: usize,
    bins: RwLockWriteGuard<'a, BinArray<K, V>>,
}

impl<K, V> StripeGuard<'_, K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn find<Q>(&self, hash: u64, key: &Q) -> Option<Arc<Entry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let bin = &self.bins.bins[self.bins.bin_of(hash)];
        bin.iter()
            .find(|e| e.hash() == hash && e.key().borrow() == key)
            .cloned()
    }

    /// Install a new entry, growing the stripe's bin array when its load
    /// factor exceeds 3/4.
    pub(crate) fn insert(&mut self, entry: Arc<Entry<K, V>>) {
        let bin = self.bins.bin_of(entry.hash());
        self.bins.bins[bin].push(entry);
        self.bins.len += 1;
        self.table.size.fetch_add(1, Ordering::Relaxed);

        if self.bins.len > self.bins.bins.len() * 3 / 4 {
            self.grow();
        }
    }

    /// Unlink the entry mapped to `key`, transitioning it to retired.
    pub(crate) fn remove<Q>(&mut self, hash: u64, key: &Q) -> Option<Arc<Entry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let bin_idx = self.bins.bin_of(hash);
        let bin = &mut self.bins.bins[bin_idx];
        let pos = bin
            .iter()
            .position(|e| e.hash() == hash && e.key().borrow() == key)?;
        let entry = bin.swap_remove(pos);
        entry.retire();
        self.bins.len -= 1;
        self.table.size.fetch_sub(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Unlink exactly this entry object, by identity.
    pub(crate) fn remove_entry(&mut self, entry: &Arc<Entry<K, V>>) -> bool {
        let bin_idx = self.bins.bin_of(entry.hash());
        let bin = &mut self.bins.bins[bin_idx];
        let Some(pos) = bin.iter().position(|e| Arc::ptr_eq(e, entry)) else {
            return false;
        };
        bin.swap_remove(pos);
        entry.retire();
        self.bins.len -= 1;
        self.table.size.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Drain every entry in this stripe, retiring each.
    pub(crate) fn take_all(&mut self) -> Vec<Arc<Entry<K, V>>> {
        let mut out = Vec::with_capacity(self.bins.len);
        for bin in &mut self.bins.bins {
            for entry in bin.drain(..) {
                entry.retire();
                out.push(entry);
            }
        }
        self.table.size.fetch_sub(self.bins.len, Ordering::Relaxed);
        self.bins.len = 0;
        out
    }

    fn grow(&mut self) {
        let new_size = self.bins.bins.len() * 2;
        let mut grown = BinArray::new(new_size);
        grown.len = self.bins.len;
        for bin in self.bins.bins.drain(..) {
            for entry in bin {
                let idx = grown.bin_of(entry.hash());
                grown.bins[idx].push(entry);
            }
        }
        *self.bins = grown;
    }
}

impl<K, V> Drop for StripeGuard<'_, K, V> {
    fn drop(&mut self) {
        HELD_STRIPES.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held
                .iter()
                .rposition(|&t| t == (self.table.id, self.stripe))
            {
                held.swap_remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn insert(table: &StripedTable<String, i32>, key: &str, value: i32) -> Arc<Entry<String, i32>> {
        let hash = table.hash_key(key);
        let entry = Arc::new(Entry::new(key.to_string(), hash, value, 1, 0));
        table.write_stripe(hash).insert(entry.clone());
        entry
    }

    #[test]
    fn test_insert_find_remove() {
        let table: StripedTable<String, i32> = StripedTable::new(16);
        insert(&table, "a", 1);
        insert(&table, "b", 2);
        assert_eq!(table.len(), 2);

        let hash = table.hash_key("a");
        let found = table.find(hash, "a").unwrap();
        assert_eq!(found.read_value(), 1);

        let removed = table.write_stripe(hash).remove(hash, "a").unwrap();
        assert!(!removed.is_live());
        assert_eq!(table.len(), 1);
        assert!(table.find(hash, "a").is_none());
    }

    #[test]
    fn test_borrowed_key_lookup() {
        let table: StripedTable<String, i32> = StripedTable::new(16);
        insert(&table, "alpha", 7);

        // &str lookup against String keys shares one hash family.
        let hash = table.hash_key("alpha");
        assert!(table.find(hash, "alpha").is_some());
    }

    #[test]
    fn test_stripe_growth_keeps_entries() {
        let table: StripedTable<String, i32> = StripedTable::new(4);
        for i in 0..500 {
            insert(&table, &format!("key-{i}"), i);
        }
        assert_eq!(table.len(), 500);
        for i in 0..500 {
            let key = format!("key-{i}");
            let hash = table.hash_key(key.as_str());
            assert_eq!(
                table.find(hash, key.as_str()).unwrap().read_value(),
                i,
                "lost {key} during growth"
            );
        }
    }

    #[test]
    fn test_remove_entry_by_identity() {
        let table: StripedTable<String, i32> = StripedTable::new(16);
        let entry = insert(&table, "a", 1);

        assert!(table.remove_entry_if(&entry, |_| true));
        assert_eq!(table.len(), 0);
        // A second attempt finds nothing to unlink.
        assert!(!table.remove_entry_if(&entry, |_| true));
    }

    #[test]
    fn test_remove_entry_if_respects_predicate() {
        let table: StripedTable<String, i32> = StripedTable::new(16);
        let entry = insert(&table, "a", 1);

        assert!(!table.remove_entry_if(&entry, |_| false));
        assert_eq!(table.len(), 1);
        assert!(entry.is_live());
    }

    #[test]
    fn test_reentrant_write_detected() {
        let table: StripedTable<String, i32> = StripedTable::new(16);
        let hash = table.hash_key("a");

        let _outer = table.try_write_stripe(hash).unwrap();
        let inner = table.try_write_stripe(hash);
        assert!(matches!(inner, Err(CacheError::InvalidState(_))));
    }

    #[test]
    fn test_reentrancy_record_cleared_on_drop() {
        let table: StripedTable<String, i32> = StripedTable::new(16);
        let hash = table.hash_key("a");

        drop(table.try_write_stripe(hash).unwrap());
        assert!(table.try_write_stripe(hash).is_ok());
    }

    #[test]
    fn test_concurrent_inserts() {
        let table: Arc<StripedTable<String, i32>> = Arc::new(StripedTable::new(64));
        let mut handles = vec![];

        for t in 0..8 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    let key = format!("t{t}-{i}");
                    let hash = table.hash_key(key.as_str());
                    let entry = Arc::new(Entry::new(key, hash, i, 1, 0));
                    table.write_stripe(hash).insert(entry);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.len(), 2000);
    }
}
