// Copyright (c) 2025 RustyCache Contributors
//
// Cache entry record
//
// An entry is shared between the hash table (which owns reachability by
// key) and the policy structures (which own ordering). All mutable
// bookkeeping is atomic so readers never take the stripe lock to stamp
// an access, and the drain can inspect entries without coordination.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Entry lifecycle states.
///
/// `Live` entries are reachable through the table. `Retired` entries have
/// been unlinked from the table but are still referenced by pending write
/// events. `Dead` entries have also been unlinked from the policy
/// structures and only await their final drop.
const LIVE: u8 = 0;
const RETIRED: u8 = 1;
const DEAD: u8 = 2;

/// Sentinel for "not linked into the policy arena".
pub(crate) const NO_SLOT: usize = usize::MAX;

/// Sentinel deadline for entries that never expire by variable policy.
pub(crate) const ETERNAL: u64 = u64::MAX;

pub(crate) struct Entry<K, V> {
    key: K,
    hash: u64,
    value: RwLock<V>,
    weight: AtomicU32,
    state: AtomicU8,
    access_time: AtomicU64,
    write_time: AtomicU64,
    variable_time: AtomicU64,
    policy_slot: AtomicUsize,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(key: K, hash: u64, value: V, weight: u32, now: u64) -> Self {
        Entry {
            key,
            hash,
            value: RwLock::new(value),
            weight: AtomicU32::new(weight),
            state: AtomicU8::new(LIVE),
            access_time: AtomicU64::new(now),
            write_time: AtomicU64::new(now),
            variable_time: AtomicU64::new(ETERNAL),
            policy_slot: AtomicUsize::new(NO_SLOT),
        }
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    /// Clone out the current value.
    pub(crate) fn read_value(&self) -> V
    where
        V: Clone,
    {
        self.value.read().clone()
    }

    /// Run `f` against the current value without cloning it.
    pub(crate) fn with_value<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.value.read())
    }

    /// Swap in a new value, returning the old one. Callers must hold the
    /// owning stripe's write lock to keep value swaps ordered with the
    /// write events they produce.
    pub(crate) fn swap_value(&self, value: V) -> V {
        std::mem::replace(&mut *self.value.write(), value)
    }

    pub(crate) fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub(crate) fn set_weight(&self, weight: u32) -> u32 {
        self.weight.swap(weight, Ordering::Relaxed)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state.load(Ordering::Acquire) == LIVE
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.state.load(Ordering::Acquire) == DEAD
    }

    /// Transition `Live -> Retired` when unlinking from the table.
    pub(crate) fn retire(&self) {
        self.state.store(RETIRED, Ordering::Release);
    }

    /// Transition to `Dead` once the policy structures have let go.
    pub(crate) fn kill(&self) {
        self.state.store(DEAD, Ordering::Release);
    }

    pub(crate) fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_access_time(&self, now: u64) {
        self.access_time.store(now, Ordering::Relaxed);
    }

    pub(crate) fn write_time(&self) -> u64 {
        self.write_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_write_time(&self, now: u64) {
        self.write_time.store(now, Ordering::Relaxed);
    }

    /// Absolute variable-expiry deadline; [`ETERNAL`] when unset.
    pub(crate) fn variable_time(&self) -> u64 {
        self.variable_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_variable_time(&self, deadline: u64) {
        self.variable_time.store(deadline, Ordering::Relaxed);
    }

    /// Policy arena slot, owned by the drain. [`NO_SLOT`] when unlinked.
    pub(crate) fn policy_slot(&self) -> usize {
        self.policy_slot.load(Ordering::Relaxed)
    }

    pub(crate) fn set_policy_slot(&self, slot: usize) {
        self.policy_slot.store(slot, Ordering::Relaxed);
    }
}

impl<K: std::fmt::Debug, V> std::fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("hash", &self.hash)
            .field("weight", &self.weight())
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}
