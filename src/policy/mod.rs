// # Policy State
//
// Drain-private bookkeeping for eviction and expiration. Everything in
// this module is mutated only while the maintenance pass holds the
// policy lock; the shared entry records carry just enough atomic state
// (the arena slot index) to bridge between the concurrent table and
// these single-owner structures.

pub(crate) mod deque;
pub(crate) mod eviction;
pub(crate) mod sketch;
pub(crate) mod timer_wheel;

use std::sync::Arc;

use crate::map::{Entry, NO_SLOT};
use deque::{Arena, Chain, Deque, Node};
use eviction::AccessOrder;
use timer_wheel::TimerWheel;

/// Which eviction region a policy node currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    /// Not linked into any access deque.
    None,
    Window,
    Probation,
    Protected,
}

pub(crate) struct PolicyState<K, V> {
    pub(crate) arena: Arena<K, V>,
    pub(crate) access: AccessOrder,
    pub(crate) write_order: Deque,
    pub(crate) wheel: Option<TimerWheel>,
    expires_after_write: bool,
}

impl<K, V> PolicyState<K, V> {
    pub(crate) fn new(
        maximum: Option<u64>,
        expires_after_access: bool,
        expires_after_write: bool,
        expires_variable: bool,
        now: u64,
    ) -> Self {
        PolicyState {
            arena: Arena::new(),
            access: AccessOrder::new(maximum, expires_after_access),
            write_order: Deque::new(Chain::Write),
            wheel: expires_variable.then(|| TimerWheel::new(now)),
            expires_after_write,
        }
    }

    /// Resolve an entry to its arena slot, guarding against slot reuse:
    /// a stale read event may carry an entry whose slot has since been
    /// recycled for a different node.
    fn node_of(&self, entry: &Arc<Entry<K, V>>) -> Option<usize> {
        let slot = entry.policy_slot();
        if slot == NO_SLOT {
            return None;
        }
        Arc::ptr_eq(&self.arena.node(slot).entry, entry).then_some(slot)
    }

    pub(crate) fn record_insert(&mut self, entry: Arc<Entry<K, V>>) {
        if entry.is_dead() || self.node_of(&entry).is_some() {
            return;
        }
        // Raced with an explicit removal before the drain saw the
        // insert: the pending remove event carries the notification, so
        // the policy never needs to learn about the entry at all.
        if !entry.is_live() {
            return;
        }

        let weight = entry.weight();
        let variable_time = entry.variable_time();
        let node = Node::new(Arc::clone(&entry), weight);
        let idx = self.arena.insert(node);
        entry.set_policy_slot(idx);

        self.access.on_insert(&mut self.arena, idx);
        if self.expires_after_write {
            self.write_order.push_back(&mut self.arena, idx);
        }
        if let Some(wheel) = &mut self.wheel {
            wheel.schedule(&mut self.arena, idx, variable_time);
        }
    }

    pub(crate) fn record_access(&mut self, entry: &Arc<Entry<K, V>>) {
        let Some(idx) = self.node_of(entry) else {
            // Seen before its insert drained, or after removal; the
            // popularity still counts.
            self.access.note_hash(entry.hash());
            return;
        };
        self.access.on_access(&mut self.arena, idx);
        if let Some(wheel) = &mut self.wheel {
            wheel.reschedule(&mut self.arena, idx, entry.variable_time());
        }
    }

    pub(crate) fn record_update(&mut self, entry: &Arc<Entry<K, V>>, old_weight: u32) {
        let Some(idx) = self.node_of(entry) else {
            return;
        };
        self.access
            .on_weight_change(&mut self.arena, idx, old_weight, entry.weight());
        self.access.on_access(&mut self.arena, idx);
        if self.expires_after_write {
            self.write_order.move_to_back(&mut self.arena, idx);
        }
        if let Some(wheel) = &mut self.wheel {
            wheel.reschedule(&mut self.arena, idx, entry.variable_time());
        }
    }

    /// Unlink an entry from every policy structure and mark it dead.
    /// Returns false when the entry had no policy presence.
    pub(crate) fn remove_node(&mut self, entry: &Arc<Entry<K, V>>) -> bool {
        let Some(idx) = self.node_of(entry) else {
            entry.kill();
            return false;
        };
        self.access.on_remove(&mut self.arena, idx);
        if self.expires_after_write {
            self.write_order.unlink(&mut self.arena, idx);
        }
        if let Some(wheel) = &mut self.wheel {
            wheel.deschedule(&mut self.arena, idx);
        }
        let node = self.arena.remove(idx);
        node.entry.set_policy_slot(NO_SLOT);
        node.entry.kill();
        true
    }

    /// Sweep expired entries. `on_expire` attempts the table removal and
    /// returns whether it succeeded; survivors (entries concurrently
    /// rewritten to a fresher timestamp) are resubmitted to their index.
    pub(crate) fn expire_entries(
        &mut self,
        now: u64,
        after_write: Option<u64>,
        after_access: Option<u64>,
        mut on_expire: impl FnMut(&Arc<Entry<K, V>>) -> bool,
    ) {
        if let Some(ttl) = after_write {
            let due = self.write_order.collect_head_while(&self.arena, |node| {
                node.entry.write_time().saturating_add(ttl) <= now
            });
            for idx in due {
                let entry = Arc::clone(&self.arena.node(idx).entry);
                if entry.write_time().saturating_add(ttl) <= now && on_expire(&entry) {
                    self.remove_node(&entry);
                } else {
                    self.write_order.move_to_back(&mut self.arena, idx);
                }
            }
        }

        if let Some(ttl) = after_access {
            for region in [Region::Window, Region::Probation, Region::Protected] {
                let deque = match region {
                    Region::Window => &self.access.window,
                    Region::Probation => &self.access.probation,
                    _ => &self.access.protected,
                };
                let due = deque.collect_head_while(&self.arena, |node| {
                    node.entry.access_time().saturating_add(ttl) <= now
                });
                for idx in due {
                    let entry = Arc::clone(&self.arena.node(idx).entry);
                    if entry.access_time().saturating_add(ttl) <= now && on_expire(&entry) {
                        self.remove_node(&entry);
                    } else {
                        let deque = match self.arena.node(idx).region {
                            Region::Window => &mut self.access.window,
                            Region::Probation => &mut self.access.probation,
                            Region::Protected => &mut self.access.protected,
                            Region::None => continue,
                        };
                        deque.move_to_back(&mut self.arena, idx);
                    }
                }
            }
        }

        if self.wheel.is_some() {
            let due = self
                .wheel
                .as_mut()
                .unwrap()
                .advance(&mut self.arena, now);
            for idx in due {
                let entry = Arc::clone(&self.arena.node(idx).entry);
                if entry.variable_time() <= now && on_expire(&entry) {
                    self.remove_node(&entry);
                } else {
                    let deadline = entry.variable_time();
                    self.wheel
                        .as_mut()
                        .unwrap()
                        .schedule(&mut self.arena, idx, deadline);
                }
            }
        }
    }

    /// Evict until the configured bound holds. `on_evict` performs the
    /// table removal; the node leaves the policy either way, since a
    /// failed removal means some pending event already owns the entry.
    pub(crate) fn evict_entries(&mut self, mut on_evict: impl FnMut(&Arc<Entry<K, V>>) -> bool) {
        while self.access.overflowed() {
            let Some(idx) = self.access.next_victim(&mut self.arena) else {
                break;
            };
            let entry = Arc::clone(&self.arena.node(idx).entry);
            on_evict(&entry);
            self.remove_node(&entry);
        }
    }

    /// Earliest upcoming expiration deadline, for arming a wakeup.
    pub(crate) fn next_expiration(
        &self,
        after_write: Option<u64>,
        after_access: Option<u64>,
    ) -> Option<u64> {
        let mut earliest: Option<u64> = None;
        let mut consider = |deadline: u64| {
            earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
        };

        if let Some(ttl) = after_write {
            if let Some(idx) = self.write_order.head() {
                consider(self.arena.node(idx).entry.write_time().saturating_add(ttl));
            }
        }
        if let Some(ttl) = after_access {
            for deque in [
                &self.access.window,
                &self.access.probation,
                &self.access.protected,
            ] {
                if let Some(idx) = deque.head() {
                    consider(self.arena.node(idx).entry.access_time().saturating_add(ttl));
                }
            }
        }
        if let Some(wheel) = &self.wheel {
            if let Some(deadline) = wheel.next_deadline(&self.arena) {
                consider(deadline);
            }
        }
        earliest
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }
}
