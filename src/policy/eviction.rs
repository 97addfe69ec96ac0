// # Segmented Access Order and Admission
//
// Live entries are partitioned into three regions: a small window
// receiving new arrivals, a probation segment for entries aged out of
// the window, and a protected segment for proven repeat hits. Each
// region is an LRU deque; hits promote probation entries into protected,
// and protected overflow demotes its coldest entries back to probation.
//
// On capacity overflow the coldest probation entry (the victim) faces
// the most recent window transfer (the candidate): the candidate is
// admitted only when the frequency sketch estimates it strictly more
// popular. Ties keep the incumbent. A rare random admission above a
// minimum frequency prevents an attacker from starving the window with
// crafted one-hit keys.

use crate::policy::deque::{Arena, Chain, Deque};
use crate::policy::sketch::{FrequencySketch, ADMIT_HASHDOS_THRESHOLD};
use crate::policy::Region;

/// Fraction of capacity given to the admission window: 1/100.
const WINDOW_DIVISOR: u64 = 100;

/// The protected region holds 4/5 of the main segment.
const PROTECTED_NUMERATOR: u64 = 4;
const PROTECTED_DENOMINATOR: u64 = 5;

pub(crate) struct AccessOrder {
    pub(crate) window: Deque,
    pub(crate) probation: Deque,
    pub(crate) protected: Deque,
    sketch: FrequencySketch,
    evicts: bool,
    ordered: bool,
    maximum: u64,
    window_maximum: u64,
    protected_maximum: u64,
    window_weight: u64,
    protected_weight: u64,
    total_weight: u64,
    /// Window transfers not yet consumed by an admission contest.
    candidates: usize,
}

impl AccessOrder {
    /// `maximum = None` disables size eviction; `ordered` keeps access
    /// order anyway (needed for fixed after-access expiration).
    pub(crate) fn new(maximum: Option<u64>, ordered: bool) -> Self {
        let evicts = maximum.is_some();
        let maximum = maximum.unwrap_or(u64::MAX);
        let (window_maximum, protected_maximum) = if evicts {
            let window = (maximum / WINDOW_DIVISOR).max(1);
            let main = maximum - window;
            (
                window,
                main * PROTECTED_NUMERATOR / PROTECTED_DENOMINATOR,
            )
        } else {
            (u64::MAX, u64::MAX)
        };

        AccessOrder {
            window: Deque::new(Chain::Access),
            probation: Deque::new(Chain::Access),
            protected: Deque::new(Chain::Access),
            sketch: FrequencySketch::new(if evicts { maximum } else { 16 }),
            evicts,
            ordered: ordered || evicts,
            maximum,
            window_maximum,
            protected_maximum,
            window_weight: 0,
            protected_weight: 0,
            total_weight: 0,
            candidates: 0,
        }
    }

    pub(crate) fn evicts(&self) -> bool {
        self.evicts
    }

    pub(crate) fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Record popularity for a key that has no policy node yet.
    pub(crate) fn note_hash(&mut self, hash: u64) {
        if self.evicts {
            self.sketch.increment(hash);
        }
    }

    pub(crate) fn on_insert<K, V>(&mut self, arena: &mut Arena<K, V>, idx: usize) {
        let (weight, hash) = {
            let node = arena.node(idx);
            (u64::from(node.weight), node.entry.hash())
        };
        if self.evicts {
            self.sketch.increment(hash);
        }
        self.total_weight += weight;
        if self.ordered {
            arena.node_mut(idx).region = Region::Window;
            self.window.push_back(arena, idx);
            self.window_weight += weight;
        }
    }

    pub(crate) fn on_access<K, V>(&mut self, arena: &mut Arena<K, V>, idx: usize) {
        let (region, weight, hash) = {
            let node = arena.node(idx);
            (node.region, u64::from(node.weight), node.entry.hash())
        };
        if self.evicts {
            self.sketch.increment(hash);
        }
        match region {
            Region::None => {}
            Region::Window => self.window.move_to_back(arena, idx),
            Region::Protected => self.protected.move_to_back(arena, idx),
            Region::Probation => {
                // A repeat hit earns promotion into the protected region.
                self.probation.unlink(arena, idx);
                arena.node_mut(idx).region = Region::Protected;
                self.protected.push_back(arena, idx);
                self.protected_weight += weight;
                self.demote_protected(arena);
            }
        }
    }

    pub(crate) fn on_weight_change<K, V>(
        &mut self,
        arena: &mut Arena<K, V>,
        idx: usize,
        old_weight: u32,
        new_weight: u32,
    ) {
        let region = arena.node(idx).region;
        arena.node_mut(idx).weight = new_weight;

        let old = u64::from(old_weight);
        let new = u64::from(new_weight);
        self.total_weight = self.total_weight - old + new;
        match region {
            Region::Window => self.window_weight = self.window_weight - old + new,
            Region::Protected => {
                self.protected_weight = self.protected_weight - old + new;
                self.demote_protected(arena);
            }
            _ => {}
        }
    }

    pub(crate) fn on_remove<K, V>(&mut self, arena: &mut Arena<K, V>, idx: usize) {
        let (region, weight) = {
            let node = arena.node(idx);
            (node.region, u64::from(node.weight))
        };
        match region {
            Region::None => {}
            Region::Window => {
                self.window.unlink(arena, idx);
                self.window_weight -= weight;
            }
            Region::Probation => {
                self.probation.unlink(arena, idx);
            }
            Region::Protected => {
                self.protected.unlink(arena, idx);
                self.protected_weight -= weight;
            }
        }
        arena.node_mut(idx).region = Region::None;
        self.total_weight = self.total_weight.saturating_sub(weight);
    }

    pub(crate) fn overflowed(&self) -> bool {
        self.evicts && self.total_weight > self.maximum
    }

    /// Pick the next entry to evict, applying window aging and the
    /// admission contest. Returns `None` when nothing is linked.
    pub(crate) fn next_victim<K, V>(&mut self, arena: &mut Arena<K, V>) -> Option<usize> {
        self.age_window(arena);

        let victim = self
            .probation
            .head()
            .or_else(|| self.protected.head())
            .or_else(|| self.window.head())?;

        let candidate = if self.candidates > 0 {
            self.probation.tail()
        } else {
            None
        };

        match candidate {
            None => Some(victim),
            Some(candidate) if candidate == victim => {
                self.candidates = 0;
                Some(victim)
            }
            Some(candidate) => {
                self.candidates -= 1;
                let victim_freq = self.sketch.frequency(arena.node(victim).entry.hash());
                let candidate_freq = self.sketch.frequency(arena.node(candidate).entry.hash());
                if admit(candidate_freq, victim_freq) {
                    Some(victim)
                } else {
                    Some(candidate)
                }
            }
        }
    }

    /// Move window overflow into probation, where each transfer becomes
    /// an admission candidate.
    fn age_window<K, V>(&mut self, arena: &mut Arena<K, V>) {
        while self.window_weight > self.window_maximum {
            let Some(idx) = self.window.pop_front(arena) else {
                break;
            };
            let weight = u64::from(arena.node(idx).weight);
            self.window_weight -= weight;
            arena.node_mut(idx).region = Region::Probation;
            self.probation.push_back(arena, idx);
            self.candidates += 1;
        }
    }

    fn demote_protected<K, V>(&mut self, arena: &mut Arena<K, V>) {
        while self.protected_weight > self.protected_maximum {
            let Some(idx) = self.protected.pop_front(arena) else {
                break;
            };
            let weight = u64::from(arena.node(idx).weight);
            self.protected_weight -= weight;
            arena.node_mut(idx).region = Region::Probation;
            self.probation.push_back(arena, idx);
        }
    }
}

/// Admission filter: should the candidate displace the victim?
fn admit(candidate_freq: u32, victim_freq: u32) -> bool {
    if candidate_freq > victim_freq {
        true
    } else if candidate_freq >= ADMIT_HASHDOS_THRESHOLD {
        // Rare random admission (1/128) above the popularity floor.
        (rand::random::<u32>() & 127) == 0
    } else {
        false
    }
}
