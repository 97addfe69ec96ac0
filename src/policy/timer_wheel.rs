// # Hierarchical Timer Wheel
//
// Variable-expiry deadlines are indexed by a five-level wheel. Each
// level covers a power-of-two span roughly matching a human-scale
// interval (about 1.07s, 1.14m, 1.22h, 1.6d, and everything beyond in a
// single overflow bucket). Scheduling picks the coarsest level whose
// span still contains the delay; advancing time cascades entries from
// coarse buckets down toward finer ones until their deadline arrives.

use crate::policy::deque::{Arena, Links};

const BUCKET_COUNTS: [usize; 5] = [64, 64, 32, 4, 1];
const SHIFTS: [u32; 5] = [30, 36, 42, 47, 49];
const SPANS: [u64; 5] = [1 << 30, 1 << 36, 1 << 42, 1 << 47, 1 << 49];

pub(crate) struct TimerWheel {
    /// Wheel time: the instant of the last advance.
    nanos: u64,
    /// `buckets[level][slot]` holds the head of an intrusive list.
    buckets: Vec<Vec<Option<usize>>>,
}

impl TimerWheel {
    pub(crate) fn new(now: u64) -> Self {
        TimerWheel {
            nanos: now,
            buckets: BUCKET_COUNTS.iter().map(|&n| vec![None; n]).collect(),
        }
    }

    fn position(&self, deadline: u64) -> (usize, usize) {
        // Past-due deadlines are pinned to the current tick so the next
        // advance is guaranteed to sweep them.
        let effective = deadline.max(self.nanos);
        let duration = effective - self.nanos;
        for level in 0..4 {
            if duration < SPANS[level + 1] {
                let ticks = effective >> SHIFTS[level];
                return (level, (ticks as usize) & (BUCKET_COUNTS[level] - 1));
            }
        }
        (4, 0)
    }

    /// Link a node into the bucket covering its deadline.
    pub(crate) fn schedule<K, V>(&mut self, arena: &mut Arena<K, V>, idx: usize, deadline: u64) {
        let (level, slot) = self.position(deadline);
        let head = self.buckets[level][slot];

        {
            let node = arena.node_mut(idx);
            debug_assert!(node.wheel_bucket.is_none(), "node already scheduled");
            node.wheel = Links {
                prev: None,
                next: head,
            };
            node.wheel_bucket = Some((level, slot));
        }
        if let Some(head) = head {
            arena.node_mut(head).wheel.prev = Some(idx);
        }
        self.buckets[level][slot] = Some(idx);
    }

    /// Unlink a node from its bucket. Returns false when not scheduled.
    pub(crate) fn deschedule<K, V>(&mut self, arena: &mut Arena<K, V>, idx: usize) -> bool {
        let (links, bucket) = {
            let node = arena.node_mut(idx);
            let Some(bucket) = node.wheel_bucket.take() else {
                return false;
            };
            let links = node.wheel;
            node.wheel = Links::default();
            (links, bucket)
        };

        match links.prev {
            Some(prev) => arena.node_mut(prev).wheel.next = links.next,
            None => self.buckets[bucket.0][bucket.1] = links.next,
        }
        if let Some(next) = links.next {
            arena.node_mut(next).wheel.prev = links.prev;
        }
        true
    }

    pub(crate) fn reschedule<K, V>(&mut self, arena: &mut Arena<K, V>, idx: usize, deadline: u64) {
        if self.deschedule(arena, idx) {
            self.schedule(arena, idx, deadline);
        }
    }

    /// Advance the wheel to `now`, returning nodes whose deadline has
    /// passed. Nodes popped from swept buckets whose deadline is still
    /// in the future are cascaded back into finer buckets.
    pub(crate) fn advance<K, V>(&mut self, arena: &mut Arena<K, V>, now: u64) -> Vec<usize> {
        let prev = self.nanos;
        if now <= prev {
            return Vec::new();
        }
        self.nanos = now;

        let mut expired = Vec::new();
        for level in 0..5 {
            let prev_ticks = prev >> SHIFTS[level];
            let cur_ticks = now >> SHIFTS[level];
            let delta = cur_ticks - prev_ticks;

            // Sweep from the previous tick inclusive: the partially
            // elapsed bucket can hold deadlines that are already due.
            let steps = (delta + 1).min(BUCKET_COUNTS[level] as u64);
            for step in 0..steps {
                let slot = ((prev_ticks + step) as usize) & (BUCKET_COUNTS[level] - 1);
                let mut cursor = self.buckets[level][slot].take();
                while let Some(idx) = cursor {
                    let deadline = {
                        let node = arena.node_mut(idx);
                        cursor = node.wheel.next;
                        node.wheel = Links::default();
                        node.wheel_bucket = None;
                        node.entry.variable_time()
                    };
                    if deadline <= now {
                        expired.push(idx);
                    } else {
                        self.schedule(arena, idx, deadline);
                    }
                }
            }

            if delta == 0 {
                break;
            }
        }
        expired
    }

    /// Earliest deadline currently scheduled, if any. A full scan: only
    /// consulted when arming a wakeup, never on the hot path.
    pub(crate) fn next_deadline<K, V>(&self, arena: &Arena<K, V>) -> Option<u64> {
        let mut earliest: Option<u64> = None;
        for level in &self.buckets {
            for &head in level {
                let mut cursor = head;
                while let Some(idx) = cursor {
                    let node = arena.node(idx);
                    let deadline = node.entry.variable_time();
                    earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
                    cursor = node.wheel.next;
                }
            }
        }
        earliest
    }
}
