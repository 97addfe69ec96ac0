// # Cache Statistics
//
// Monotonic performance counters and the snapshot type exposed through
// `Cache::stats`. Recording is lock-free: every counter is a relaxed
// atomic, so the hot path pays a handful of uncontended increments.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free statistics recorder.
///
/// When statistics are disabled at build time the recorder is created
/// with `enabled = false` and every record call is a no-op, which keeps
/// the call sites branch-cheap without a second recorder type.
#[derive(Debug)]
pub(crate) struct StatsCounter {
    enabled: bool,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    load_success_count: AtomicU64,
    load_failure_count: AtomicU64,
    total_load_time_nanos: AtomicU64,
    eviction_count: AtomicU64,
    eviction_weight: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn new(enabled: bool) -> Self {
        StatsCounter {
            enabled,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            load_success_count: AtomicU64::new(0),
            load_failure_count: AtomicU64::new(0),
            total_load_time_nanos: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            eviction_weight: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_hit(&self) {
        if self.enabled {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_miss(&self) {
        if self.enabled {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_load_success(&self, load_time_nanos: u64) {
        if self.enabled {
            self.load_success_count.fetch_add(1, Ordering::Relaxed);
            self.total_load_time_nanos
                .fetch_add(load_time_nanos, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_load_failure(&self, load_time_nanos: u64) {
        if self.enabled {
            self.load_failure_count.fetch_add(1, Ordering::Relaxed);
            self.total_load_time_nanos
                .fetch_add(load_time_nanos, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_eviction(&self, weight: u32) {
        if self.enabled {
            self.eviction_count.fetch_add(1, Ordering::Relaxed);
            self.eviction_weight
                .fetch_add(u64::from(weight), Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            load_success_count: self.load_success_count.load(Ordering::Relaxed),
            load_failure_count: self.load_failure_count.load(Ordering::Relaxed),
            total_load_time_nanos: self.total_load_time_nanos.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            eviction_weight: self.eviction_weight.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of cache performance counters.
///
/// Counters are cumulative since cache construction; the snapshot is not
/// atomic across fields, which is acceptable for monitoring purposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of lookups that returned a cached value.
    pub hit_count: u64,

    /// Number of lookups that found no live entry.
    pub miss_count: u64,

    /// Number of successful loader invocations.
    pub load_success_count: u64,

    /// Number of failed loader invocations.
    pub load_failure_count: u64,

    /// Total nanoseconds spent in the loader, success or failure.
    pub total_load_time_nanos: u64,

    /// Number of entries evicted by size or expiration policy.
    pub eviction_count: u64,

    /// Total weight of evicted entries.
    pub eviction_weight: u64,
}

impl CacheStats {
    /// Total number of lookups.
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    /// Fraction of lookups served from cache, in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            1.0
        } else {
            self.hit_count as f64 / requests as f64
        }
    }

    /// Fraction of lookups that missed, in `[0.0, 1.0]`.
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Total number of loader invocations.
    pub fn load_count(&self) -> u64 {
        self.load_success_count + self.load_failure_count
    }

    /// Average nanoseconds per loader invocation.
    pub fn average_load_penalty(&self) -> f64 {
        let loads = self.load_count();
        if loads == 0 {
            0.0
        } else {
            self.total_load_time_nanos as f64 / loads as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_records() {
        let counter = StatsCounter::new(true);
        counter.record_hit();
        counter.record_hit();
        counter.record_miss();
        counter.record_load_success(100);
        counter.record_load_failure(50);
        counter.record_eviction(7);

        let stats = counter.snapshot();
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.load_success_count, 1);
        assert_eq!(stats.load_failure_count, 1);
        assert_eq!(stats.total_load_time_nanos, 150);
        assert_eq!(stats.eviction_count, 1);
        assert_eq!(stats.eviction_weight, 7);
        assert_eq!(stats.request_count(), 3);
    }

    #[test]
    fn test_disabled_counter_discards() {
        let counter = StatsCounter::new(false);
        counter.record_hit();
        counter.record_miss();
        counter.record_eviction(3);

        assert_eq!(counter.snapshot(), CacheStats::default());
    }

    #[test]
    fn test_rates() {
        let stats = CacheStats {
            hit_count: 3,
            miss_count: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!((stats.miss_rate() - 0.25).abs() < f64::EPSILON);

        let empty = CacheStats::default();
        assert!((empty.hit_rate() - 1.0).abs() < f64::EPSILON);
        assert_eq!(empty.average_load_penalty(), 0.0);
    }
}
