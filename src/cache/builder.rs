// # Cache Builder
//
// Fluent configuration for cache construction. Validation happens once
// at `build` time so every rejected combination surfaces before any
// entry is accepted.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::core::CacheCore;
use crate::cache::listener::{RemovalCause, RemovalListener};
use crate::cache::{Cache, CacheLoader, Expiry, LoadingCache, Weigher};
use crate::common::{CallerRunsExecutor, Executor, Scheduler, SystemTicker, Ticker};
use crate::error::{CacheError, Result};

/// Default table capacity when none is configured.
pub(crate) const DEFAULT_INITIAL_CAPACITY: usize = 16;

pub struct CacheBuilder<K, V> {
    pub(crate) initial_capacity: Option<usize>,
    pub(crate) maximum_size: Option<u64>,
    pub(crate) maximum_weight: Option<u64>,
    pub(crate) weigher: Option<Weigher<K, V>>,
    pub(crate) expire_after_write: Option<Duration>,
    pub(crate) expire_after_access: Option<Duration>,
    pub(crate) expiry: Option<Arc<dyn Expiry<K, V>>>,
    pub(crate) refresh_after_write: Option<Duration>,
    pub(crate) record_stats: bool,
    pub(crate) removal_listener: Option<RemovalListener<K, V>>,
    pub(crate) ticker: Arc<dyn Ticker>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) scheduler: Option<Arc<dyn Scheduler>>,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheBuilder<K, V> {
    pub fn new() -> Self {
        CacheBuilder {
            initial_capacity: None,
            maximum_size: None,
            maximum_weight: None,
            weigher: None,
            expire_after_write: None,
            expire_after_access: None,
            expiry: None,
            refresh_after_write: None,
            record_stats: false,
            removal_listener: None,
            ticker: Arc::new(SystemTicker::new()),
            executor: Arc::new(CallerRunsExecutor::new()),
            scheduler: None,
        }
    }

    /// Sizing hint for the initial table.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Bound the cache by entry count. Mutually exclusive with
    /// `maximum_weight`.
    pub fn maximum_size(mut self, maximum: u64) -> Self {
        self.maximum_size = Some(maximum);
        self
    }

    /// Bound the cache by total entry weight. Requires a `weigher`.
    pub fn maximum_weight(mut self, maximum: u64) -> Self {
        self.maximum_weight = Some(maximum);
        self
    }

    /// Per-entry cost function used with `maximum_weight`.
    pub fn weigher(mut self, weigher: impl Fn(&K, &V) -> u32 + Send + Sync + 'static) -> Self {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Expire entries a fixed duration after their last write.
    pub fn expire_after_write(mut self, duration: Duration) -> Self {
        self.expire_after_write = Some(duration);
        self
    }

    /// Expire entries a fixed duration after their last read or write.
    pub fn expire_after_access(mut self, duration: Duration) -> Self {
        self.expire_after_access = Some(duration);
        self
    }

    /// Per-entry variable expiration policy.
    pub fn expire_after(mut self, expiry: impl Expiry<K, V>) -> Self {
        self.expiry = Some(Arc::new(expiry));
        self
    }

    /// Asynchronously reload entries older than `duration` on access.
    /// Only meaningful for a loading cache.
    pub fn refresh_after_write(mut self, duration: Duration) -> Self {
        self.refresh_after_write = Some(duration);
        self
    }

    /// Enable hit/miss/load/eviction accounting.
    pub fn record_stats(mut self) -> Self {
        self.record_stats = true;
        self
    }

    /// Listener invoked once for every entry that leaves the cache.
    pub fn removal_listener(
        mut self,
        listener: impl Fn(K, V, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        self.removal_listener = Some(Arc::new(listener));
        self
    }

    /// Replace the clock, typically with a manual ticker in tests.
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    /// Replace the executor used for maintenance, notifications, and
    /// refresh loads.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Arm timed expiration wakeups through this scheduler.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    fn validate(&self, loading: bool) -> Result<()> {
        if self.maximum_size.is_some() && self.maximum_weight.is_some() {
            return Err(CacheError::InvalidArgument(
                "maximum_size and maximum_weight are mutually exclusive".to_string(),
            ));
        }
        if self.maximum_size == Some(0) || self.maximum_weight == Some(0) {
            return Err(CacheError::InvalidArgument(
                "capacity bound must be positive".to_string(),
            ));
        }
        if self.initial_capacity == Some(0) {
            return Err(CacheError::InvalidArgument(
                "initial_capacity must be positive".to_string(),
            ));
        }
        if self.maximum_weight.is_some() && self.weigher.is_none() {
            return Err(CacheError::InvalidState(
                "maximum_weight requires a weigher".to_string(),
            ));
        }
        if self.weigher.is_some() && self.maximum_weight.is_none() {
            return Err(CacheError::InvalidState(
                "a weigher requires maximum_weight".to_string(),
            ));
        }
        if self.refresh_after_write.is_some() && !loading {
            return Err(CacheError::InvalidState(
                "refresh_after_write requires a loader".to_string(),
            ));
        }
        Ok(())
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Build a manual cache.
    pub fn build(self) -> Result<Cache<K, V>> {
        self.validate(false)?;
        Ok(Cache {
            core: Arc::new(CacheCore::from_builder(self, None)),
        })
    }

    /// Build a read-through cache backed by `loader`.
    pub fn build_with_loader(
        self,
        loader: impl CacheLoader<K, V>,
    ) -> Result<LoadingCache<K, V>> {
        self.validate(true)?;
        Ok(LoadingCache {
            cache: Cache {
                core: Arc::new(CacheCore::from_builder(self, Some(Arc::new(loader)))),
            },
        })
    }
}
