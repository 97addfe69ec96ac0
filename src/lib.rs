// RustyCache - concurrent in-process caching engine
// Core library module

pub mod cache;
pub mod common;
pub mod error;

pub(crate) mod maintenance;
pub(crate) mod map;
pub(crate) mod policy;

pub use cache::{
    Cache, CacheBuilder, CacheIter, CacheLoader, CacheStats, EntryView, Expiry, LoadingCache,
    RemovalCause, RemovalListener, Weigher,
};
pub use common::{
    CallerRunsExecutor, DeferredExecutor, Executor, ManualTicker, Scheduler, SystemTicker,
    ThreadScheduler, Ticker,
};
pub use error::{BoxError, CacheError, Result};
