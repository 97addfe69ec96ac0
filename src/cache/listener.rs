// # Removal Notification
//
// Every entry that leaves the map produces exactly one notification with
// the cause of its departure. Listeners run on the configured executor,
// off the mutator's critical path; a panicking listener is logged and
// suppressed so it can never fail a cache operation or halt maintenance.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::Executor;

/// Why an entry was removed from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovalCause {
    /// The entry was manually invalidated.
    Explicit,

    /// The entry's value was replaced by a write.
    Replaced,

    /// The entry was dropped by the runtime reclaiming its storage.
    ///
    /// Retained for interface completeness; this implementation owns its
    /// entries outright and never emits it.
    Collected,

    /// The entry's expiration deadline passed.
    Expired,

    /// The entry was evicted to honor the size or weight bound.
    Size,
}

impl RemovalCause {
    /// True when the removal was decided by the cache's own policies
    /// rather than requested by the caller.
    pub fn was_evicted(&self) -> bool {
        matches!(self, RemovalCause::Expired | RemovalCause::Size)
    }
}

/// Listener invoked once per removed entry with the departing key,
/// value, and cause.
pub type RemovalListener<K, V> = Arc<dyn Fn(K, V, RemovalCause) + Send + Sync>;

/// Submit one notification to the executor, isolating listener panics.
pub(crate) fn dispatch<K, V>(
    executor: &Arc<dyn Executor>,
    listener: &RemovalListener<K, V>,
    key: K,
    value: V,
    cause: RemovalCause,
) where
    K: Send + 'static,
    V: Send + 'static,
{
    let listener = Arc::clone(listener);
    executor.execute(Box::new(move || {
        if catch_unwind(AssertUnwindSafe(|| listener(key, value, cause))).is_err() {
            warn!(?cause, "removal listener panicked; notification dropped");
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CallerRunsExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_was_evicted() {
        assert!(RemovalCause::Expired.was_evicted());
        assert!(RemovalCause::Size.was_evicted());
        assert!(!RemovalCause::Explicit.was_evicted());
        assert!(!RemovalCause::Replaced.was_evicted());
        assert!(!RemovalCause::Collected.was_evicted());
    }

    #[test]
    fn test_dispatch_delivers() {
        let executor: Arc<dyn Executor> = Arc::new(CallerRunsExecutor::new());
        let seen: Arc<Mutex<Vec<(i32, &str, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let listener: RemovalListener<i32, &str> = Arc::new(move |k, v, cause| {
            sink.lock().unwrap().push((k, v, cause));
        });

        dispatch(&executor, &listener, 1, "a", RemovalCause::Explicit);
        dispatch(&executor, &listener, 2, "b", RemovalCause::Size);

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![(1, "a", RemovalCause::Explicit), (2, "b", RemovalCause::Size)]);
    }

    #[test]
    fn test_panicking_listener_is_suppressed() {
        let executor: Arc<dyn Executor> = Arc::new(CallerRunsExecutor::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let count = calls.clone();
        let listener: RemovalListener<i32, i32> = Arc::new(move |_, _, _| {
            count.fetch_add(1, Ordering::SeqCst);
            panic!("listener bug");
        });

        // Must not propagate the panic to the dispatching thread.
        dispatch(&executor, &listener, 1, 10, RemovalCause::Expired);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
