// Comprehensive Cache Engine Integration Tests
// Test ID Format: CACHE-XXX

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rusty_cache::{
    Cache, CacheBuilder, DeferredExecutor, LoadingCache, ManualTicker, RemovalCause,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// CACHE-001: Borrowed-form lookups share one equality family with the
// owned key type.
#[test]
fn test_cache_001_key_family_containment() {
    let cache: Cache<String, u32> = CacheBuilder::new().build().unwrap();
    for i in 0..500 {
        cache.put(format!("ci-{i}"), i);
    }

    for i in 0..500 {
        let owned = format!("ci-{i}");
        assert!(cache.contains_key(&owned), "owned lookup failed for {i}");
        assert!(
            cache.contains_key(owned.as_str()),
            "borrowed lookup failed for {i}"
        );
    }

    println!("CACHE-001: PASSED - 500 keys visible through both key forms");
}

// CACHE-002: Expiration after access with a manual clock, including the
// EXPIRED notification.
#[test]
fn test_cache_002_expire_after_access() {
    init_tracing();
    let ticker = Arc::new(ManualTicker::new());
    let events: Arc<Mutex<Vec<(u32, String, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let cache: Cache<u32, String> = CacheBuilder::new()
        .expire_after_access(Duration::from_millis(100))
        .ticker(ticker.clone())
        .removal_listener(move |k, v, cause| sink.lock().unwrap().push((k, v, cause)))
        .build()
        .unwrap();

    cache.put(1, "A".to_string());

    ticker.advance(Duration::from_millis(50));
    assert_eq!(cache.get(&1), Some("A".to_string()));

    ticker.advance(Duration::from_millis(110));
    assert_eq!(cache.get(&1), None);
    cache.clean_up();

    assert_eq!(cache.estimated_size(), 0);
    let events = events.lock().unwrap();
    assert_eq!(*events, vec![(1, "A".to_string(), RemovalCause::Expired)]);

    println!("CACHE-002: PASSED - entry expired at 160ms with EXPIRED notification");
}

// CACHE-003: Size-bounded admission holds the bound exactly after a
// forced maintenance pass.
#[test]
fn test_cache_003_size_bounded_admission() {
    let cache: Cache<u32, u32> = CacheBuilder::new()
        .maximum_size(100)
        .record_stats()
        .build()
        .unwrap();

    for i in 1..=200 {
        cache.put(i, i);
    }
    cache.clean_up();

    assert_eq!(cache.estimated_size(), 100);
    assert_eq!(cache.stats().eviction_count, 100);

    println!("CACHE-003: PASSED - 200 inserts settled at exactly 100 entries");
}

// CACHE-004: Frequently accessed entries survive a flood of one-hit
// insertions (admission filter at work).
#[test]
fn test_cache_004_hot_set_retention() {
    let cache: Cache<u32, u32> = CacheBuilder::new().maximum_size(50).build().unwrap();

    for i in 0..20 {
        cache.put(i, i);
    }
    // Establish popularity.
    for _ in 0..10 {
        for i in 0..20 {
            cache.get(&i);
        }
        cache.clean_up();
    }
    // Flood with cold keys.
    for i in 1000..1400 {
        cache.put(i, i);
        cache.clean_up();
    }

    let survivors = (0..20).filter(|i| cache.contains_key(i)).count();
    assert!(
        survivors >= 15,
        "hot set displaced by one-hit wonders: {survivors}/20 survived"
    );

    println!("CACHE-004: PASSED - {survivors}/20 hot entries retained under flood");
}

// CACHE-005: Write-through entry views reach the map.
#[test]
fn test_cache_005_write_through_view() {
    let cache: Cache<String, String> = CacheBuilder::new().build().unwrap();
    for i in 0..20 {
        cache.put(format!("k{i}"), format!("v{i}"));
    }

    let view = cache.iter().next().expect("populated cache yields a view");
    let captured = view.key().clone();

    // Remove some other key between capturing and writing.
    let other = (0..20)
        .map(|i| format!("k{i}"))
        .find(|k| *k != captured)
        .unwrap();
    cache.invalidate(other.as_str());

    view.set_value("XYZ".to_string());
    assert!(cache.contains_value(&"XYZ".to_string()));
    assert_eq!(cache.get(captured.as_str()), Some("XYZ".to_string()));

    println!("CACHE-005: PASSED - setValue on a captured view wrote through");
}

// CACHE-006: Reentrant compute on the same stripe is rejected and the
// outer state is preserved.
#[test]
fn test_cache_006_reentrant_compute_rejected() {
    let cache: Arc<Cache<String, u32>> = Arc::new(CacheBuilder::new().build().unwrap());

    let inner = cache.clone();
    let result = cache.compute("outer".to_string(), move |_, _| {
        // Same key, therefore the same stripe's lock chain.
        let nested = inner.compute("outer".to_string(), |_, _| Some(99));
        assert!(nested.is_err(), "reentrant compute must fail");
        // Abandon the outer computation as well.
        None
    });

    assert_eq!(result.unwrap(), None);
    assert!(!cache.contains_key("outer"));
    assert_eq!(cache.estimated_size(), 0);

    println!("CACHE-006: PASSED - reentrant compute rejected, map unchanged");
}

// CACHE-007: Refresh coalescing - many stale reads trigger at most one
// reload, and all of them observe the pre-refresh value.
#[test]
fn test_cache_007_refresh_coalescing() {
    init_tracing();
    let ticker = Arc::new(ManualTicker::new());
    let executor = Arc::new(DeferredExecutor::new());
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();

    let cache: LoadingCache<u32, String> = CacheBuilder::new()
        .refresh_after_write(Duration::from_millis(1))
        .ticker(ticker.clone())
        .executor(executor.clone())
        .build_with_loader(move |key: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("fresh-{key}"))
        })
        .unwrap();

    cache.put(1, "v0".to_string());
    executor.run_pending();
    ticker.advance(Duration::from_millis(2));

    let handle: &Cache<u32, String> = &cache;
    for _ in 0..1000 {
        assert_eq!(handle.get(&1), Some("v0".to_string()));
    }
    assert_eq!(loads.load(Ordering::SeqCst), 0, "reads must not block on a reload");

    executor.run_pending();
    assert_eq!(loads.load(Ordering::SeqCst), 1, "reloads must coalesce");
    assert_eq!(handle.get(&1), Some("fresh-1".to_string()));

    println!("CACHE-007: PASSED - 1000 stale reads coalesced into one reload");
}

// CACHE-008: Invalidation is idempotent in observable effects.
#[test]
fn test_cache_008_idempotent_invalidation() {
    let events = Arc::new(AtomicUsize::new(0));
    let sink = events.clone();
    let cache: Cache<u32, u32> = CacheBuilder::new()
        .removal_listener(move |_, _, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    cache.put(1, 10);
    assert_eq!(cache.invalidate(&1), Some(10));
    assert_eq!(cache.invalidate(&1), None);
    assert_eq!(cache.invalidate(&1), None);
    cache.clean_up();

    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert!(cache.is_empty());

    println!("CACHE-008: PASSED - repeated invalidation emitted one notification");
}

// CACHE-009: put_all round-trip returns every inserted value.
#[test]
fn test_cache_009_put_all_round_trip() {
    let cache: Cache<String, u64> = CacheBuilder::new().build().unwrap();
    let entries: Vec<(String, u64)> = (0..100).map(|i| (format!("key-{i}"), i * 7)).collect();

    cache.put_all(entries.clone());
    for (key, value) in &entries {
        assert_eq!(cache.get(key.as_str()), Some(*value));
    }

    let present = cache.get_all_present(entries.iter().map(|(k, _)| k.clone()));
    assert_eq!(present.len(), 100);

    println!("CACHE-009: PASSED - 100 entries round-tripped");
}

// CACHE-010: Exactly one notification per departed entry with the
// correct cause, across explicit, replaced, size, and expired paths.
#[test]
fn test_cache_010_listener_completeness() {
    let ticker = Arc::new(ManualTicker::new());
    let events: Arc<Mutex<Vec<(u32, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let cache: Cache<u32, u32> = CacheBuilder::new()
        .maximum_size(4)
        .expire_after_write(Duration::from_secs(10))
        .ticker(ticker.clone())
        .removal_listener(move |k, _, cause| sink.lock().unwrap().push((k, cause)))
        .build()
        .unwrap();

    cache.put(1, 10);
    cache.put(1, 11); // -> Replaced
    cache.invalidate(&1); // -> Explicit

    for i in 2..=10 {
        cache.put(i, i); // overflow -> Size evictions
    }
    cache.clean_up();

    ticker.advance(Duration::from_secs(11));
    cache.clean_up(); // survivors -> Expired

    let events = events.lock().unwrap();
    let replaced = events.iter().filter(|(_, c)| *c == RemovalCause::Replaced).count();
    let explicit = events.iter().filter(|(_, c)| *c == RemovalCause::Explicit).count();
    let size = events.iter().filter(|(_, c)| *c == RemovalCause::Size).count();
    let expired = events.iter().filter(|(_, c)| *c == RemovalCause::Expired).count();

    assert_eq!(replaced, 1);
    assert_eq!(explicit, 1);
    assert_eq!(size, 5);
    assert_eq!(expired, 4);
    // One notification per departure: 1 replace + 1 explicit + 9 entries
    // that either got evicted or expired.
    assert_eq!(events.len(), 11);
    assert!(cache.is_empty());

    println!("CACHE-010: PASSED - every departure produced exactly one notification");
}

// CACHE-011: Weight bound holds after cleanup with a custom weigher.
#[test]
fn test_cache_011_weight_bound() {
    let cache: Cache<u32, Vec<u8>> = CacheBuilder::new()
        .maximum_weight(1000)
        .weigher(|_, v: &Vec<u8>| v.len() as u32)
        .record_stats()
        .build()
        .unwrap();

    for i in 0..100 {
        cache.put(i, vec![0u8; 100]);
    }
    cache.clean_up();

    let live_weight: usize = cache.values().iter().map(|v| v.len()).sum();
    assert!(live_weight <= 1000, "weight bound violated: {live_weight}");
    assert!(cache.stats().eviction_weight >= 9000);

    println!("CACHE-011: PASSED - total weight {live_weight} <= 1000 after cleanup");
}

// CACHE-012: Concurrent mixed workload keeps the map consistent and the
// happens-before contract: a completed put is eventually visible.
#[test]
fn test_cache_012_concurrent_consistency() {
    let cache: Cache<u32, u32> = CacheBuilder::new().build().unwrap();
    let mut handles = vec![];

    for t in 0..8u32 {
        let cache = cache.clone();
        handles.push(thread::spawn(move || {
            for i in 0..500u32 {
                let key = t * 1000 + i;
                cache.put(key, key);
                assert_eq!(cache.get(&key), Some(key), "own write not visible");
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    cache.clean_up();
    assert_eq!(cache.estimated_size(), 4000);
    for t in 0..8u32 {
        for i in 0..500u32 {
            let key = t * 1000 + i;
            assert_eq!(cache.get(&key), Some(key));
        }
    }

    println!("CACHE-012: PASSED - 4000 concurrent writes all visible");
}

// CACHE-013: Compute result is immediately observable (atomicity
// contract), including the removal case.
#[test]
fn test_cache_013_compute_observability() {
    let cache: Cache<String, u32> = CacheBuilder::new().build().unwrap();

    let r = cache.compute("k".to_string(), |_, v| {
        assert!(v.is_none());
        Some(7)
    });
    assert_eq!(r.unwrap(), Some(7));
    assert_eq!(cache.get("k"), Some(7));

    let r = cache.compute("k".to_string(), |_, v| v.map(|v| v * 2));
    assert_eq!(r.unwrap(), Some(14));
    assert_eq!(cache.get("k"), Some(14));

    let r = cache.compute("k".to_string(), |_, _| None);
    assert_eq!(r.unwrap(), None);
    assert_eq!(cache.get("k"), None);

    println!("CACHE-013: PASSED - compute results immediately visible");
}

// CACHE-014: Loader failures propagate to the caller, leave no mapping,
// and are visible in statistics.
#[test]
fn test_cache_014_loader_failure_isolation() {
    let cache: LoadingCache<u32, String> = CacheBuilder::new()
        .record_stats()
        .build_with_loader(|key: &u32| {
            if key % 2 == 0 {
                Ok(format!("even-{key}"))
            } else {
                Err(format!("odd key {key} rejected").into())
            }
        })
        .unwrap();

    assert_eq!(cache.get(&2).unwrap(), "even-2");
    assert!(cache.get(&3).unwrap_err().is_loader_failure());
    assert!(!cache.contains_key(&3));

    let stats = cache.stats();
    assert_eq!(stats.load_success_count, 1);
    assert_eq!(stats.load_failure_count, 1);

    println!("CACHE-014: PASSED - loader failure surfaced without corrupting the map");
}

// CACHE-015: Statistics snapshots serialize for external monitoring.
#[test]
fn test_cache_015_stats_serialization() {
    let cache: Cache<u32, u32> = CacheBuilder::new().record_stats().build().unwrap();
    cache.put(1, 1);
    cache.get(&1);
    cache.get(&2);

    let stats = cache.stats();
    let json = serde_json::to_string(&stats).unwrap();
    let parsed: rusty_cache::CacheStats = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, stats);
    assert_eq!(parsed.hit_count, 1);
    assert_eq!(parsed.miss_count, 1);

    println!("CACHE-015: PASSED - stats snapshot survived a JSON round trip");
}

// CACHE-016: Variable per-entry expiry honors immediate, finite, and
// eternal deadlines together with read extension.
#[test]
fn test_cache_016_variable_expiry_modes() {
    struct PerValue;
    impl rusty_cache::Expiry<u32, u64> for PerValue {
        fn expire_after_create(&self, _key: &u32, value: &u64) -> Duration {
            if *value == 0 {
                Duration::ZERO
            } else if *value == u64::MAX {
                Duration::MAX
            } else {
                Duration::from_millis(*value)
            }
        }

        fn expire_after_read(&self, _key: &u32, value: &u64) -> Option<Duration> {
            // Reading a finite entry renews its full lifetime.
            (*value != 0 && *value != u64::MAX).then(|| Duration::from_millis(*value))
        }
    }

    let ticker = Arc::new(ManualTicker::new());
    let cache: Cache<u32, u64> = CacheBuilder::new()
        .expire_after(PerValue)
        .ticker(ticker.clone())
        .build()
        .unwrap();

    cache.put(1, 0); // immediate
    cache.put(2, 100); // finite
    cache.put(3, u64::MAX); // eternal

    assert_eq!(cache.get(&1), None);

    ticker.advance(Duration::from_millis(60));
    assert_eq!(cache.get(&2), Some(100)); // renewed to t=160

    ticker.advance(Duration::from_millis(90));
    assert_eq!(cache.get(&2), Some(100), "read renewal ignored");

    ticker.advance(Duration::from_millis(200));
    assert_eq!(cache.get(&2), None);
    assert_eq!(cache.get(&3), Some(u64::MAX));

    cache.clean_up();
    assert_eq!(cache.estimated_size(), 1);

    println!("CACHE-016: PASSED - immediate/finite/eternal deadlines honored");
}

// CACHE-017: invalidate_iter removes exactly the listed keys.
#[test]
fn test_cache_017_bulk_invalidation() {
    let cache: Cache<u32, u32> = CacheBuilder::new().build().unwrap();
    for i in 0..50 {
        cache.put(i, i);
    }

    cache.invalidate_iter(0..25);
    cache.clean_up();

    assert_eq!(cache.estimated_size(), 25);
    assert!(!cache.contains_key(&10));
    assert!(cache.contains_key(&30));

    println!("CACHE-017: PASSED - bulk invalidation removed the listed half");
}

// CACHE-018: Manual refresh on a loading cache installs the reload only
// when the entry was not concurrently rewritten.
#[test]
fn test_cache_018_manual_refresh_conditional_install() {
    let ticker = Arc::new(ManualTicker::new());
    let executor = Arc::new(DeferredExecutor::new());
    let cache: LoadingCache<u32, String> = CacheBuilder::new()
        .ticker(ticker.clone())
        .executor(executor.clone())
        .build_with_loader(|key: &u32| Ok(format!("loaded-{key}")))
        .unwrap();

    cache.put(1, "original".to_string());
    executor.run_pending();

    // Refresh begins, then the entry is rewritten before the reload
    // lands: the reload must be discarded.
    cache.refresh(&1);
    ticker.advance(Duration::from_millis(1));
    cache.put(1, "newer".to_string());
    executor.run_pending();
    let handle: &Cache<u32, String> = &cache;
    assert_eq!(handle.get(&1), Some("newer".to_string()));

    // An undisturbed refresh replaces the value.
    cache.refresh(&1);
    executor.run_pending();
    assert_eq!(handle.get(&1), Some("loaded-1".to_string()));

    println!("CACHE-018: PASSED - refresh installed conditionally on write time");
}
