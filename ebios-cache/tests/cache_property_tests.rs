//! Property tests for expiry, the capacity bound, invalidation and
//! computation deduplication.

use std::collections::HashMap;
use std::time::Duration;

use ebios_cache::{CacheStore, Lookup, MetricsCache};
use ebios_core::{EntityKey, MetricsCacheConfig};
use ebios_test_utils::generators::{arb_cache_op, arb_entity_key, CacheOp};
use ebios_test_utils::{CalcError, CountingCalculator};
use proptest::prelude::*;
use tokio::time::Instant;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("build test runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// A hit is always the latest value written for the key, read before its deadline.
    #[test]
    fn prop_no_stale_hits(
        max_entries in 1usize..8,
        ops in prop::collection::vec(arb_cache_op(), 1..60),
    ) {
        let mut store: CacheStore<u32> = CacheStore::new(max_entries);
        let start = Instant::now();
        let mut now = start;
        let mut written: HashMap<EntityKey, (u32, Instant)> = HashMap::new();

        for op in ops {
            match op {
                CacheOp::Set { key, value, ttl_ms } => {
                    store.insert(key.clone(), value, Duration::from_millis(ttl_ms), now);
                    written.insert(key, (value, now + Duration::from_millis(ttl_ms)));
                }
                CacheOp::Get { key } => {
                    if let Lookup::Hit(value) = store.get(&key, now) {
                        let (expected, deadline) = written
                            .get(&key)
                            .copied()
                            .expect("hit for a key that was never written");
                        prop_assert_eq!(value, expected);
                        prop_assert!(now < deadline);
                    }
                }
                CacheOp::Invalidate { key } => {
                    store.remove(&key);
                    written.remove(&key);
                }
                CacheOp::Advance { ms } => {
                    now += Duration::from_millis(ms);
                }
            }
            prop_assert!(store.len() <= max_entries);
        }
    }

    /// The entry count never exceeds `max_entries`, also after lowering it.
    #[test]
    fn prop_capacity_bound(
        max_entries in 1usize..10,
        lowered in 1usize..10,
        keys in prop::collection::vec(arb_entity_key(), 1..80),
    ) {
        let mut store: CacheStore<usize> = CacheStore::new(max_entries);
        let now = Instant::now();
        for (i, key) in keys.iter().enumerate() {
            store.insert(key.clone(), i, Duration::from_secs(60), now);
            prop_assert!(store.len() <= max_entries);
        }

        store.set_max_entries(lowered);
        prop_assert!(store.len() <= lowered);
        prop_assert_eq!(store.keys_by_age().count(), store.len());
    }

    /// Invalidating twice leaves the same state as invalidating once.
    #[test]
    fn prop_invalidate_is_idempotent(
        keys in prop::collection::vec(arb_entity_key(), 1..20),
        target in arb_entity_key(),
    ) {
        let cache: MetricsCache<u32, CalcError> = MetricsCache::with_defaults();
        for (i, key) in keys.iter().enumerate() {
            cache.set(key, i as u32);
        }

        cache.invalidate(&target);
        let after_once = cache.len();
        prop_assert!(!cache.invalidate(&target));
        prop_assert_eq!(cache.len(), after_once);
        prop_assert_eq!(cache.get(&target), None);
    }

    /// However many callers arrive during a computation, it runs once.
    #[test]
    fn prop_concurrent_callers_share_computation(callers in 1usize..12, key in arb_entity_key()) {
        let runtime = paused_runtime();
        let (results, calls) = runtime.block_on(async {
            let cache: MetricsCache<u32, CalcError> =
                MetricsCache::new(MetricsCacheConfig::default()).expect("valid config");
            let calc = CountingCalculator::succeeding(42).with_delay(Duration::from_millis(50));

            let waits = (0..callers).map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                let calc = calc.clone();
                tokio::spawn(async move {
                    cache.get_or_compute(&key, move || async move { calc.run().await }).await
                })
            });
            let handles: Vec<_> = waits.collect();

            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(handle.await.expect("caller task completes"));
            }
            (results, calc.calls())
        });

        prop_assert_eq!(calls, 1);
        prop_assert!(results.iter().all(|result| result == &Ok(42)));
    }

    /// Failed computations leave nothing behind.
    #[test]
    fn prop_failures_are_not_cached(attempts in 1usize..5, key in arb_entity_key()) {
        let runtime = paused_runtime();
        runtime.block_on(async {
            let cache: MetricsCache<u32, CalcError> = MetricsCache::with_defaults();
            let calc = CountingCalculator::<u32>::failing("db down");

            for _ in 0..attempts {
                let run = calc.clone();
                let result = cache.get_or_compute(&key, move || async move { run.run().await }).await;
                assert!(result.is_err());
                assert_eq!(cache.get(&key), None);
            }
            assert_eq!(calc.calls(), attempts);
        });
    }
}
