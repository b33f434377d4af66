//! End-to-end behaviour of the cache and coordinator with real metrics payloads.

use std::sync::Arc;
use std::time::Duration;

use ebios_cache::{MetricsCache, MetricsCacheSystem};
use ebios_core::{
    ChangeKind, EbiosCacheConfig, EbiosMetrics, InvalidationConfig, MetricsCacheConfig,
    MetricsCacheConfigUpdate,
};
use ebios_test_utils::fixtures::{sample_metrics, COLLECTIONS};
use ebios_test_utils::{init_test_tracing, key, CalcError, CountingCalculator};

type System = MetricsCacheSystem<EbiosMetrics, CalcError>;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn system(config: EbiosCacheConfig) -> System {
    init_test_tracing();
    System::init(config).expect("valid config")
}

#[tokio::test(start_paused = true)]
async fn test_entry_is_served_until_ttl_then_absent() {
    let system = system(EbiosCacheConfig::default());
    let m1 = key("m1");
    let metrics = sample_metrics(1);

    system
        .cache()
        .set_with_ttl(&m1, metrics.clone(), ms(1000))
        .expect("positive ttl");
    assert_eq!(system.cache().get(&m1), Some(metrics));

    tokio::time::advance(ms(1001)).await;
    assert_eq!(system.cache().get(&m1), None);
}

#[tokio::test(start_paused = true)]
async fn test_capacity_evicts_oldest_first() {
    let system = system(EbiosCacheConfig::default());
    let cache = system.cache();
    cache
        .update_config(&MetricsCacheConfigUpdate::new().max_entries(50))
        .expect("valid update");

    for i in 0..100u32 {
        cache.set(&key(&format!("mission-{i}")), sample_metrics(i));
        // Reads must not protect an entry from eviction.
        let _ = cache.get(&key("mission-0"));
    }

    assert_eq!(cache.len(), 50);
    assert!(!cache.contains(&key("mission-0")));
    assert!(!cache.contains(&key("mission-49")));
    assert!(cache.contains(&key("mission-50")));
    assert!(cache.contains(&key("mission-99")));
    assert_eq!(cache.stats().evictions, 50);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_compute_once() {
    let system = system(EbiosCacheConfig::default());
    let cache = system.cache().clone();
    let calc = CountingCalculator::succeeding(sample_metrics(42)).with_delay(ms(50));
    let x = key("x");

    let callers: Vec<_> = (0..3)
        .map(|_| {
            let cache = cache.clone();
            let calc = calc.clone();
            let x = x.clone();
            tokio::spawn(async move { cache.get_or_compute(&x, move || async move { calc.run().await }).await })
        })
        .collect();

    for caller in callers {
        let metrics = caller.await.expect("caller completes").expect("computation succeeds");
        assert_eq!(metrics.workshop1, sample_metrics(42).workshop1);
    }
    assert_eq!(calc.calls(), 1);
    assert!(cache.contains(&x));
}

#[tokio::test(start_paused = true)]
async fn test_two_changes_in_window_invalidate_once() {
    let system = system(EbiosCacheConfig::default());
    let s1 = key("s1");
    system.cache().set(&s1, sample_metrics(1));

    let coordinator = system.coordinator();
    coordinator.notify_changed(&s1, "businessValues", ChangeKind::Create);
    tokio::time::sleep(ms(200)).await;
    coordinator.notify_changed(&s1, "riskSources", ChangeKind::Update);

    tokio::time::sleep(ms(799)).await;
    assert!(system.cache().contains(&s1));

    tokio::time::sleep(ms(2)).await;
    assert!(!system.cache().contains(&s1));

    tokio::time::sleep(ms(2000)).await;
    let stats = coordinator.stats();
    assert_eq!(stats.batches_fired, 1);
    assert_eq!(stats.creates, 1);
    assert_eq!(stats.updates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_computation_leaves_cache_empty() {
    let system = system(EbiosCacheConfig::default());
    let cache: &MetricsCache<EbiosMetrics, CalcError> = system.cache();
    let k = key("k");

    let broken = CountingCalculator::failing("db down");
    let run = broken.clone();
    let err = cache
        .get_or_compute(&k, move || async move { run.run().await })
        .await
        .expect_err("computation fails");
    assert_eq!(err, CalcError::Unavailable("db down".to_string()));
    assert!(!cache.contains(&k));

    let working = Arc::new(CountingCalculator::succeeding(sample_metrics(2)));
    let metrics = cache
        .get_or_compute_with(&k, Arc::clone(&working))
        .await
        .expect("second computation succeeds");
    assert_eq!(cache.get(&k), Some(metrics));
    assert_eq!(working.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_write_path_sees_fresh_metrics_after_immediate_invalidation() {
    let config = EbiosCacheConfig {
        cache: MetricsCacheConfig::default(),
        invalidation: InvalidationConfig::default().with_eager_refresh(true),
    };
    let calc = Arc::new(CountingCalculator::succeeding(sample_metrics(1)));
    let system = system(config).with_calculator(calc.clone());
    let m = key("m");

    let first = system
        .cache()
        .get_or_compute_with(&m, Arc::clone(&calc))
        .await
        .expect("initial computation");
    assert_eq!(first.workshop1, sample_metrics(1).workshop1);

    for collection in COLLECTIONS {
        system.coordinator().notify_changed(&m, collection, ChangeKind::Update);
    }
    calc.set_result(Ok(sample_metrics(2)));
    system.coordinator().invalidate_immediately(&m);

    let fresh = system
        .cache()
        .get_or_compute_with(&m, Arc::clone(&calc))
        .await
        .expect("recomputation");
    assert_eq!(fresh.workshop1, sample_metrics(2).workshop1);

    // The cancelled batch never fires, so no eager refresh follows.
    tokio::time::sleep(ms(2000)).await;
    assert_eq!(calc.calls(), 2);
    assert_eq!(system.coordinator().stats().batches_fired, 0);
}

#[tokio::test(start_paused = true)]
async fn test_config_from_env_drives_system() {
    let config = EbiosCacheConfig::from_env_with(|name| match name {
        "EBIOS_CACHE_MAX_ENTRIES" => Some("2".to_string()),
        "EBIOS_INVALIDATION_DEBOUNCE_MS" => Some("250".to_string()),
        _ => None,
    })
    .expect("valid env config");
    let system = system(config);

    for id in ["a", "b", "c"] {
        system.cache().set(&key(id), sample_metrics(0));
    }
    assert_eq!(system.cache().len(), 2);

    system.coordinator().notify_changed(&key("c"), "missions", ChangeKind::Delete);
    tokio::time::sleep(ms(251)).await;
    assert!(!system.cache().contains(&key("c")));

    let report = system.dispose().await;
    assert_eq!(report.flushed, 0);
    assert_eq!(report.cleared, 1);
}
