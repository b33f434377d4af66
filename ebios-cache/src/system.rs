//! Composition root wiring the cache, the coordinator and the sweep.

use std::sync::Arc;

use ebios_core::{CacheError, EbiosCacheConfig, EbiosResult, MetricsCalculator};

use crate::invalidation::InvalidationCoordinator;
use crate::jitter::{JitterSource, NoJitter, RandomJitter};
use crate::maintenance::{spawn_cleanup_task, CleanupHandle, CleanupSummary};
use crate::metrics_cache::MetricsCache;

/// What [`MetricsCacheSystem::dispose`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisposeReport {
    /// Pending batches fired during shutdown.
    pub flushed: usize,
    /// Entries dropped from the cache.
    pub cleared: usize,
    pub cleanup: CleanupSummary,
}

/// One cache, its invalidation coordinator and its periodic sweep.
///
/// Owns the instances an application would otherwise keep as globals.
/// Hand out clones of [`MetricsCacheSystem::cache`] and
/// [`MetricsCacheSystem::coordinator`] to the code that needs them.
pub struct MetricsCacheSystem<V, E> {
    cache: MetricsCache<V, E>,
    coordinator: InvalidationCoordinator<V, E>,
    cleanup: CleanupHandle,
}

impl<V, E> MetricsCacheSystem<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + From<CacheError> + Send + Sync + 'static,
{
    /// Build every component from one validated configuration.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn init(config: EbiosCacheConfig) -> EbiosResult<Self> {
        let jitter: Arc<dyn JitterSource> = if config.cache.ttl_jitter > 0.0 {
            Arc::new(RandomJitter)
        } else {
            Arc::new(NoJitter)
        };
        Self::init_with_jitter(config, jitter)
    }

    /// [`MetricsCacheSystem::init`] with an explicit jitter source.
    pub fn init_with_jitter(config: EbiosCacheConfig, jitter: Arc<dyn JitterSource>) -> EbiosResult<Self> {
        config.validate()?;
        let cleanup_interval = config.cache.cleanup_interval;

        let cache = MetricsCache::with_jitter(config.cache, jitter)?;
        let coordinator = InvalidationCoordinator::new(cache.clone(), config.invalidation)?;
        let cleanup = spawn_cleanup_task(cache.clone(), cleanup_interval)?;

        tracing::info!("metrics cache system initialized");
        Ok(Self {
            cache,
            coordinator,
            cleanup,
        })
    }

    /// Attach the calculator used for eager refresh.
    pub fn with_calculator(mut self, calculator: Arc<dyn MetricsCalculator<V, E>>) -> Self {
        self.coordinator = self.coordinator.with_calculator(calculator);
        self
    }

    pub fn cache(&self) -> &MetricsCache<V, E> {
        &self.cache
    }

    pub fn coordinator(&self) -> &InvalidationCoordinator<V, E> {
        &self.coordinator
    }

    /// Flush pending invalidations, stop the sweep and empty the cache.
    pub async fn dispose(self) -> DisposeReport {
        let flushed = self.coordinator.shutdown();
        let cleanup = self.cleanup.stop().await;
        let cleared = self.cache.invalidate_all();

        let report = DisposeReport {
            flushed,
            cleared,
            cleanup,
        };
        tracing::info!(flushed, cleared, "metrics cache system disposed");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebios_core::{ChangeKind, EbiosError, InvalidationConfig, MetricsCacheConfig};
    use ebios_test_utils::{key, CalcError, CountingCalculator};
    use std::time::Duration;

    type TestSystem = MetricsCacheSystem<i32, CalcError>;

    #[tokio::test(start_paused = true)]
    async fn test_init_wires_components() {
        let system = TestSystem::init(EbiosCacheConfig::default()).expect("valid config");
        let m = key("m");

        system.cache().set(&m, 1);
        system
            .coordinator()
            .notify_changed(&m, "businessValues", ChangeKind::Update);
        tokio::time::sleep(Duration::from_millis(1001)).await;

        assert_eq!(system.cache().get(&m), None);
        system.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_flushes_and_clears() {
        let system = TestSystem::init(EbiosCacheConfig::default()).expect("valid config");
        let cache = system.cache().clone();
        cache.set(&key("a"), 1);
        cache.set(&key("b"), 2);
        system
            .coordinator()
            .notify_changed(&key("a"), "missions", ChangeKind::Delete);

        let report = system.dispose().await;
        assert_eq!(report.flushed, 1);
        assert_eq!(report.cleared, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_refresh_through_system() {
        let config = EbiosCacheConfig {
            cache: MetricsCacheConfig::default(),
            invalidation: InvalidationConfig::default().with_eager_refresh(true),
        };
        let calc = Arc::new(CountingCalculator::succeeding(5));
        let system = TestSystem::init(config)
            .expect("valid config")
            .with_calculator(calc.clone());
        let m = key("m");

        system.coordinator().notify_changed(&m, "riskSources", ChangeKind::Create);
        tokio::time::sleep(Duration::from_millis(1010)).await;

        assert_eq!(system.cache().get(&m), Some(5));
        assert_eq!(calc.calls(), 1);
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let config = EbiosCacheConfig {
            cache: MetricsCacheConfig::default().with_max_entries(0),
            invalidation: InvalidationConfig::default(),
        };
        let result = TestSystem::init(config);
        assert!(matches!(result, Err(EbiosError::Config(_))));
    }
}
