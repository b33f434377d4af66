//! EBIOS Test Utilities
//!
//! Shared test infrastructure for the EBIOS cache workspace:
//! - Proptest generators for keys, change kinds and cache operations
//! - Mock calculators with call counting
//! - Metrics fixtures
//! - Test tracing setup

pub use ebios_core::{
    CacheError, ChangeKind, EbiosMetrics, EntityKey, GlobalMetrics, MetricsCalculator,
    Workshop1Metrics, Workshop2Metrics, Workshop3Metrics, Workshop4Metrics, Workshop5Metrics,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Build a key, panicking on invalid input. Test code only.
pub fn key(id: &str) -> EntityKey {
    EntityKey::new(id).expect("test key must be valid")
}

/// Initialize a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ebios_cache=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK CALCULATORS
// ============================================================================

/// Error type returned by the mock calculators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalcError {
    #[error("calculator unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

struct CalcInner<V> {
    result: Mutex<Result<V, CalcError>>,
    delay: Duration,
    calls: AtomicUsize,
}

/// Calculator returning a configured result after an optional delay.
///
/// Clones share the call counter and the configured result.
pub struct CountingCalculator<V> {
    inner: Arc<CalcInner<V>>,
}

impl<V> Clone for CountingCalculator<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> CountingCalculator<V> {
    fn with_result(result: Result<V, CalcError>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(CalcInner {
                result: Mutex::new(result),
                delay,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn succeeding(value: V) -> Self {
        Self::with_result(Ok(value), Duration::ZERO)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_result(Err(CalcError::Unavailable(message.to_string())), Duration::ZERO)
    }

    /// Rebuild with a delay. Call before cloning; clones made earlier keep the old state.
    pub fn with_delay(self, delay: Duration) -> Self {
        let result = self.current_result();
        Self::with_result(result, delay)
    }

    /// Change what later runs return.
    pub fn set_result(&self, result: Result<V, CalcError>) {
        *self.inner.result.lock().unwrap_or_else(PoisonError::into_inner) = result;
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// One computation: count, wait, return the configured result.
    pub async fn run(&self) -> Result<V, CalcError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if !self.inner.delay.is_zero() {
            tokio::time::sleep(self.inner.delay).await;
        }
        self.current_result()
    }

    fn current_result(&self) -> Result<V, CalcError> {
        self.inner
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> MetricsCalculator<V, CalcError> for CountingCalculator<V> {
    async fn compute(&self, _key: &EntityKey) -> Result<V, CalcError> {
        self.run().await
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Metrics objects shaped like a mission in progress.

    use super::*;

    /// Metrics for a study with `seed` driving the counts.
    pub fn sample_metrics(seed: u32) -> EbiosMetrics {
        let completion = f64::from(seed % 101);
        EbiosMetrics {
            workshop1: Workshop1Metrics {
                business_values_count: 3 + seed % 5,
                supporting_assets_count: 6 + seed % 7,
                dreaded_events_count: 2 + seed % 4,
                completion_rate: completion,
                conformity_score: 80.0,
            },
            workshop2: Workshop2Metrics {
                risk_sources_count: 4 + seed % 3,
                threat_actors_identified: 2,
                attack_methods_count: 5,
                completion_rate: completion,
                mitre_attack_coverage: 40.0,
                conformity_score: 70.0,
            },
            workshop3: Workshop3Metrics {
                strategic_scenarios_count: 3,
                operational_scenarios_count: 2,
                risk_level_distribution: [("high".to_string(), 1), ("medium".to_string(), 2)]
                    .into_iter()
                    .collect(),
                completion_rate: completion,
                conformity_score: 65.0,
            },
            workshop4: Workshop4Metrics::default(),
            workshop5: Workshop5Metrics::default(),
            global: GlobalMetrics {
                overall_completion_rate: completion,
                anssi_compliance_score: 68.0,
                risk_maturity_level: 3,
                last_calculation: chrono::Utc::now(),
                data_quality_score: 75.0,
            },
        }
    }

    /// Sub-resource names a write path reports.
    pub const COLLECTIONS: [&str; 6] = [
        "businessValues",
        "supportingAssets",
        "dreadedEvents",
        "riskSources",
        "strategicScenarios",
        "securityMeasures",
    ];
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use super::*;
    use proptest::prelude::*;

    /// Keys drawn from a small pool so operations collide often.
    pub fn arb_entity_key() -> impl Strategy<Value = EntityKey> {
        "m[0-9]{1,2}".prop_map(|id| key(&id))
    }

    pub fn arb_change_kind() -> impl Strategy<Value = ChangeKind> {
        prop_oneof![
            Just(ChangeKind::Create),
            Just(ChangeKind::Update),
            Just(ChangeKind::Delete),
        ]
    }

    pub fn arb_collection() -> impl Strategy<Value = String> {
        prop::sample::select(fixtures::COLLECTIONS.to_vec()).prop_map(str::to_string)
    }

    /// TTL in milliseconds, never zero.
    pub fn arb_ttl_ms() -> impl Strategy<Value = u64> {
        1u64..5_000
    }

    /// One step of a cache workload.
    #[derive(Debug, Clone)]
    pub enum CacheOp {
        Set { key: EntityKey, value: u32, ttl_ms: u64 },
        Get { key: EntityKey },
        Invalidate { key: EntityKey },
        Advance { ms: u64 },
    }

    pub fn arb_cache_op() -> impl Strategy<Value = CacheOp> {
        prop_oneof![
            4 => (arb_entity_key(), any::<u32>(), arb_ttl_ms())
                .prop_map(|(key, value, ttl_ms)| CacheOp::Set { key, value, ttl_ms }),
            3 => arb_entity_key().prop_map(|key| CacheOp::Get { key }),
            1 => arb_entity_key().prop_map(|key| CacheOp::Invalidate { key }),
            2 => (0u64..3_000).prop_map(|ms| CacheOp::Advance { ms }),
        ]
    }
}
