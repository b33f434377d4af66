//! Shared metrics cache with single-flight computation.
//!
//! [`MetricsCache`] is a cheap-to-clone handle over one [`CacheStore`]. All
//! store access happens under a mutex that is never held across an `.await`
//! or while caller code runs, so the synchronous operations stay atomic with
//! respect to each other.
//!
//! # Example
//!
//! ```ignore
//! let cache: MetricsCache<EbiosMetrics, AppError> = MetricsCache::new(config)?;
//!
//! // Concurrent callers for the same key share one computation.
//! let metrics = cache
//!     .get_or_compute(&key, || async move { calculator.compute(&key).await })
//!     .await?;
//!
//! // A write path that needs the next read to be fresh.
//! cache.invalidate(&key);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ebios_core::{
    CacheError, ConfigError, EntityKey, MetricsCacheConfig, MetricsCacheConfigUpdate,
    MetricsCalculator,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::jitter::{jittered_ttl, JitterSource, NoJitter};
use crate::stats::CacheStats;
use crate::store::{CacheStore, Lookup};

type SharedComputation<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

/// A computation other callers can attach to.
struct InFlight<V, E> {
    id: u64,
    future: SharedComputation<V, E>,
}

struct CacheState<V, E> {
    store: CacheStore<V>,
    config: MetricsCacheConfig,
    stats: CacheStats,
    in_flight: HashMap<EntityKey, InFlight<V, E>>,
    next_flight_id: u64,
}

impl<V: Clone, E> CacheState<V, E> {
    fn lookup(&mut self, key: &EntityKey, now: Instant) -> Option<V> {
        match self.store.get(key, now) {
            Lookup::Hit(value) => {
                self.stats.hits += 1;
                tracing::trace!(key = %key, "metrics cache hit");
                Some(value)
            }
            Lookup::Expired => {
                self.stats.misses += 1;
                self.stats.expirations += 1;
                tracing::debug!(key = %key, "metrics cache entry expired");
                None
            }
            Lookup::Miss => {
                self.stats.misses += 1;
                tracing::trace!(key = %key, "metrics cache miss");
                None
            }
        }
    }

    fn insert(&mut self, key: EntityKey, value: V, ttl: Duration, now: Instant) {
        let evicted = self.store.insert(key, value, ttl, now);
        self.record_evictions(&evicted);
    }

    fn record_evictions(&mut self, evicted: &[EntityKey]) {
        self.stats.evictions += evicted.len() as u64;
        for key in evicted {
            tracing::debug!(key = %key, "evicted oldest metrics entry");
        }
    }
}

struct Inner<V, E> {
    state: Mutex<CacheState<V, E>>,
    jitter: Arc<dyn JitterSource>,
}

/// A value already cached, a computation to wait on, or a slot this caller
/// reserved and must fill.
enum Pending<V, E> {
    Ready(V),
    Running(SharedComputation<V, E>),
    Reserved(Reservation<V, E>),
}

/// An in-flight slot registered before its task exists. Waiters that join
/// early block on `handle_tx` until the task is spawned.
struct Reservation<V, E> {
    id: u64,
    runtime: Handle,
    handle_tx: oneshot::Sender<JoinHandle<Result<V, E>>>,
    computation: SharedComputation<V, E>,
}

/// In-process cache of computed metrics keyed by entity.
///
/// Entries expire after their TTL and the total entry count is bounded;
/// when full, the oldest inserted entry is evicted. Cloning the handle
/// shares the underlying cache.
pub struct MetricsCache<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for MetricsCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> MetricsCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a cache with the given configuration and no TTL jitter source.
    pub fn new(config: MetricsCacheConfig) -> Result<Self, ConfigError> {
        Self::with_jitter(config, Arc::new(NoJitter))
    }

    /// Create a cache with default configuration.
    pub fn with_defaults() -> Self {
        Self::build(MetricsCacheConfig::default(), Arc::new(NoJitter))
    }

    /// Create a cache that draws default-TTL jitter from `jitter`.
    pub fn with_jitter(
        config: MetricsCacheConfig,
        jitter: Arc<dyn JitterSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, jitter))
    }

    fn build(config: MetricsCacheConfig, jitter: Arc<dyn JitterSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CacheState {
                    store: CacheStore::new(config.max_entries),
                    config,
                    stats: CacheStats::default(),
                    in_flight: HashMap::new(),
                    next_flight_id: 0,
                }),
                jitter,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V, E>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn default_ttl(&self, config: &MetricsCacheConfig) -> Duration {
        jittered_ttl(config.default_ttl, config.ttl_jitter, self.inner.jitter.as_ref())
    }

    /// Get the cached value for `key`, or `None` on miss or expiry.
    ///
    /// An expired entry is removed as a side effect. Never computes.
    pub fn get(&self, key: &EntityKey) -> Option<V> {
        self.lock().lookup(key, Instant::now())
    }

    /// Whether a live entry exists. Does not touch the hit/miss counters.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.lock().store.contains(key, Instant::now())
    }

    /// Store `value` under `key` with the default TTL.
    pub fn set(&self, key: &EntityKey, value: V) {
        let mut state = self.lock();
        let ttl = self.default_ttl(&state.config);
        state.insert(key.clone(), value, ttl, Instant::now());
    }

    /// Store `value` under `key` with an explicit TTL.
    pub fn set_with_ttl(&self, key: &EntityKey, value: V, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl {
                key: key.to_string(),
            });
        }
        self.lock().insert(key.clone(), value, ttl, Instant::now());
        Ok(())
    }

    /// Remove `key`. Returns whether an entry was present.
    ///
    /// A computation in flight for `key` is detached: its waiters still get
    /// its result, but the result is not stored and later callers start a
    /// fresh computation.
    pub fn invalidate(&self, key: &EntityKey) -> bool {
        let mut state = self.lock();
        let detached = state.in_flight.remove(key).is_some();
        let removed = state.store.remove(key).is_some();
        tracing::debug!(key = %key, removed, detached, "invalidated metrics entry");
        removed
    }

    /// Remove every entry and detach every computation in flight.
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.lock();
        state.in_flight.clear();
        let removed = state.store.clear();
        tracing::info!(removed, "invalidated all metrics entries");
        removed
    }

    /// Sweep expired entries, returning how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut state = self.lock();
        let removed = state.store.purge_expired(Instant::now());
        state.stats.expirations += removed as u64;
        if removed > 0 {
            tracing::debug!(removed, "removed expired metrics entries");
        }
        removed
    }

    /// Merge `update` into the configuration.
    ///
    /// The merged configuration is validated before anything changes. A
    /// lower `max_entries` evicts the oldest entries immediately.
    pub fn update_config(&self, update: &MetricsCacheConfigUpdate) -> Result<(), ConfigError> {
        let mut state = self.lock();
        let merged = update.apply_to(&state.config)?;
        let evicted = state.store.set_max_entries(merged.max_entries);
        state.record_evictions(&evicted);
        state.config = merged;
        tracing::info!(
            default_ttl_ms = state.config.default_ttl.as_millis() as u64,
            max_entries = state.config.max_entries,
            evicted = evicted.len(),
            "metrics cache configuration updated"
        );
        Ok(())
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> MetricsCacheConfig {
        self.lock().config.clone()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            cache_size: state.store.len(),
            ..state.stats.clone()
        }
    }

    /// Zero every counter. The cache contents are unaffected.
    pub fn reset_stats(&self) {
        self.lock().stats = CacheStats::default();
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().store.is_empty()
    }

    /// Whether a computation for `key` is currently attached.
    pub fn is_computing(&self, key: &EntityKey) -> bool {
        self.lock().in_flight.contains_key(key)
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// At most one computation per key runs at a time: callers arriving
    /// while one is in flight wait for it and receive a clone of its result.
    /// The computation runs on its own Tokio task, so it completes and fills
    /// the cache even if every caller stops waiting. Failures are returned to
    /// every waiter unchanged and are never cached.
    ///
    /// Must be awaited inside a Tokio runtime.
    pub async fn get_or_compute<F, Fut>(&self, key: &EntityKey, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: From<CacheError>,
    {
        self.compute_shared(key, None, compute).await
    }

    /// [`MetricsCache::get_or_compute`] with an explicit TTL for the stored result.
    pub async fn get_or_compute_with_ttl<F, Fut>(
        &self,
        key: &EntityKey,
        ttl: Duration,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: From<CacheError>,
    {
        if ttl.is_zero() {
            return Err(E::from(CacheError::InvalidTtl {
                key: key.to_string(),
            }));
        }
        self.compute_shared(key, Some(ttl), compute).await
    }

    /// [`MetricsCache::get_or_compute`] backed by a calculator.
    pub async fn get_or_compute_with<C>(&self, key: &EntityKey, calculator: Arc<C>) -> Result<V, E>
    where
        C: MetricsCalculator<V, E> + ?Sized + 'static,
        E: From<CacheError>,
    {
        let task_key = key.clone();
        self.get_or_compute(key, move || async move { calculator.compute(&task_key).await })
            .await
    }

    async fn compute_shared<F, Fut>(
        &self,
        key: &EntityKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: From<CacheError>,
    {
        let Reservation {
            id,
            runtime,
            handle_tx,
            computation,
        } = match self.begin(key)? {
            Pending::Ready(value) => return Ok(value),
            Pending::Running(computation) => return computation.await,
            Pending::Reserved(reservation) => reservation,
        };

        // Releases the slot if `compute` panics before the task exists.
        let guard = FlightGuard {
            cache: self.clone(),
            key: key.clone(),
            id,
        };
        // Called outside the lock: `compute` is caller code.
        let future = compute();

        let cache = self.clone();
        let task_key = key.clone();
        let handle = runtime.spawn(async move {
            let _guard = guard;
            let outcome = future.await;
            cache.finish(&task_key, id, ttl, &outcome);
            outcome
        });
        // `computation` owns the receiver, so the send cannot fail.
        let _ = handle_tx.send(handle);
        computation.await
    }

    /// Serve from the cache, join the computation in flight, or reserve
    /// the in-flight slot for `key`, all under one lock.
    fn begin(&self, key: &EntityKey) -> Result<Pending<V, E>, E>
    where
        E: From<CacheError>,
    {
        let mut state = self.lock();
        if let Some(value) = state.lookup(key, Instant::now()) {
            return Ok(Pending::Ready(value));
        }
        if let Some(flight) = state.in_flight.get(key) {
            let computation = flight.future.clone();
            state.stats.coalesced += 1;
            tracing::debug!(key = %key, "joining in-flight metrics computation");
            return Ok(Pending::Running(computation));
        }

        let runtime = Handle::try_current().map_err(|e| {
            E::from(CacheError::RuntimeUnavailable {
                reason: e.to_string(),
            })
        })?;

        let id = state.next_flight_id;
        state.next_flight_id += 1;
        state.stats.computations += 1;
        tracing::debug!(key = %key, "starting metrics computation");

        let (handle_tx, handle_rx) = oneshot::channel::<JoinHandle<Result<V, E>>>();
        let waiter_key = key.to_string();
        let computation = async move {
            let handle = match handle_rx.await {
                Ok(handle) => handle,
                // The reserving caller panicked inside `compute`.
                Err(_) => return Err(E::from(CacheError::ComputationCancelled { key: waiter_key })),
            };
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => Err(E::from(CacheError::ComputationCancelled { key: waiter_key })),
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(
            key.clone(),
            InFlight {
                id,
                future: computation.clone(),
            },
        );
        Ok(Pending::Reserved(Reservation {
            id,
            runtime,
            handle_tx,
            computation,
        }))
    }

    /// Record the outcome of computation `id`.
    fn finish(&self, key: &EntityKey, id: u64, ttl: Option<Duration>, outcome: &Result<V, E>) {
        let mut state = self.lock();
        let attached = state.in_flight.get(key).is_some_and(|flight| flight.id == id);
        if attached {
            state.in_flight.remove(key);
        }

        match outcome {
            Ok(value) if attached => {
                let ttl = ttl.unwrap_or_else(|| self.default_ttl(&state.config));
                state.insert(key.clone(), value.clone(), ttl, Instant::now());
                tracing::debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "cached computed metrics");
            }
            Ok(_) => {
                tracing::debug!(key = %key, "discarding metrics computed before invalidation");
            }
            Err(_) => {
                state.stats.failures += 1;
                tracing::warn!(key = %key, "metrics computation failed; nothing cached");
            }
        }
    }

    fn detach_flight(&self, key: &EntityKey, id: u64) {
        let mut state = self.lock();
        if state.in_flight.get(key).is_some_and(|flight| flight.id == id) {
            state.in_flight.remove(key);
        }
    }
}

/// Clears the in-flight marker when a computation ends, including by panic.
struct FlightGuard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    cache: MetricsCache<V, E>,
    key: EntityKey,
    id: u64,
}

impl<V, E> Drop for FlightGuard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cache.detach_flight(&self.key, self.id);
    }
}
