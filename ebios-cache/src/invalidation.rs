//! Debounced invalidation of cached metrics.
//!
//! Write paths report "sub-resource S of entity K changed" through
//! [`InvalidationCoordinator::notify_changed`]. The first notification for an
//! idle key arms a timer; every notification that arrives before it fires is
//! merged into the same batch, and the timer is never pushed back. When it
//! fires the cache entry is invalidated once, however many notifications were
//! merged.
//!
//! The pending map is the source of truth. Whoever removes a key's pending
//! record (its timer, a flush, or [`InvalidationCoordinator::invalidate_immediately`])
//! is the only one that acts on it, so an aborted timer racing with an
//! immediate invalidation cannot invalidate twice.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ebios_core::{
    CacheError, ChangeKind, ChangeNotification, ConfigError, EbiosResult, EntityKey,
    InvalidationConfig, InvalidationConfigUpdate, MetricsCalculator, Timestamp,
};
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::metrics_cache::MetricsCache;
use crate::store::MAX_TTL;
use crate::scheduler::{DelayedTasks, TaskId};
use crate::stats::InvalidationStats;

/// Per-kind notification counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTally {
    pub creates: u32,
    pub updates: u32,
    pub deletes: u32,
}

impl ChangeTally {
    fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Create => self.creates += 1,
            ChangeKind::Update => self.updates += 1,
            ChangeKind::Delete => self.deletes += 1,
        }
    }
}

/// Changes merged for one key while its timer is armed.
#[derive(Debug, Clone)]
pub struct PendingInvalidation {
    key: EntityKey,
    changed_collections: HashSet<String>,
    kinds: ChangeTally,
    notifications: u32,
    first_received_at: Timestamp,
    scheduled_at: Instant,
    fires_at: Instant,
    task_id: TaskId,
}

impl PendingInvalidation {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn changed_collections(&self) -> &HashSet<String> {
        &self.changed_collections
    }

    pub fn kinds(&self) -> ChangeTally {
        self.kinds
    }

    pub fn notifications(&self) -> u32 {
        self.notifications
    }

    /// Wall-clock time of the notification that opened the batch.
    pub fn first_received_at(&self) -> Timestamp {
        self.first_received_at
    }

    pub fn scheduled_at(&self) -> Instant {
        self.scheduled_at
    }

    pub fn fires_at(&self) -> Instant {
        self.fires_at
    }

    fn record(&mut self, sub_resource: String, kind: ChangeKind) {
        self.changed_collections.insert(sub_resource);
        self.kinds.record(kind);
        self.notifications += 1;
    }

    fn sorted_collections(&self) -> Vec<&str> {
        let mut collections: Vec<&str> = self.changed_collections.iter().map(String::as_str).collect();
        collections.sort_unstable();
        collections
    }
}

#[derive(Debug, Clone, Copy)]
enum FireReason {
    Debounced,
    Flushed,
}

impl FireReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Debounced => "debounced",
            Self::Flushed => "flushed",
        }
    }
}

struct CoordinatorState<V, E> {
    config: InvalidationConfig,
    pending: HashMap<EntityKey, PendingInvalidation>,
    timers: DelayedTasks<EntityKey>,
    stats: InvalidationStats,
    calculator: Option<Arc<dyn MetricsCalculator<V, E>>>,
    shut_down: bool,
}

struct CoordinatorInner<V, E> {
    cache: MetricsCache<V, E>,
    runtime: Handle,
    state: Mutex<CoordinatorState<V, E>>,
}

impl<V, E> CoordinatorInner<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + From<CacheError> + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, CoordinatorState<V, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer callback for batch `id` of `key`.
    fn fire_scheduled(self: &Arc<Self>, key: &EntityKey, id: TaskId) {
        let batch = {
            let mut state = self.lock();
            if !state.pending.get(key).is_some_and(|pending| pending.task_id == id) {
                return;
            }
            state.timers.complete(key, id);
            state.pending.remove(key)
        };
        if let Some(batch) = batch {
            self.apply(batch, FireReason::Debounced);
        }
    }

    fn apply(self: &Arc<Self>, batch: PendingInvalidation, reason: FireReason) {
        self.cache.invalidate(&batch.key);

        let refresh = {
            let mut state = self.lock();
            state.stats.batches_fired += 1;
            // No new background work once shut down.
            let calculator = state
                .calculator
                .as_ref()
                .filter(|_| state.config.eager_refresh && !state.shut_down)
                .cloned();
            if calculator.is_some() {
                state.stats.refreshes_started += 1;
            }
            calculator
        };

        tracing::info!(
            key = %batch.key,
            reason = reason.as_str(),
            notifications = batch.notifications,
            creates = batch.kinds.creates,
            updates = batch.kinds.updates,
            deletes = batch.kinds.deletes,
            collections = ?batch.sorted_collections(),
            "invalidated metrics after batched changes"
        );

        if let Some(calculator) = refresh {
            self.spawn_refresh(batch.key, calculator);
        }
    }

    fn spawn_refresh(self: &Arc<Self>, key: EntityKey, calculator: Arc<dyn MetricsCalculator<V, E>>) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            match inner.cache.get_or_compute_with(&key, calculator).await {
                Ok(_) => tracing::debug!(key = %key, "eager metrics refresh completed"),
                Err(_) => {
                    inner.lock().stats.refresh_failures += 1;
                    tracing::warn!(key = %key, "eager metrics refresh failed; next read recomputes");
                }
            }
        });
    }
}

/// Turns change notifications into cache invalidations.
///
/// Cloning the handle shares the coordinator. Armed timers keep it alive
/// until they fire.
pub struct InvalidationCoordinator<V, E> {
    inner: Arc<CoordinatorInner<V, E>>,
}

impl<V, E> Clone for InvalidationCoordinator<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> InvalidationCoordinator<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + From<CacheError> + Send + Sync + 'static,
{
    /// Create a coordinator for `cache`.
    ///
    /// Timers are spawned on the Tokio runtime current at construction;
    /// outside a runtime this fails with [`CacheError::RuntimeUnavailable`].
    pub fn new(cache: MetricsCache<V, E>, config: InvalidationConfig) -> EbiosResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| CacheError::RuntimeUnavailable {
            reason: e.to_string(),
        })?;

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                cache,
                state: Mutex::new(CoordinatorState {
                    config,
                    pending: HashMap::new(),
                    timers: DelayedTasks::new(runtime.clone()),
                    stats: InvalidationStats::default(),
                    calculator: None,
                    shut_down: false,
                }),
                runtime,
            }),
        })
    }

    /// Attach the calculator used for eager refresh.
    pub fn with_calculator(self, calculator: Arc<dyn MetricsCalculator<V, E>>) -> Self {
        self.inner.lock().calculator = Some(calculator);
        self
    }

    pub fn cache(&self) -> &MetricsCache<V, E> {
        &self.inner.cache
    }

    /// Record that `sub_resource` of `key` changed.
    ///
    /// After [`InvalidationCoordinator::shutdown`] the change is applied as
    /// an immediate invalidation instead of being batched.
    pub fn notify_changed(&self, key: &EntityKey, sub_resource: impl Into<String>, kind: ChangeKind) {
        self.record_change(key, sub_resource.into(), kind, chrono::Utc::now());
    }

    /// [`InvalidationCoordinator::notify_changed`] for a notification that
    /// carries its own receive time.
    pub fn notify(&self, notification: ChangeNotification) {
        let ChangeNotification {
            key,
            sub_resource,
            kind,
            received_at,
        } = notification;
        self.record_change(&key, sub_resource, kind, received_at);
    }

    fn record_change(&self, key: &EntityKey, sub_resource: String, kind: ChangeKind, received_at: Timestamp) {
        let mut state = self.inner.lock();
        state.stats.notifications += 1;
        match kind {
            ChangeKind::Create => state.stats.creates += 1,
            ChangeKind::Update => state.stats.updates += 1,
            ChangeKind::Delete => state.stats.deletes += 1,
        }

        if state.shut_down {
            drop(state);
            self.inner.cache.invalidate(key);
            tracing::debug!(key = %key, sub_resource, kind = %kind, "coordinator shut down; invalidated directly");
            return;
        }

        if let Some(pending) = state.pending.get_mut(key) {
            pending.record(sub_resource, kind);
            tracing::trace!(key = %key, notifications = pending.notifications, "merged change into pending batch");
            return;
        }

        // Clamped so the deadline stays representable.
        let delay = state.config.debounce_window.min(MAX_TTL);
        let now = Instant::now();
        let fires_at = now + delay;

        let inner = Arc::clone(&self.inner);
        let timer_key = key.clone();
        let task_id = state.timers.schedule(key.clone(), delay, move |id| async move {
            inner.fire_scheduled(&timer_key, id);
        });

        let mut pending = PendingInvalidation {
            key: key.clone(),
            changed_collections: HashSet::new(),
            kinds: ChangeTally::default(),
            notifications: 0,
            first_received_at: received_at,
            scheduled_at: now,
            fires_at,
            task_id,
        };
        pending.record(sub_resource, kind);
        state.pending.insert(key.clone(), pending);

        tracing::debug!(
            key = %key,
            kind = %kind,
            debounce_ms = delay.as_millis() as u64,
            "scheduled metrics invalidation"
        );
    }

    /// Invalidate `key` now, dropping any pending batch for it.
    ///
    /// The cache reflects the invalidation when this returns, and the
    /// dropped batch never fires.
    pub fn invalidate_immediately(&self, key: &EntityKey) {
        let cancelled = {
            let mut state = self.inner.lock();
            state.stats.immediate_invalidations += 1;
            let cancelled = state.pending.remove(key);
            if cancelled.is_some() {
                state.timers.cancel(key);
                state.stats.batches_cancelled += 1;
            }
            cancelled
        };

        self.inner.cache.invalidate(key);
        tracing::info!(
            key = %key,
            cancelled_notifications = cancelled.as_ref().map_or(0, |batch| batch.notifications),
            "invalidated metrics immediately"
        );
    }

    /// Fire the pending batch for `key` now. Returns whether one existed.
    pub fn flush(&self, key: &EntityKey) -> bool {
        let batch = {
            let mut state = self.inner.lock();
            let batch = state.pending.remove(key);
            if batch.is_some() {
                state.timers.cancel(key);
            }
            batch
        };
        match batch {
            Some(batch) => {
                self.inner.apply(batch, FireReason::Flushed);
                true
            }
            None => false,
        }
    }

    /// Fire every pending batch now, returning how many fired.
    pub fn flush_all(&self) -> usize {
        let batches: Vec<PendingInvalidation> = {
            let mut state = self.inner.lock();
            state.timers.cancel_all();
            state.pending.drain().map(|(_, batch)| batch).collect()
        };
        let count = batches.len();
        for batch in batches {
            self.inner.apply(batch, FireReason::Flushed);
        }
        count
    }

    /// Flush pending batches and stop batching further notifications.
    pub fn shutdown(&self) -> usize {
        self.inner.lock().shut_down = true;
        let flushed = self.flush_all();
        tracing::info!(flushed, "invalidation coordinator shut down");
        flushed
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }

    pub fn is_pending(&self, key: &EntityKey) -> bool {
        self.inner.lock().pending.contains_key(key)
    }

    /// Snapshot of the pending batch for `key`.
    pub fn pending(&self, key: &EntityKey) -> Option<PendingInvalidation> {
        self.inner.lock().pending.get(key).cloned()
    }

    /// Keys with a pending batch, sorted.
    pub fn pending_keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.inner.lock().pending.keys().cloned().collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        keys
    }

    pub fn stats(&self) -> InvalidationStats {
        self.inner.lock().stats.clone()
    }

    pub fn config(&self) -> InvalidationConfig {
        self.inner.lock().config.clone()
    }

    /// Merge `update` into the configuration.
    ///
    /// A new debounce window applies to batches opened afterwards; armed
    /// timers keep their deadline.
    pub fn update_config(&self, update: &InvalidationConfigUpdate) -> Result<(), ConfigError> {
        let mut state = self.inner.lock();
        state.config = update.apply_to(&state.config)?;
        tracing::info!(
            debounce_ms = state.config.debounce_window.as_millis() as u64,
            eager_refresh = state.config.eager_refresh,
            "invalidation configuration updated"
        );
        Ok(())
    }

    /// Time left before the batch for `key` fires.
    pub fn time_until_fire(&self, key: &EntityKey) -> Option<Duration> {
        let state = self.inner.lock();
        let pending = state.pending.get(key)?;
        Some(pending.fires_at.saturating_duration_since(Instant::now()))
    }
}
