//! Periodic expiry sweep.
//!
//! Lookups already drop expired entries lazily; the sweep reclaims entries
//! nobody reads again.

use std::time::Duration;

use ebios_core::CacheError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::metrics_cache::MetricsCache;
use crate::store::MAX_TTL;

/// `tokio::time::interval` rejects a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Totals reported when the sweep stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub cycles: u64,
    pub removed: u64,
}

/// Owns a running sweep. Dropping the handle stops it.
pub struct CleanupHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<CleanupSummary>>,
}

impl CleanupHandle {
    /// Stop the sweep and wait for it to finish.
    pub async fn stop(mut self) -> CleanupSummary {
        let _ = self.shutdown_tx.send(true);
        match self.task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => CleanupSummary::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Run [`MetricsCache::cleanup`] every `period` until the handle stops it.
///
/// The first sweep happens one `period` after the call.
pub fn spawn_cleanup_task<V, E>(
    cache: MetricsCache<V, E>,
    period: Duration,
) -> Result<CleanupHandle, CacheError>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let runtime = tokio::runtime::Handle::try_current().map_err(|e| CacheError::RuntimeUnavailable {
        reason: e.to_string(),
    })?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = runtime.spawn(cleanup_loop(cache, period, shutdown_rx));
    Ok(CleanupHandle {
        shutdown_tx,
        task: Some(task),
    })
}

async fn cleanup_loop<V, E>(
    cache: MetricsCache<V, E>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> CleanupSummary
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let period = period.clamp(MIN_PERIOD, MAX_TTL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut summary = CleanupSummary::default();

    tracing::info!(interval_ms = period.as_millis() as u64, "metrics cache cleanup task started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender also means stop.
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let removed = cache.cleanup();
                summary.cycles += 1;
                summary.removed += removed as u64;
                if removed > 0 {
                    tracing::debug!(removed, remaining = cache.len(), "metrics cache cleanup cycle");
                }
            }
        }
    }

    tracing::info!(
        cycles = summary.cycles,
        removed = summary.removed,
        "metrics cache cleanup task stopped"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebios_test_utils::{key, CalcError};

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_expired_entries_periodically() {
        let cache: MetricsCache<i32, CalcError> = MetricsCache::with_defaults();
        cache
            .set_with_ttl(&key("short"), 1, Duration::from_millis(100))
            .expect("positive ttl");
        cache
            .set_with_ttl(&key("long"), 2, Duration::from_secs(3600))
            .expect("positive ttl");

        let handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(1)).expect("inside a runtime");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(cache.len(), 2);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(cache.len(), 1);

        let summary = handle.stop().await;
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.removed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_task() {
        let cache: MetricsCache<i32, CalcError> = MetricsCache::with_defaults();
        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(10)).expect("inside a runtime");
        drop(handle);

        cache
            .set_with_ttl(&key("short"), 1, Duration::from_millis(5))
            .expect("positive ttl");
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Only the lazy path could remove it now.
        assert_eq!(cache.stats().expirations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_period_never_sweeps() {
        let cache: MetricsCache<i32, CalcError> = MetricsCache::with_defaults();
        let handle = spawn_cleanup_task(cache, Duration::MAX).expect("inside a runtime");

        tokio::time::sleep(Duration::from_secs(86_400)).await;
        assert!(!handle.is_finished());
        assert_eq!(handle.stop().await, CleanupSummary::default());
    }

    #[test]
    fn test_requires_runtime() {
        let cache: MetricsCache<i32, CalcError> = MetricsCache::with_defaults();
        let result = spawn_cleanup_task(cache, Duration::from_secs(1));
        assert!(matches!(result, Err(CacheError::RuntimeUnavailable { .. })));
    }
}
