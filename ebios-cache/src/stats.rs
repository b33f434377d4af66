//! Counters exposed for observability.

/// Statistics about cache usage since creation or the last reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently in cache.
    pub cache_size: usize,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (expired lookups included).
    pub misses: u64,
    /// Number of entries evicted due to capacity.
    pub evictions: u64,
    /// Number of entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Number of calculator runs started by `get_or_compute`.
    pub computations: u64,
    /// Number of callers that joined a computation already in flight.
    pub coalesced: u64,
    /// Number of calculator runs that returned an error.
    pub failures: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Statistics about invalidation traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationStats {
    /// Notifications received, all kinds.
    pub notifications: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    /// Debounced batches that fired (timer or flush).
    pub batches_fired: u64,
    /// Calls to `invalidate_immediately`.
    pub immediate_invalidations: u64,
    /// Pending batches dropped because an immediate invalidation pre-empted them.
    pub batches_cancelled: u64,
    pub refreshes_started: u64,
    pub refresh_failures: u64,
}
