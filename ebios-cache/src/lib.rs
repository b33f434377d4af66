//! EBIOS Cache - Metrics Caching and Invalidation
//!
//! Keeps computed risk-analysis metrics in memory and drops them when the
//! underlying data changes.
//!
//! - [`MetricsCache`]: keyed TTL cache with a capacity bound (oldest insert
//!   evicted first) and single-flight `get_or_compute`.
//! - [`InvalidationCoordinator`]: debounces change notifications into one
//!   invalidation per key per window, with an immediate bypass.
//! - [`MetricsCacheSystem`]: builds both plus the periodic expiry sweep from
//!   one [`EbiosCacheConfig`](ebios_core::EbiosCacheConfig).

pub mod invalidation;
pub mod jitter;
pub mod maintenance;
pub mod metrics_cache;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod system;

pub use invalidation::{ChangeTally, InvalidationCoordinator, PendingInvalidation};
pub use jitter::{jittered_ttl, JitterSource, NoJitter, RandomJitter, SeededJitter};
pub use maintenance::{spawn_cleanup_task, CleanupHandle, CleanupSummary};
pub use metrics_cache::MetricsCache;
pub use scheduler::{DelayedTasks, TaskId};
pub use stats::{CacheStats, InvalidationStats};
pub use store::{CacheEntry, CacheStore, Lookup, MAX_TTL, MIN_TTL};
pub use system::{DisposeReport, MetricsCacheSystem};
