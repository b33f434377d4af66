//! EBIOS Core - Cache Data Types
//!
//! Pure data structures shared by the metrics cache crates: entity keys,
//! change notifications, the metrics payload, the calculator collaborator
//! trait, configuration and errors. No caching logic lives here.

use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod metrics;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use config::{
    EbiosCacheConfig, InvalidationConfig, InvalidationConfigUpdate, MetricsCacheConfig,
    MetricsCacheConfigUpdate,
};
pub use error::{CacheError, ConfigError, EbiosError, EbiosResult};
pub use event::{ChangeKind, ChangeNotification};
pub use identity::EntityKey;
pub use metrics::{
    EbiosMetrics, GlobalMetrics, MetricsCalculator, Workshop1Metrics, Workshop2Metrics,
    Workshop3Metrics, Workshop4Metrics, Workshop5Metrics,
};
