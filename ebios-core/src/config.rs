//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Serialise durations as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

// ============================================================================
// METRICS CACHE
// ============================================================================

/// Configuration for the metrics cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsCacheConfig {
    /// TTL applied by `set` and `get_or_compute` when none is given.
    #[serde(rename = "default_ttl_ms", with = "duration_ms")]
    pub default_ttl: Duration,
    /// Maximum number of entries held at once.
    pub max_entries: usize,
    /// Relative jitter applied to the default TTL, in `[0, 1)`.
    pub ttl_jitter: f64,
    /// Period of the background expiry sweep.
    #[serde(rename = "cleanup_interval_ms", with = "duration_ms")]
    pub cleanup_interval: Duration,
}

impl Default for MetricsCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            max_entries: 100,
            ttl_jitter: 0.0,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl MetricsCacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the maximum entry count.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set the relative TTL jitter.
    pub fn with_ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = jitter;
        self
    }

    /// Set the background cleanup period.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - default_ttl > 0
    /// - max_entries >= 1
    /// - ttl_jitter in [0.0, 1.0)
    /// - cleanup_interval > 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl.is_zero() {
            return Err(ConfigError::invalid(
                "default_ttl",
                format!("{:?}", self.default_ttl),
                "default_ttl must be positive",
            ));
        }

        if self.max_entries == 0 {
            return Err(ConfigError::invalid(
                "max_entries",
                self.max_entries,
                "max_entries must be at least 1",
            ));
        }

        if !(0.0..1.0).contains(&self.ttl_jitter) {
            return Err(ConfigError::invalid(
                "ttl_jitter",
                self.ttl_jitter,
                "ttl_jitter must be in [0.0, 1.0)",
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::invalid(
                "cleanup_interval",
                format!("{:?}", self.cleanup_interval),
                "cleanup_interval must be positive",
            ));
        }

        Ok(())
    }
}

/// Partial update for [`MetricsCacheConfig`] applied at runtime.
///
/// The cleanup interval is fixed once the background sweep is running and is
/// therefore not part of the update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsCacheConfigUpdate {
    pub default_ttl: Option<Duration>,
    pub max_entries: Option<usize>,
    pub ttl_jitter: Option<f64>,
}

impl MetricsCacheConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Merge onto `base` and validate the result.
    ///
    /// `base` is left untouched; on error nothing is applied.
    pub fn apply_to(&self, base: &MetricsCacheConfig) -> Result<MetricsCacheConfig, ConfigError> {
        let mut merged = base.clone();
        if let Some(ttl) = self.default_ttl {
            merged.default_ttl = ttl;
        }
        if let Some(max) = self.max_entries {
            merged.max_entries = max;
        }
        if let Some(jitter) = self.ttl_jitter {
            merged.ttl_jitter = jitter;
        }
        merged.validate()?;
        Ok(merged)
    }
}

// ============================================================================
// INVALIDATION
// ============================================================================

/// Configuration for the invalidation coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Delay between the first notification for a key and its batch firing.
    #[serde(rename = "debounce_window_ms", with = "duration_ms")]
    pub debounce_window: Duration,
    /// Recompute metrics right after a batch fires instead of on next read.
    pub eager_refresh: bool,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(1000),
            eager_refresh: false,
        }
    }
}

impl InvalidationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn with_eager_refresh(mut self, enabled: bool) -> Self {
        self.eager_refresh = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_window.is_zero() {
            return Err(ConfigError::invalid(
                "debounce_window",
                format!("{:?}", self.debounce_window),
                "debounce_window must be positive",
            ));
        }
        Ok(())
    }
}

/// Partial update for [`InvalidationConfig`].
///
/// A new debounce window applies to batches armed after the update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationConfigUpdate {
    pub debounce_window: Option<Duration>,
    pub eager_refresh: Option<bool>,
}

impl InvalidationConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = Some(window);
        self
    }

    pub fn eager_refresh(mut self, enabled: bool) -> Self {
        self.eager_refresh = Some(enabled);
        self
    }

    pub fn apply_to(&self, base: &InvalidationConfig) -> Result<InvalidationConfig, ConfigError> {
        let mut merged = base.clone();
        if let Some(window) = self.debounce_window {
            merged.debounce_window = window;
        }
        if let Some(enabled) = self.eager_refresh {
            merged.eager_refresh = enabled;
        }
        merged.validate()?;
        Ok(merged)
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Configuration for the whole cache system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EbiosCacheConfig {
    pub cache: MetricsCacheConfig,
    pub invalidation: InvalidationConfig,
}

impl EbiosCacheConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `EBIOS_CACHE_DEFAULT_TTL_MS`: Default entry TTL (default: 300000)
    /// - `EBIOS_CACHE_MAX_ENTRIES`: Maximum cached entities (default: 100)
    /// - `EBIOS_CACHE_TTL_JITTER`: Relative TTL jitter (default: 0.0)
    /// - `EBIOS_CACHE_CLEANUP_INTERVAL_MS`: Expiry sweep period (default: 300000)
    /// - `EBIOS_INVALIDATION_DEBOUNCE_MS`: Batch window (default: 1000)
    /// - `EBIOS_INVALIDATION_EAGER_REFRESH`: "true" or "false" (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Same as [`EbiosCacheConfig::from_env`] with an injectable lookup.
    pub fn from_env_with(fetch: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&fetch, "EBIOS_CACHE_DEFAULT_TTL_MS")? {
            config.cache.default_ttl = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var::<usize>(&fetch, "EBIOS_CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = max;
        }
        if let Some(jitter) = parse_var::<f64>(&fetch, "EBIOS_CACHE_TTL_JITTER")? {
            config.cache.ttl_jitter = jitter;
        }
        if let Some(ms) = parse_var::<u64>(&fetch, "EBIOS_CACHE_CLEANUP_INTERVAL_MS")? {
            config.cache.cleanup_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&fetch, "EBIOS_INVALIDATION_DEBOUNCE_MS")? {
            config.invalidation.debounce_window = Duration::from_millis(ms);
        }
        if let Some(enabled) = parse_var::<bool>(&fetch, "EBIOS_INVALIDATION_EAGER_REFRESH")? {
            config.invalidation.eager_refresh = enabled;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document with `[cache]` and `[invalidation]` tables.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.invalidation.validate()
    }
}

fn parse_var<T: std::str::FromStr>(
    fetch: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match fetch(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(name, raw, "could not parse environment value")),
    }
}
