//! Error types for EBIOS cache operations

use thiserror::Error;

/// Cache and coordinator errors.
///
/// Computation failures raised by a calculator are never converted into this
/// type; they reach the caller unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid cache key: {reason}")]
    InvalidKey { reason: String },

    #[error("Invalid TTL for {key}: TTL must be positive")]
    InvalidTtl { key: String },

    #[error("Computation for {key} was cancelled before completion")]
    ComputationCancelled { key: String },

    #[error("No Tokio runtime available: {reason}")]
    RuntimeUnavailable { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Master error type for the EBIOS cache crates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EbiosError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for EBIOS cache operations.
pub type EbiosResult<T> = Result<T, EbiosError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_invalid_key() {
        let err = CacheError::InvalidKey {
            reason: "key must not be empty".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid cache key"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_cache_error_display_invalid_ttl() {
        let err = CacheError::InvalidTtl {
            key: "mission-1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("mission-1"));
        assert!(msg.contains("positive"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::invalid("max_entries", 0, "must be at least 1");
        let msg = format!("{}", err);
        assert!(msg.contains("max_entries"));
        assert!(msg.contains('0'));
        assert!(msg.contains("must be at least 1"));
    }

    #[test]
    fn test_ebios_error_from_variants() {
        let cache = EbiosError::from(CacheError::RuntimeUnavailable {
            reason: "no reactor".to_string(),
        });
        assert!(matches!(cache, EbiosError::Cache(_)));

        let config = EbiosError::from(ConfigError::Parse {
            reason: "bad toml".to_string(),
        });
        assert!(matches!(config, EbiosError::Config(_)));
    }
}
