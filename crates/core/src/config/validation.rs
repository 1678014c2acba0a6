//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for any field outside the ranges
    /// §6 of the specification enumerates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1024..=65535).contains(&self.port) {
            return Err(ConfigError::Invalid { field: "port".into(), reason: "must be in 1024..=65535".into() });
        }

        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must not exceed 50MB".into() });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if !(60..=86400).contains(&self.cache_ttl_secs) {
            return Err(ConfigError::Invalid {
                field: "cache_ttl_secs".into(),
                reason: "must be in 60..=86400 seconds".into(),
            });
        }

        if !(1..=10000).contains(&self.rate_limit_max_requests) {
            return Err(ConfigError::Invalid {
                field: "rate_limit_max_requests".into(),
                reason: "must be in 1..=10000".into(),
            });
        }
        if !(1000..=3_600_000).contains(&self.rate_limit_window_ms) {
            return Err(ConfigError::Invalid {
                field: "rate_limit_window_ms".into(),
                reason: "must be in 1000..=3600000 ms".into(),
            });
        }

        if !(1000..=30_000).contains(&self.oauth.introspection_timeout_ms) {
            return Err(ConfigError::Invalid {
                field: "oauth.introspection_timeout_ms".into(),
                reason: "must be in 1000..=30000 ms".into(),
            });
        }

        Ok(())
    }

    /// Validate that the OAuth settings required for `auth_mode = oauth`
    /// are present. Deferred to call sites that actually enable OAuth.
    pub fn require_oauth_issuer(&self) -> Result<&str, ConfigError> {
        self.oauth.issuer_url.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "oauth.issuer_url".into(),
            hint: "Set SUPERFETCH_OAUTH_ISSUER_URL when SUPERFETCH_AUTH_MODE=oauth".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_bytes_zero() {
        let config = AppConfig { max_bytes: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_bytes"));
    }

    #[test]
    fn test_validate_max_bytes_exceeds_limit() {
        let config = AppConfig { max_bytes: 51 * 1024 * 1024, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_bytes"));
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_port_out_of_range() {
        let config = AppConfig { port: 80, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "port"));
    }

    #[test]
    fn test_validate_cache_ttl_out_of_range() {
        let config = AppConfig { cache_ttl_secs: 10, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache_ttl_secs"));
    }

    #[test]
    fn test_validate_rate_limit_bounds() {
        let config = AppConfig { rate_limit_max_requests: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "rate_limit_max_requests"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }

    #[test]
    fn test_validate_max_values() {
        let config = AppConfig {
            max_bytes: 50 * 1024 * 1024,
            timeout_ms: 300_000,
            cache_ttl_secs: 86400,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_require_oauth_issuer_missing() {
        let config = AppConfig::default();
        assert!(matches!(config.require_oauth_issuer(), Err(ConfigError::Missing { .. })));
    }
}
