//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SUPERFETCH_*)
//! 2. TOML config file (if SUPERFETCH_CONFIG_FILE set)
//! 3. Built-in defaults

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// MCP authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Static,
    Oauth,
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::Static
    }
}

/// OAuth endpoints and client credentials, used only when `auth_mode = oauth`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub issuer_url: Option<String>,
    #[serde(default)]
    pub authorization_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub introspection_url: Option<String>,
    #[serde(default)]
    pub revocation_url: Option<String>,
    #[serde(default)]
    pub registration_url: Option<String>,
    #[serde(default)]
    pub resource_url: Option<String>,
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_oauth_introspection_timeout_ms")]
    pub introspection_timeout_ms: u64,
}

fn default_oauth_introspection_timeout_ms() -> u64 {
    5000
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (`SUPERFETCH_*`)
/// 2. TOML file named by `SUPERFETCH_CONFIG_FILE` (if set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Set via SUPERFETCH_PORT. Clamped to [1024, 65535] by `validate`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Set via SUPERFETCH_HOST.
    #[serde(default = "default_host")]
    pub host: String,

    /// Set via SUPERFETCH_USER_AGENT.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Set via SUPERFETCH_CACHE_ENABLED.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Cache entry TTL in seconds. Set via SUPERFETCH_CACHE_TTL.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum number of distinct cache keys retained per namespace.
    #[serde(default = "default_cache_max_keys")]
    pub cache_max_keys: usize,

    /// Set via SUPERFETCH_LOG_LEVEL.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Shared-secret bearer token accepted for privileged routes.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Additional bearer tokens accepted alongside `api_key`.
    #[serde(default)]
    pub access_tokens: Vec<String>,

    /// Socket peers trusted to supply `X-Forwarded-For`.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Additional hostnames accepted by the Host/Origin allowlist,
    /// beyond loopback and `host`.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    #[serde(default)]
    pub auth_mode: AuthMode,

    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Maximum response body size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of concurrent MCP sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Session init timeout in milliseconds.
    #[serde(default = "default_session_init_timeout_ms")]
    pub session_init_timeout_ms: u64,

    /// Session idle TTL in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Fixed-window rate limit: max requests per window.
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,

    /// Fixed-window rate limit: window length in milliseconds.
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_user_agent() -> String {
    "superfetch/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_max_keys() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".into()
}

fn default_max_sessions() -> usize {
    1000
}

fn default_session_init_timeout_ms() -> u64 {
    10_000
}

fn default_session_ttl_secs() -> u64 {
    1800
}

fn default_rate_limit_max_requests() -> u32 {
    100
}

fn default_rate_limit_window_ms() -> u64 {
    60_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            user_agent: default_user_agent(),
            cache_enabled: true,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_keys: default_cache_max_keys(),
            log_level: default_log_level(),
            api_key: None,
            access_tokens: Vec::new(),
            trusted_proxies: Vec::new(),
            allowed_hosts: Vec::new(),
            auth_mode: AuthMode::default(),
            oauth: OAuthConfig::default(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            max_sessions: default_max_sessions(),
            session_init_timeout_ms: default_session_init_timeout_ms(),
            session_ttl_secs: default_session_ttl_secs(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SUPERFETCH_`
    /// 2. TOML file from `SUPERFETCH_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config file can't be read, environment
    /// variables can't be parsed, or validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SUPERFETCH_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SUPERFETCH_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.user_agent, "superfetch/0.1");
        assert_eq!(config.max_bytes, 5_242_880);
        assert_eq!(config.timeout_ms, 15_000);
        assert!(config.cache_enabled);
        assert_eq!(config.cache_ttl_secs, 3600);
        assert!(config.trusted_proxies.is_empty());
        assert!(config.api_key.is_none());
        assert_eq!(config.auth_mode, AuthMode::Static);
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(15_000));
    }

    #[test]
    fn test_cache_ttl_duration() {
        let config = AppConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
    }
}
