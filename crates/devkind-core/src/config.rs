//! Loader configuration.
//!
//! Defaults live in [`defaults`], the environment variables that override
//! them in [`env_vars`]. [`LoaderConfig`] carries the resolved values into
//! the engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default values.
pub mod defaults {
    /// Cached manifests older than this are refetched.
    pub const MANIFEST_TTL_SECS: u64 = 7 * 24 * 3600;
    /// Timeout for registry, bundle and device HTTP requests.
    pub const HTTP_TIMEOUT_SECS: u64 = 30;
    pub const USER_AGENT: &str = concat!("devkind/", env!("CARGO_PKG_VERSION"));
    pub const REGISTRY_URL: &str = "https://registry.devkind.dev";
    /// Subdirectory of the platform cache dir holding manifests and bundles.
    pub const DEVICE_CLASSES_DIR: &str = "device-classes";
    pub const MANIFEST_EXTENSION: &str = "manifest";
    /// Package marker file inside an extracted bundle.
    pub const PACKAGE_FILE: &str = "package.json";
}

/// Environment variable names.
pub mod env_vars {
    pub const MANIFEST_TTL_SECS: &str = "DEVKIND_MANIFEST_TTL_SECS";
    pub const HTTP_TIMEOUT_SECS: &str = "DEVKIND_HTTP_TIMEOUT_SECS";
    pub const REGISTRY_URL: &str = "DEVKIND_REGISTRY_URL";
    pub const DEVELOPER_KEY: &str = "DEVKIND_DEVELOPER_KEY";
    pub const CACHE_DIR: &str = "DEVKIND_CACHE_DIR";
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Runtime configuration of the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Staleness window for cached manifests, in seconds
    #[serde(default = "default_manifest_ttl")]
    pub manifest_ttl_secs: u64,
    /// HTTP timeout, in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// User agent sent on every outgoing request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_manifest_ttl() -> u64 {
    defaults::MANIFEST_TTL_SECS
}

fn default_http_timeout() -> u64 {
    defaults::HTTP_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    defaults::USER_AGENT.to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            manifest_ttl_secs: default_manifest_ttl(),
            http_timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl LoaderConfig {
    /// Defaults overridden by any `DEVKIND_*` variables that are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ttl) = env_u64(env_vars::MANIFEST_TTL_SECS) {
            config.manifest_ttl_secs = ttl;
        }
        if let Some(timeout) = env_u64(env_vars::HTTP_TIMEOUT_SECS) {
            config.http_timeout_secs = timeout;
        }
        config
    }

    pub fn with_manifest_ttl(mut self, ttl: Duration) -> Self {
        self.manifest_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn manifest_ttl(&self) -> Duration {
        Duration::from_secs(self.manifest_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Shared HTTP client honoring the timeout and user agent.
    pub fn http_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.http_timeout())
            .user_agent(self.user_agent.clone())
            .build()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttl_is_seven_days() {
        let config = LoaderConfig::default();
        assert_eq!(config.manifest_ttl(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_builder_overrides() {
        let config = LoaderConfig::default()
            .with_manifest_ttl(Duration::from_secs(60))
            .with_user_agent("test-agent");
        assert_eq!(config.manifest_ttl_secs, 60);
        assert_eq!(config.user_agent, "test-agent");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LoaderConfig = serde_json::from_str(r#"{"http_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.manifest_ttl_secs, defaults::MANIFEST_TTL_SECS);
    }
}
