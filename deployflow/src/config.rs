//! Engine configuration.
//!
//! Every field has a serde default so a partial JSON document (or none at
//! all) yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::executor::RetryConfig;

/// Default public image registry.
pub const DEFAULT_REGISTRY_URL: &str = "https://hub.docker.com";

fn default_registry_url() -> String {
    DEFAULT_REGISTRY_URL.to_string()
}

fn default_registry_timeout() -> f64 {
    10.0
}

/// Where and how to check image existence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry base URL.
    #[serde(default = "default_registry_url")]
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_registry_timeout")]
    pub timeout_seconds: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            timeout_seconds: default_registry_timeout(),
        }
    }
}

impl RegistryConfig {
    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_cleanup_timeout() -> f64 {
    30.0
}

fn default_secrets_group() -> String {
    "default".to_string()
}

/// Top-level engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between two status checks of a job or deployment.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Image registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Backoff between batch attempts.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Time allowed for each rollback or delete call.
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_seconds: f64,
    /// Secrets group used when the project does not name one.
    #[serde(default = "default_secrets_group")]
    pub default_secrets_group: String,
    /// Keep a cloned repository directory the engine created itself.
    #[serde(default)]
    pub keep_cloned_repo: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            registry: RegistryConfig::default(),
            retry: RetryConfig::default(),
            cleanup_timeout_seconds: default_cleanup_timeout(),
            default_secrets_group: default_secrets_group(),
            keep_cloned_repo: false,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Sets the registry settings.
    #[must_use]
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the backoff between batch attempts.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-action cleanup timeout.
    #[must_use]
    pub fn with_cleanup_timeout(mut self, seconds: f64) -> Self {
        self.cleanup_timeout_seconds = seconds;
        self
    }

    /// Keeps cloned repositories after the run.
    #[must_use]
    pub fn keep_cloned_repo(mut self) -> Self {
        self.keep_cloned_repo = true;
        self
    }

    /// Poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Cleanup timeout as Duration.
    #[must_use]
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cleanup_timeout_seconds)
    }
}
