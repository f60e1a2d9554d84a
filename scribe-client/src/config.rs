//! Bootstrap configuration for the scribe client
//!
//! Priority: CLI argument → `SCRIBE_CLIENT_*` environment → TOML file
//! (`~/.config/scribe/scribe-client.toml`) → built-in default.

use scribe_common::config::{env_override, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::poller::PollerConfig;
use crate::retry::RetryPolicy;

pub const MODULE_NAME: &str = "scribe-client";

/// Floor for `poll_interval_ms`; zero would poll in a hot loop
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Floor for `request_timeout_secs`; zero would time out every request
pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the scribe-pipeline service
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Cancel the job on the service when polling is interrupted
    #[serde(default)]
    pub cancel_remote: bool,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            poll_interval_ms: default_poll_interval_ms(),
            retry: RetryConfig::default(),
            cancel_remote: false,
            request_timeout_secs: default_request_timeout_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_server_url() -> String {
    "http://127.0.0.1:5731".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    4000
}

impl ClientConfig {
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_override::<String>("SCRIBE_CLIENT_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(ms) = env_override("SCRIBE_CLIENT_POLL_INTERVAL_MS") {
            self.poll_interval_ms = ms;
        }
        if let Some(attempts) = env_override("SCRIBE_CLIENT_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts;
        }
        if let Some(cancel) = env_override("SCRIBE_CLIENT_CANCEL_REMOTE") {
            self.cancel_remote = cancel;
        }
        if let Some(level) = env_override::<String>("SCRIBE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(MIN_REQUEST_TIMEOUT_SECS))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS)),
            retry: self.retry_policy(),
            cancel_remote: self.cancel_remote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_poller_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.poller_config(), PollerConfig::default());
        assert_eq!(config.server_url, "http://127.0.0.1:5731");
    }

    #[test]
    fn test_partial_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            server_url = "http://scribe.local:8080"
            cancel_remote = true

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        let poller = config.poller_config();
        assert_eq!(poller.retry.max_attempts, 5);
        assert_eq!(poller.retry.base_delay, Duration::from_millis(500));
        assert_eq!(poller.interval, Duration::from_secs(2));
        assert!(poller.cancel_remote);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let mut config = ClientConfig::default();
        config.retry.max_attempts = 0;
        assert_eq!(config.retry_policy().max_attempts, 1);
    }

    #[test]
    fn test_zero_interval_and_timeout_clamped() {
        let config: ClientConfig = toml::from_str(
            r#"
            poll_interval_ms = 0
            request_timeout_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.poller_config().interval, Duration::from_millis(100));
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }
}
