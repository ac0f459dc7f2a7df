//! Configuration Module
//!
//! Loads service configuration from environment variables and decides the
//! per-mode cache and notification policy.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default upstream endpoint.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DAY_SECS: u64 = 60 * 60 * 24;

// == Deployment Mode ==
/// Deployment mode selecting cache lifetime and notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Cost-sensitive local work: long-lived cache, notifications go to the log
    Development,
    /// Everything else: short-lived cache, notifications go to the webhook
    Production,
}

impl DeploymentMode {
    /// Parses the `APP_ENV` value. Only `development` selects development mode.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("development") => DeploymentMode::Development,
            _ => DeploymentMode::Production,
        }
    }

    /// Lifetime of cached completions in this mode.
    pub fn completion_ttl(&self) -> Duration {
        match self {
            DeploymentMode::Development => Duration::from_secs(180 * DAY_SECS),
            DeploymentMode::Production => Duration::from_secs(DAY_SECS),
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, DeploymentMode::Development)
    }
}

/// Service configuration parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Credential for the completion API
    pub api_key: String,
    /// Base URL of the completion API
    pub base_url: String,
    /// Deployment mode
    pub mode: DeploymentMode,
    /// Webhook receiving operational alerts (required in production)
    pub notify_webhook_url: Option<String>,
    /// Directory of the disk-backed store; in-memory when absent
    pub cache_dir: Option<PathBuf>,
    /// Background sweep interval in seconds
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `OPENROUTER_API_KEY` - API credential (required)
    /// - `OPENROUTER_BASE_URL` - API base URL (default: OpenRouter)
    /// - `APP_ENV` - `development` or anything else for production
    /// - `NOTIFY_WEBHOOK_URL` - alert webhook (required in production)
    /// - `CACHE_DIR` - directory for the disk-backed store (optional)
    /// - `CLEANUP_INTERVAL` - sweep frequency in seconds (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a Config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key =
            non_empty("OPENROUTER_API_KEY").ok_or(ConfigError::Missing("OPENROUTER_API_KEY"))?;
        let base_url = non_empty("OPENROUTER_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mode = DeploymentMode::from_env_value(non_empty("APP_ENV").as_deref());

        let notify_webhook_url = non_empty("NOTIFY_WEBHOOK_URL");
        if notify_webhook_url.is_none() && !mode.is_development() {
            return Err(ConfigError::Missing("NOTIFY_WEBHOOK_URL"));
        }

        let cleanup_interval = match non_empty("CLEANUP_INTERVAL") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::Invalid {
                    name: "CLEANUP_INTERVAL",
                    value: raw,
                })?,
            None => 60,
        };

        Ok(Self {
            api_key,
            base_url,
            mode,
            notify_webhook_url,
            cache_dir: non_empty("CACHE_DIR").map(PathBuf::from),
            cleanup_interval,
        })
    }

    /// Lifetime applied to cached completions.
    pub fn completion_ttl(&self) -> Duration {
        self.mode.completion_ttl()
    }
}
