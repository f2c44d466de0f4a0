//! Webhook process settings
//!
//! Read from `WEBHOOK_*` environment variables. The override ratios live in
//! a separate document, see [`override_lib::config`].

use anyhow::{Context, Result};
use override_lib::config::CONFIGURATION_ENV;
use override_lib::policy::{ApplicabilityPolicy, ExemptionMode};
use override_lib::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Port serving admission reviews, health and metrics
    #[serde(default = "default_port")]
    pub port: u16,

    /// Override document path; falls back to `CONFIGURATION_PATH`
    #[serde(default)]
    pub configuration_path: Option<String>,

    /// Also rewrite pods on update
    #[serde(default)]
    pub admit_updates: bool,

    #[serde(default)]
    pub exemption_mode: ExemptionMode,

    /// How long to wait for the initial Namespace/LimitRange list
    #[serde(default = "default_cache_sync_timeout")]
    pub cache_sync_timeout_secs: u64,
}

fn default_port() -> u16 {
    9443
}

fn default_cache_sync_timeout() -> u64 {
    120
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            configuration_path: None,
            admit_updates: false,
            exemption_mode: ExemptionMode::default(),
            cache_sync_timeout_secs: default_cache_sync_timeout(),
        }
    }
}

impl WebhookConfig {
    /// Load settings from the environment
    pub fn load() -> Result<Self> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("WEBHOOK"))
            .build()
            .context("failed to read WEBHOOK_* settings")?
            .try_deserialize()
            .context("invalid WEBHOOK_* settings")
    }

    /// Load the override ratios from the configured document
    pub fn load_override_config(&self) -> Result<Config> {
        let config = match self.configuration_path.as_deref() {
            Some(path) if !path.is_empty() => Config::load(path),
            _ => Config::load_from_env(),
        };

        config.with_context(|| format!("failed to load override configuration (set {CONFIGURATION_ENV})"))
    }

    pub fn applicability(&self) -> ApplicabilityPolicy {
        ApplicabilityPolicy {
            admit_updates: self.admit_updates,
        }
    }

    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }
}
