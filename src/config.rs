//! Validation settings.
//!
//! ## Configuration
//!
//! Settings come from JSON ([`ValidationConfig::from_json`]) or from
//! environment variables ([`ValidationConfig::from_env`]):
//! - `SLP_VALIDATOR_DOWNLOAD_LIMIT`: maximum network downloads per job (default: unlimited)
//! - `SLP_VALIDATOR_DEPTH_LIMIT`: maximum graph depth per job (default: unlimited)
//! - `SLP_VALIDATOR_PROXY_ENABLED`: use the graph-search accelerator (default: false)
//! - `SLP_PREFLIGHT_CHECK`: query preflight oracles before signing (default: false)
//! - `SLP_VALIDATOR_PARALLEL`: one job manager per token id (default: false)

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON could not be parsed.
    #[error("invalid validation config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings consumed by the graph context and the checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Network downloads after which a job gives up.
    pub download_limit: Option<usize>,
    /// Deepest level a job explores.
    pub depth_limit: Option<i32>,
    /// Consult the graph-search accelerator before the wallet store.
    pub proxy_enabled: bool,
    /// Run preflight oracles in the precondition checker.
    pub preflight_check: bool,
    /// Per-response wait of the bounded fetch adapter, in milliseconds.
    pub download_timeout_ms: u64,
    /// How long interactive validation waits before handing back the job.
    pub interactive_wait_ms: u64,
    /// One job manager per token id instead of one shared manager.
    pub parallel: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            download_limit: None,
            depth_limit: None,
            proxy_enabled: false,
            preflight_check: false,
            download_timeout_ms: 5_000,
            interactive_wait_ms: 3_000,
            parallel: false,
        }
    }
}

impl ValidationConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            download_limit: parse_var(&lookup, "SLP_VALIDATOR_DOWNLOAD_LIMIT").or(defaults.download_limit),
            depth_limit: parse_var(&lookup, "SLP_VALIDATOR_DEPTH_LIMIT").or(defaults.depth_limit),
            proxy_enabled: parse_flag(&lookup, "SLP_VALIDATOR_PROXY_ENABLED")
                .unwrap_or(defaults.proxy_enabled),
            preflight_check: parse_flag(&lookup, "SLP_PREFLIGHT_CHECK").unwrap_or(defaults.preflight_check),
            parallel: parse_flag(&lookup, "SLP_VALIDATOR_PARALLEL").unwrap_or(defaults.parallel),
            ..defaults
        }
    }

    /// Bounded fetch wait.
    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    /// Interactive wait.
    pub fn interactive_wait(&self) -> Duration {
        Duration::from_millis(self.interactive_wait_ms)
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring unparseable flag");
            None
        }
    }
}
