//! Configuration Management
//!
//! Persistent settings for regionsweep, stored as JSON in the user's config
//! directory. Every field is optional. Effective values resolve as
//! command line > config file > environment > built-in default; the command
//! line layer is applied by the caller.

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_ENDPOINT: &str = "REGIONSWEEP_ENDPOINT";
pub const ENV_TOKEN: &str = "REGIONSWEEP_TOKEN";
pub const ENV_ACCOUNT: &str = "REGIONSWEEP_ACCOUNT";

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080";
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 250;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Base URL of the inventory API
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    /// Label for this identity, used in output paths
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
    /// 0 disables the per-call deadline
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    /// 0 disables the whole-scan deadline
    #[serde(default)]
    pub scan_timeout_secs: Option<u64>,
    #[serde(default)]
    pub progress_interval_ms: Option<u64>,
    #[serde(default)]
    pub channel_capacity: Option<usize>,
    /// Path or http(s) URL of a service map
    #[serde(default)]
    pub service_map: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("regionsweep").join("config.json"))
    }

    /// Load configuration from disk. A missing or unreadable file yields the
    /// defaults; a malformed one is logged and ignored.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;

        Ok(())
    }

    /// Get effective endpoint (config > $REGIONSWEEP_ENDPOINT > default)
    pub fn effective_endpoint(&self) -> String {
        self.effective_endpoint_with(|key| std::env::var(key).ok())
    }

    pub fn effective_endpoint_with(&self, env: impl Fn(&str) -> Option<String>) -> String {
        non_empty(self.endpoint.clone())
            .or_else(|| non_empty(env(ENV_ENDPOINT)))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    /// Get effective token (config > $REGIONSWEEP_TOKEN)
    pub fn effective_token(&self) -> Option<String> {
        self.effective_token_with(|key| std::env::var(key).ok())
    }

    pub fn effective_token_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        non_empty(self.token.clone()).or_else(|| non_empty(env(ENV_TOKEN)))
    }

    /// Get effective account (config > $REGIONSWEEP_ACCOUNT > "unknown")
    pub fn effective_account(&self) -> String {
        self.effective_account_with(|key| std::env::var(key).ok())
    }

    pub fn effective_account_with(&self, env: impl Fn(&str) -> Option<String>) -> String {
        non_empty(self.account.clone())
            .or_else(|| non_empty(env(ENV_ACCOUNT)))
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn effective_profile(&self) -> String {
        non_empty(self.profile.clone()).unwrap_or_else(|| "default".to_string())
    }

    /// Configured regions, or every region of the embedded service map
    pub fn effective_regions(&self, fallback: impl FnOnce() -> Vec<String>) -> Vec<String> {
        match &self.regions {
            Some(regions) if !regions.is_empty() => regions.clone(),
            _ => fallback(),
        }
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_CONCURRENCY)
    }

    pub fn effective_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("regionsweep-output"))
    }

    pub fn effective_output_format(&self) -> OutputFormat {
        self.output_format.unwrap_or_default()
    }

    pub fn effective_progress_interval_ms(&self) -> u64 {
        self.progress_interval_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_PROGRESS_INTERVAL_MS)
    }

    pub fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY)
    }
}
