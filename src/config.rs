//! Console session settings: defaults, optional JSON file, then `CONSOLE_*` env vars.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::config::MAX_CONFIG_RETRIES;
use crate::cache::RetryPolicy;
use crate::navigation::Routes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "ConsoleConfig::default_api_base_url")]
    pub api_base_url: String,
    /// File backing the durable session area. `None` keeps the session in memory.
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    #[serde(default = "ConsoleConfig::default_storage_prefix")]
    pub storage_prefix: String,
    #[serde(default = "ConsoleConfig::default_login_path")]
    pub login_path: String,
    #[serde(default = "ConsoleConfig::default_landing_path")]
    pub landing_path: String,
    #[serde(default = "ConsoleConfig::default_identity_stale_secs")]
    pub identity_stale_secs: u64,
    #[serde(default = "ConsoleConfig::default_config_ttl_secs")]
    pub config_ttl_secs: u64,
    #[serde(default = "ConsoleConfig::default_config_max_retries")]
    pub config_max_retries: u32,
    #[serde(default = "ConsoleConfig::default_config_retry_backoff_ms")]
    pub config_retry_backoff_ms: u64,
    #[serde(default = "ConsoleConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ConsoleConfig {
    fn default_api_base_url() -> String { "http://127.0.0.1:3000/api".to_string() }
    fn default_storage_prefix() -> String { "console".to_string() }
    fn default_login_path() -> String { "/login".to_string() }
    fn default_landing_path() -> String { "/dashboard".to_string() }
    fn default_identity_stale_secs() -> u64 { 300 }
    fn default_config_ttl_secs() -> u64 { 600 }
    fn default_config_max_retries() -> u32 { 2 }
    fn default_config_retry_backoff_ms() -> u64 { 250 }
    fn default_request_timeout_secs() -> u64 { 30 }

    /// Defaults overlaid with `CONSOLE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    /// JSON file first, then the environment overlay.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).with_context(|| format!("reading config '{}'", path.display()))?;
        let mut cfg: ConsoleConfig = serde_json::from_slice(&bytes).with_context(|| format!("parsing config '{}'", path.display()))?;
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    /// Overlay values from `lookup`. Split out from `from_env` so tests need not touch the process env.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CONSOLE_API_BASE_URL") { self.api_base_url = v; }
        if let Some(v) = lookup("CONSOLE_SESSION_FILE") {
            self.session_file = if v.trim().is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = lookup("CONSOLE_STORAGE_PREFIX") { self.storage_prefix = v; }
        if let Some(v) = lookup("CONSOLE_LOGIN_PATH") { self.login_path = v; }
        if let Some(v) = lookup("CONSOLE_LANDING_PATH") { self.landing_path = v; }
        if let Some(v) = lookup("CONSOLE_IDENTITY_STALE_SECS") { self.identity_stale_secs = parse_num("CONSOLE_IDENTITY_STALE_SECS", &v)?; }
        if let Some(v) = lookup("CONSOLE_CONFIG_TTL_SECS") { self.config_ttl_secs = parse_num("CONSOLE_CONFIG_TTL_SECS", &v)?; }
        if let Some(v) = lookup("CONSOLE_CONFIG_MAX_RETRIES") { self.config_max_retries = parse_num("CONSOLE_CONFIG_MAX_RETRIES", &v)?; }
        if let Some(v) = lookup("CONSOLE_CONFIG_RETRY_BACKOFF_MS") { self.config_retry_backoff_ms = parse_num("CONSOLE_CONFIG_RETRY_BACKOFF_MS", &v)?; }
        if let Some(v) = lookup("CONSOLE_REQUEST_TIMEOUT_SECS") { self.request_timeout_secs = parse_num("CONSOLE_REQUEST_TIMEOUT_SECS", &v)?; }
        Ok(())
    }

    pub fn routes(&self) -> Routes { Routes { login: self.login_path.clone(), landing: self.landing_path.clone() } }

    /// `0` disables identity staleness: the entry lives until teardown or invalidation.
    pub fn identity_stale_after(&self) -> Option<Duration> {
        if self.identity_stale_secs == 0 { None } else { Some(Duration::from_secs(self.identity_stale_secs)) }
    }

    pub fn config_ttl(&self) -> Duration { Duration::from_secs(self.config_ttl_secs) }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config_max_retries.min(MAX_CONFIG_RETRIES), Duration::from_millis(self.config_retry_backoff_ms))
    }

    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: Self::default_api_base_url(),
            session_file: None,
            storage_prefix: Self::default_storage_prefix(),
            login_path: Self::default_login_path(),
            landing_path: Self::default_landing_path(),
            identity_stale_secs: Self::default_identity_stale_secs(),
            config_ttl_secs: Self::default_config_ttl_secs(),
            config_max_retries: Self::default_config_max_retries(),
            config_retry_backoff_ms: Self::default_config_retry_backoff_ms(),
            request_timeout_secs: Self::default_request_timeout_secs(),
        }
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| anyhow!("{} must be a non-negative integer, got '{}'", name, raw))
}
