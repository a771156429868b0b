use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{CacheEvent, EntryState, QueryCache};
use crate::error::{ConsoleError, ConsoleResult};
use crate::identity::DurableSessionStore;
use crate::transport::Transport;

/// Hard ceiling on configuration retries, whatever the settings say.
pub const MAX_CONFIG_RETRIES: u32 = 3;

pub const ORG_CONFIG_KEY: &str = "organization-settings";
pub const ORG_CONFIG_PATH: &str = "/org/config";

/// One logical configuration domain: where it is read from and how long a read stays fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDomain {
    pub key: String,
    pub path: String,
    pub ttl: Duration,
}

impl ConfigDomain {
    pub fn new(key: impl Into<String>, path: impl Into<String>, ttl: Duration) -> Self {
        Self { key: key.into(), path: path.into(), ttl }
    }

    pub fn organization(ttl: Duration) -> Self { Self::new(ORG_CONFIG_KEY, ORG_CONFIG_PATH, ttl) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgConfig {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub business_type: Option<String>,
    /// Everything else the backend sends, untouched.
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self { max_retries: max_retries.min(MAX_CONFIG_RETRIES), backoff }
    }

    pub fn none() -> Self { Self::new(0, Duration::ZERO) }
}

impl Default for RetryPolicy {
    fn default() -> Self { Self::new(2, Duration::from_millis(250)) }
}

/// Server-derived configuration keyed by domain. Only session teardown evicts it.
#[derive(Clone)]
pub struct ScopedConfigCache {
    cache: QueryCache<String, Value>,
    retry: RetryPolicy,
}

impl ScopedConfigCache {
    pub fn new(retry: RetryPolicy) -> Self { Self { cache: QueryCache::new("config"), retry } }

    pub fn retry_policy(&self) -> RetryPolicy { self.retry }

    pub fn peek(&self, domain: &ConfigDomain) -> EntryState<Value> { self.cache.peek(&domain.key) }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<String>> { self.cache.subscribe() }

    /// Read a domain. Short-circuits to `Absent` with no request when no token is stored.
    pub async fn read(&self, domain: &ConfigDomain, store: &DurableSessionStore, transport: &Transport) -> EntryState<Value> {
        if !store.has_token() {
            debug!(target: "console::cache", domain = %domain.key, "config: not authenticated, skipping fetch");
            return EntryState::Absent;
        }
        let epoch = self.cache.epoch();
        self.cache
            .fetch(domain.key.clone(), Some(domain.ttl), || self.fetch_with_retry(transport, &domain.path, epoch))
            .await
    }

    /// Typed read. `Ok(None)` means "no configuration for this session".
    pub async fn read_as<T: DeserializeOwned>(
        &self,
        domain: &ConfigDomain,
        store: &DurableSessionStore,
        transport: &Transport,
    ) -> ConsoleResult<Option<T>> {
        match self.read(domain, store, transport).await {
            EntryState::Ready(v) => Ok(Some(serde_json::from_value(v)?)),
            EntryState::Errored(e) => Err(e),
            EntryState::Absent | EntryState::Loading => Ok(None),
        }
    }

    pub fn invalidate(&self, domain: &ConfigDomain) { self.cache.invalidate(&domain.key) }

    pub(crate) fn evict_all(&self) { self.cache.clear() }

    async fn fetch_with_retry(&self, transport: &Transport, path: &str, epoch: u64) -> ConsoleResult<Value> {
        let mut attempt = 0u32;
        loop {
            match transport.get_json::<Value>(path).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(target: "console::cache", path, attempt, error = %e, "config fetch failed; retrying");
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                    // Session went away while we were backing off.
                    if self.cache.epoch() != epoch {
                        return Err(ConsoleError::Stale);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_policy_is_capped() {
        assert_eq!(RetryPolicy::new(10, Duration::ZERO).max_retries, MAX_CONFIG_RETRIES);
        assert_eq!(RetryPolicy::default().max_retries, 2);
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    #[test]
    fn org_config_keeps_unknown_settings() {
        let cfg: OrgConfig = serde_json::from_value(json!({
            "organizationId": "org-1",
            "name": "Acme",
            "businessType": "RETAIL",
            "currency": "EUR",
            "taxRate": 0.2
        }))
        .unwrap();
        assert_eq!(cfg.organization_id.as_deref(), Some("org-1"));
        assert_eq!(cfg.settings.get("currency"), Some(&json!("EUR")));
        assert_eq!(cfg.settings.len(), 2);
    }
}
