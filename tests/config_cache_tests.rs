//! Scoped configuration reads: gating on the token, retries, freshness, eviction.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::future::join_all;
use serde_json::json;

use common::{harness, harness_with, standard_handler, ScriptedBackend};
use console_session::cache::CacheEvent;
use console_session::transport::ApiResponse;
use console_session::{ConfigDomain, ConsoleConfig, ConsoleError, EntryState};

fn flaky_config(failures: usize) -> (ScriptedBackend, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let backend = ScriptedBackend::new(move |req| {
        if req.path != "/org/config" {
            return standard_handler(req);
        }
        if counter.fetch_add(1, Ordering::SeqCst) < failures {
            Ok(ApiResponse::new(503, json!({ "message": "upstream unavailable" })))
        } else {
            standard_handler(req)
        }
    });
    (backend, attempts)
}

#[tokio::test]
async fn unauthenticated_reads_are_absent_without_a_request() -> Result<()> {
    let h = harness();
    assert_eq!(h.controller.config(h.controller.organization_domain()).await, EntryState::Absent);
    assert_eq!(h.controller.organization_config().await?, None);
    assert!(h.backend.calls().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() -> Result<()> {
    let (backend, attempts) = flaky_config(2);
    let h = harness_with(ConsoleConfig::default(), backend);
    h.controller.login("a@x.com", "secret").await?;

    let cfg = h.controller.organization_config().await?.expect("org config");
    assert_eq!(cfg.name.as_deref(), Some("org-1 Ltd"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded() -> Result<()> {
    let (backend, attempts) = flaky_config(usize::MAX);
    let mut config = ConsoleConfig::default();
    config.config_max_retries = 10;
    let h = harness_with(config, backend);
    h.controller.login("a@x.com", "secret").await?;

    let err = h.controller.organization_config().await.unwrap_err();
    assert_eq!(err, ConsoleError::http(503, "upstream unavailable"));
    // One attempt plus at most three retries, whatever the configuration asks for.
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert!(matches!(h.controller.config_cache().peek(h.controller.organization_domain()), EntryState::Errored(_)));
    // Server trouble is not a reason to end the session.
    assert!(h.controller.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn client_errors_are_not_retried() -> Result<()> {
    let h = harness();
    h.controller.login("root@x.com", "secret").await?;
    let err = h.controller.organization_config().await.unwrap_err();
    assert_eq!(err.http_status(), 404);
    assert_eq!(h.backend.calls_to("/org/config"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reads_are_shared_and_refreshed_after_the_ttl() -> Result<()> {
    let mut config = ConsoleConfig::default();
    config.config_ttl_secs = 60;
    let h = harness_with(config, ScriptedBackend::new(standard_handler));
    h.controller.login("a@x.com", "secret").await?;
    h.backend.set_delay(Some(Duration::from_millis(20)));

    let domain = h.controller.organization_domain().clone();
    let states = join_all((0..4).map(|_| h.controller.config(&domain))).await;
    assert!(states.iter().all(|s| s.ready().and_then(|v| v.get("currency")) == Some(&json!("EUR"))));
    assert_eq!(h.backend.calls_to("/org/config"), 1);

    tokio::time::advance(Duration::from_secs(30)).await;
    h.controller.config(&domain).await;
    assert_eq!(h.backend.calls_to("/org/config"), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    h.controller.config(&domain).await;
    assert_eq!(h.backend.calls_to("/org/config"), 2);

    h.controller.config_cache().invalidate(&domain);
    h.controller.config(&domain).await;
    assert_eq!(h.backend.calls_to("/org/config"), 3);
    Ok(())
}

#[tokio::test]
async fn domains_are_cached_independently() -> Result<()> {
    let h = harness();
    h.controller.login("a@x.com", "secret").await?;
    let billing = ConfigDomain::new("billing", "/org/billing", Duration::from_secs(60));

    assert!(h.controller.organization_config().await?.is_some());
    assert_eq!(h.controller.config(&billing).await, EntryState::Errored(ConsoleError::http(404, "not found")));
    assert!(h.controller.config_cache().peek(h.controller.organization_domain()).is_ready());
    Ok(())
}

#[tokio::test]
async fn logout_evicts_every_domain() -> Result<()> {
    let h = harness();
    h.controller.login("a@x.com", "secret").await?;
    h.controller.organization_config().await?;
    let mut events = h.controller.config_cache().subscribe();

    h.controller.logout();

    assert_eq!(events.try_recv()?, CacheEvent::Cleared);
    assert_eq!(h.controller.config_cache().peek(h.controller.organization_domain()), EntryState::Absent);
    assert_eq!(h.controller.organization_config().await?, None);
    assert_eq!(h.backend.calls_to("/org/config"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn logout_during_backoff_drops_the_read() -> Result<()> {
    let (backend, attempts) = flaky_config(usize::MAX);
    let h = harness_with(ConsoleConfig::default(), backend);
    h.controller.login("a@x.com", "secret").await?;

    let (state, ()) = tokio::join!(h.controller.config(h.controller.organization_domain()), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.controller.logout();
    });

    assert_eq!(state, EntryState::Absent);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.config_cache().peek(h.controller.organization_domain()), EntryState::Absent);
    Ok(())
}
