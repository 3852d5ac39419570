// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against an in-process mock backend: the assembled
//! stack signs in, renews ahead of expiry, recovers from 401s, and keeps
//! the session intact when the backend misbehaves.

use std::time::Duration;

use hatch::scheduler::SchedulerConfig;
use hatch::session::{CredentialPair, SessionEvent};

use hatch_specs::{
    assemble, epoch_now, installations_response, token_response, token_with_exp, MockBackend,
    Script,
};

const SETTLE: Duration = Duration::from_secs(10);

fn fast_scheduler() -> SchedulerConfig {
    SchedulerConfig { margin: Duration::from_secs(2), min_delay: Duration::from_millis(100) }
}

async fn wait_until<F>(mut condition: F) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + SETTLE;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not met within {SETTLE:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Ok(())
}

#[tokio::test]
async fn exchange_populates_and_persists_the_session() -> anyhow::Result<()> {
    let backend = MockBackend::start(
        Script::new(vec![token_response(&token_with_exp(epoch_now() + 300), "refresh-1")]),
        Script::new(vec![]),
        Script::new(vec![]),
    )
    .await?;
    let stack = assemble(&backend, fast_scheduler())?;

    let pair = stack.renewer.exchange("auth-code", "verifier").await?;
    stack.session.set_credentials(pair).await;

    assert!(stack.session.pair().await.is_some());
    assert!(stack.session_path().exists(), "remember is on, session must persist");

    // The persisted entry restores into a fresh store.
    let restored = hatch::session::SessionStore::new(Some(stack.session_path()), true);
    assert!(restored.restore().await);
    assert_eq!(restored.refresh_token().await.as_deref(), Some("refresh-1"));
    Ok(())
}

#[tokio::test]
async fn scheduler_renews_ahead_of_expiry() -> anyhow::Result<()> {
    // First response: exchange, expiring soon. Second: the scheduled renewal.
    let backend = MockBackend::start(
        Script::new(vec![
            token_response(&token_with_exp(epoch_now() + 3), "refresh-1"),
            token_response(&token_with_exp(epoch_now() + 1000), "refresh-2"),
        ]),
        Script::new(vec![]),
        Script::new(vec![]),
    )
    .await?;
    let stack = assemble(&backend, fast_scheduler())?;

    let pair = stack.renewer.exchange("auth-code", "verifier").await?;
    stack.session.set_credentials(pair).await;
    stack.scheduler.start();

    // Expiry minus margin is in the past, so the min-delay floor applies and
    // the renewal lands well within the settle window.
    wait_until(|| backend.token.calls() >= 2).await?;
    let deadline = tokio::time::Instant::now() + SETTLE;
    loop {
        if stack.session.refresh_token().await.as_deref() == Some("refresh-2") {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("scheduled renewal never landed in the store");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    stack.scheduler.stop();
    Ok(())
}

#[tokio::test]
async fn renewal_after_401_replays_and_refreshes_installations() -> anyhow::Result<()> {
    let backend = MockBackend::start(
        Script::new(vec![token_response(&token_with_exp(epoch_now() + 1000), "refresh-2")]),
        Script::new(vec![(401, "{}".to_owned()), installations_response()]),
        Script::new(vec![]),
    )
    .await?;
    let stack = assemble(&backend, fast_scheduler())?;

    stack
        .session
        .set_credentials(CredentialPair {
            access_token: "stale-access".to_owned(),
            refresh_token: "refresh-1".to_owned(),
        })
        .await;

    assert!(stack.cache.refresh_if_stale(Duration::ZERO));
    wait_until(|| !stack.cache.is_refreshing()).await?;

    assert_eq!(stack.cache.get().len(), 2);
    assert_eq!(backend.token.calls(), 1, "one renewal for the 401");
    assert!(stack.installations_path().exists(), "successful fetch persists a snapshot");
    Ok(())
}

#[tokio::test]
async fn malformed_renewal_response_does_not_sign_out() -> anyhow::Result<()> {
    // The token endpoint answers 200 with a body carrying no tokens; the
    // installations route rejects the stale token forever.
    let backend = MockBackend::start(
        Script::new(vec![(200, r#"{"unexpected": true}"#.to_owned())]),
        Script::new(vec![(401, "{}".to_owned())]),
        Script::new(vec![]),
    )
    .await?;
    let stack = assemble(&backend, fast_scheduler())?;

    stack
        .session
        .set_credentials(CredentialPair {
            access_token: "stale-access".to_owned(),
            refresh_token: "refresh-1".to_owned(),
        })
        .await;
    let mut events = stack.session.subscribe();
    // Drain the SignedIn from seeding.
    assert!(matches!(events.try_recv(), Ok(SessionEvent::SignedIn)));

    assert!(stack.cache.refresh_if_stale(Duration::ZERO));
    wait_until(|| !stack.cache.is_refreshing()).await?;

    // Malformed-but-2xx is transient: the session survives untouched and no
    // sign-out is broadcast.
    let pair = stack.session.pair().await;
    assert_eq!(
        pair.map(|p| p.refresh_token),
        Some("refresh-1".to_owned()),
        "session must survive a malformed renewal response"
    );
    assert!(
        !matches!(events.try_recv(), Ok(SessionEvent::SignedOut { .. })),
        "no sign-out on a malformed renewal response"
    );
    assert!(stack.cache.get().is_empty(), "no records were ever fetched");
    Ok(())
}

#[tokio::test]
async fn rejected_renewal_signs_out_and_purges_the_entry() -> anyhow::Result<()> {
    let backend = MockBackend::start(
        Script::new(vec![(401, "{}".to_owned())]),
        Script::new(vec![(401, "{}".to_owned())]),
        Script::new(vec![]),
    )
    .await?;
    let stack = assemble(&backend, fast_scheduler())?;

    stack
        .session
        .set_credentials(CredentialPair {
            access_token: "stale-access".to_owned(),
            refresh_token: "dead-refresh".to_owned(),
        })
        .await;
    assert!(stack.session_path().exists());

    assert!(stack.cache.refresh_if_stale(Duration::ZERO));
    wait_until(|| !stack.cache.is_refreshing()).await?;

    assert!(stack.session.pair().await.is_none(), "rejected renewal destroys the session");
    assert!(!stack.session_path().exists(), "persisted entry is purged on sign-out");
    assert_eq!(backend.token.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn snapshot_hydrates_a_fresh_stack() -> anyhow::Result<()> {
    let backend = MockBackend::start(
        Script::new(vec![]),
        Script::new(vec![installations_response()]),
        Script::new(vec![]),
    )
    .await?;
    let stack = assemble(&backend, fast_scheduler())?;

    stack
        .session
        .set_credentials(CredentialPair {
            access_token: "access".to_owned(),
            refresh_token: "refresh".to_owned(),
        })
        .await;
    assert!(stack.cache.refresh_if_stale(Duration::ZERO));
    wait_until(|| !stack.cache.is_refreshing()).await?;
    assert_eq!(stack.cache.get().len(), 2);

    // A second cache on the same snapshot path starts warm.
    let warm = hatch::installations::InstallationsCache::new(
        std::sync::Arc::new(NeverApi),
        Some(stack.installations_path()),
        hatch::installations::CacheConfig::default(),
    );
    assert!(warm.hydrate());
    assert_eq!(warm.get().len(), 2);
    Ok(())
}

struct NeverApi;

#[async_trait::async_trait]
impl hatch::installations::InstallationsApi for NeverApi {
    async fn fetch_installations(
        &self,
    ) -> Result<Vec<hatch::installations::InstallationRecord>, hatch::error::ApiError> {
        Err(hatch::error::ApiError::Transient("unreachable".to_owned()))
    }
}
