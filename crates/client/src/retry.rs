// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight renewal gate around authenticated calls.
//!
//! Every outbound authenticated call goes through [`RetryCoordinator::execute`].
//! When a call fails with an authorization error, at most one renewal runs
//! system-wide: concurrent failures subscribe to the in-flight cycle's
//! outcome broadcast and resolve together when it completes. Each original
//! call is replayed at most once.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::renewal::RenewClient;
use crate::session::{SessionStore, SignOutReason};

/// Outcome of one renewal cycle, broadcast to every caller that joined it.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// A fresh pair is installed in the session store.
    Renewed,
    /// The refresh credential was rejected; the session has been cleared.
    AuthFailed,
    /// Network or malformed-response failure; the session is untouched.
    Transient(String),
}

/// Serializes concurrent renewal demand into one in-flight cycle.
pub struct RetryCoordinator {
    session: Arc<SessionStore>,
    renewer: Arc<dyn RenewClient>,
    /// Sender of the in-flight cycle, if any. Instance state so separate
    /// coordinators (tests, multiple sessions) never share the flag.
    inflight: Mutex<Option<broadcast::Sender<CycleOutcome>>>,
}

impl RetryCoordinator {
    pub fn new(session: Arc<SessionStore>, renewer: Arc<dyn RenewClient>) -> Self {
        Self { session, renewer, inflight: Mutex::new(None) }
    }

    /// Run an authenticated call, renewing and replaying once on an
    /// authorization failure.
    ///
    /// The closure receives the current access token and is invoked at most
    /// twice: the original attempt, plus one replay after a successful
    /// renewal. A replay that fails with another authorization error is
    /// surfaced as-is; it never starts a second cycle.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, ApiError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let Some(access) = self.session.access_token().await else {
            return Err(ApiError::Auth);
        };

        match call(access).await {
            Err(ApiError::Auth) => match self.renew_once().await {
                CycleOutcome::Renewed => {
                    let Some(access) = self.session.access_token().await else {
                        return Err(ApiError::Auth);
                    };
                    call(access).await
                }
                CycleOutcome::AuthFailed => Err(ApiError::Auth),
                CycleOutcome::Transient(msg) => Err(ApiError::Transient(msg)),
            },
            other => other,
        }
    }

    /// Join the in-flight renewal cycle, or lead a new one.
    ///
    /// The refresh scheduler calls this too, so timer-driven and 401-driven
    /// renewals share one gate and cannot race each other.
    pub async fn renew_once(&self) -> CycleOutcome {
        let rx = {
            let mut guard = self.inflight.lock().await;
            match guard.as_ref() {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    *guard = Some(tx);
                    None
                }
            }
        };

        if let Some(mut rx) = rx {
            // Queued caller: suspended until the leader broadcasts.
            return match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => CycleOutcome::Transient("renewal cycle dropped".to_owned()),
            };
        }

        let outcome = self.run_cycle().await;

        // Drain the queue atomically: one send resolves every subscriber of
        // this cycle, and the slot is freed before anyone observes the
        // outcome.
        let tx = { self.inflight.lock().await.take() };
        if let Some(tx) = tx {
            let _ = tx.send(outcome.clone());
        }
        outcome
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let Some(refresh_token) = self.session.refresh_token().await else {
            return CycleOutcome::AuthFailed;
        };

        match self.renewer.renew(&refresh_token).await {
            Ok(pair) => {
                self.session.set_credentials(pair).await;
                info!("credential pair renewed");
                CycleOutcome::Renewed
            }
            Err(ApiError::Auth) => {
                warn!("renewal rejected, signing out");
                self.session.clear(SignOutReason::AuthFailure).await;
                CycleOutcome::AuthFailed
            }
            Err(ApiError::Transient(msg)) => {
                warn!("renewal failed transiently: {msg}");
                CycleOutcome::Transient(msg)
            }
            Err(ApiError::Protocol(msg)) => {
                // Malformed-but-2xx responses are retryable, but logged
                // distinctly from plain network failures.
                warn!("renewal response malformed: {msg}");
                CycleOutcome::Transient(msg)
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
