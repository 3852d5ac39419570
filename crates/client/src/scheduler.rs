// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive credential renewal ahead of expiry.
//!
//! One task owns the timer: every session generation change re-arms it, so
//! at most one timer is pending per scheduler at any instant. The delay is
//! `expiry - margin - now`, floored at a minimum so a negative or tiny
//! computed delay cannot produce a tight re-arm loop. When the expiry
//! cannot be read from the access token, the scheduler stays idle and
//! renewal is purely reactive through the retry coordinator.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::claims;
use crate::retry::{CycleOutcome, RetryCoordinator};
use crate::session::SessionStore;

/// Timing knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Safety window before real expiry; renewal should complete within it
    /// under normal network latency.
    pub margin: Duration,
    /// Floor for the computed delay.
    pub min_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { margin: Duration::from_secs(120), min_delay: Duration::from_secs(5) }
    }
}

/// Schedules one renewal per credential pair, ahead of its expiry.
///
/// Worth running only in long-lived embeddings (a launcher shell holding a
/// session open). One-shot commands skip it and rely on the retry
/// coordinator's reactive renewal instead.
pub struct RefreshScheduler {
    session: Arc<SessionStore>,
    coordinator: Arc<RetryCoordinator>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(
        session: Arc<SessionStore>,
        coordinator: Arc<RetryCoordinator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            session,
            coordinator,
            config,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the scheduling task. Calling `start` twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut guard = match self.handle.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let scheduler = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            scheduler.run().await;
        }));
        info!("refresh scheduler started");
    }

    /// Cancel the pending timer and stop the task. Idempotent, safe to call
    /// from any state.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let mut guard = match self.handle.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = guard.take() {
            handle.abort();
            info!("refresh scheduler stopped");
        }
    }

    async fn run(&self) {
        let mut generation = self.session.subscribe_generation();

        loop {
            // Mark the current generation as seen so a change we caused
            // ourselves (a successful renewal) does not re-trigger
            // instantly; the recomputed delay already reflects it.
            generation.borrow_and_update();

            match self.next_delay().await {
                // Idle: no pair, persistence off, or unreadable expiry.
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        changed = generation.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
                // Armed: a pair change cancels the pending timer and re-arms.
                Some(delay) => {
                    debug!(delay_secs = delay.as_secs(), "renewal timer armed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        changed = generation.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {
                            // Firing.
                            match self.coordinator.renew_once().await {
                                CycleOutcome::Renewed => {
                                    // The store update re-arms on the next
                                    // loop iteration with the new expiry.
                                }
                                CycleOutcome::AuthFailed => {
                                    // Session already purged by the gate;
                                    // next iteration finds no pair.
                                }
                                CycleOutcome::Transient(msg) => {
                                    // No self-retry: the next 401 through the
                                    // coordinator (or the next pair change)
                                    // recovers.
                                    warn!("scheduled renewal failed: {msg}");
                                    tokio::select! {
                                        _ = self.shutdown.cancelled() => return,
                                        changed = generation.changed() => {
                                            if changed.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Compute the delay until the next renewal, or `None` to stay idle.
    async fn next_delay(&self) -> Option<Duration> {
        if !self.session.remember().await {
            return None;
        }
        let pair = self.session.pair().await?;
        let expiry = claims::read_expiry(&pair.access_token)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let margin = self.config.margin.as_secs() as i64;
        let until_renewal = expiry - margin - now;

        let delay = if until_renewal > 0 {
            Duration::from_secs(until_renewal as u64)
        } else {
            Duration::ZERO
        };
        Some(delay.max(self.config.min_delay))
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
