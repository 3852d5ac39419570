// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Custom-scheme launch with timeout-based hand-off detection.
//!
//! There is no portable positive acknowledgement for "the OS opened our
//! URI in another application", so detection is a heuristic: hand the URI
//! off, then race a fixed window against foreground-loss signals from the
//! embedding shell. Losing focus within the window is read as the handler
//! taking over; a silent window means no handler is registered and the
//! fallback runs. False positives (the user switches away on their own)
//! and false negatives (a slow-starting handler) are accepted.
//!
//! The heuristic lives behind [`UriOpener`] and the signal channel so a
//! platform-specific detection mechanism can replace it without touching
//! callers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::installations::AppVariant;

/// Hands a URI to the operating system.
pub trait UriOpener: Send + Sync {
    fn open(&self, uri: &str) -> std::io::Result<()>;
}

/// Default opener: the platform's "open this URL" facility.
pub struct SystemOpener;

impl UriOpener for SystemOpener {
    fn open(&self, uri: &str) -> std::io::Result<()> {
        open::that(uri)
    }
}

/// Foreground-loss signals delivered by the embedding shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchSignal {
    /// The window lost input focus.
    FocusLost,
    /// The window became hidden.
    Hidden,
}

/// What the detection window concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A foreground-loss signal arrived in time; the handler took over.
    Handled,
    /// The window elapsed silently; the fallback ran.
    TimedOut,
}

/// Build the launch URI for an installation's one-time token.
pub fn launch_uri(variant: AppVariant, token: &str) -> String {
    format!("{}://{}", variant.scheme(), urlencoding::encode(token))
}

/// Runs one launch attempt per call. Re-entrancy while an attempt is
/// outstanding is the caller's responsibility to prevent.
pub struct LaunchDetector {
    opener: Arc<dyn UriOpener>,
    timeout: Duration,
}

impl LaunchDetector {
    pub fn new(opener: Arc<dyn UriOpener>, timeout: Duration) -> Self {
        Self { opener, timeout }
    }

    /// Hand `uri` to the OS and watch for a hand-off within the window.
    ///
    /// `on_fallback` is invoked exactly once iff the window times out. The
    /// window is not cancellable once armed; it needs its full span for the
    /// inference to mean anything.
    pub async fn launch<F>(
        &self,
        uri: &str,
        mut signals: mpsc::Receiver<LaunchSignal>,
        on_fallback: F,
    ) -> LaunchOutcome
    where
        F: FnOnce(),
    {
        if let Err(e) = self.opener.open(uri) {
            // An open failure usually means no registered handler; the
            // timeout path below surfaces the fallback either way.
            warn!(uri, "failed to hand URI to the OS: {e}");
        }
        debug!(uri, timeout_ms = self.timeout.as_millis() as u64, "launch window armed");

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        tokio::select! {
            _ = &mut deadline => {
                info!(uri, "launch window elapsed, no handler detected");
                on_fallback();
                LaunchOutcome::TimedOut
            }
            signal = signals.recv() => match signal {
                Some(signal) => {
                    info!(uri, ?signal, "foreground lost, handler assumed");
                    LaunchOutcome::Handled
                }
                // Shell dropped the sender; wait out the window anyway.
                None => {
                    deadline.as_mut().await;
                    info!(uri, "launch window elapsed, no handler detected");
                    on_fallback();
                    LaunchOutcome::TimedOut
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "launch_tests.rs"]
mod tests;
