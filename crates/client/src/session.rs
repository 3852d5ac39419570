// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory credential pair with opt-in durable mirroring.
//!
//! The store is the single owner of the credential pair: every other
//! component reads it or requests a replacement through
//! [`SessionStore::set_credentials`] / [`SessionStore::clear`]. Changes bump
//! a generation watch channel (the scheduler re-arms off it) and broadcast
//! [`SessionEvent`]s for the embedding shell.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

use crate::codec;

/// Access/refresh token combination issued by the identity provider.
///
/// Invariant: both fields are present or the session holds no pair at all;
/// a pair is never partially set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The user asked to sign out.
    UserRequested,
    /// Renewal failed with an authorization error.
    AuthFailure,
}

/// Events broadcast on session state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A pair was installed where none existed.
    SignedIn,
    /// An existing pair was replaced wholesale.
    Renewed,
    /// The pair was destroyed.
    SignedOut { reason: SignOutReason },
}

/// Durable session entry. Token fields are codec-encoded, which is
/// obfuscation only; this file is not a security boundary.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    access: String,
    refresh: String,
    /// Capture time as milliseconds since Unix epoch.
    captured_at_ms: u64,
}

/// Owner of the current credential pair.
pub struct SessionStore {
    pair: RwLock<Option<CredentialPair>>,
    /// "Stay signed in": controls whether the pair mirrors to disk.
    remember: RwLock<bool>,
    path: Option<PathBuf>,
    generation: watch::Sender<u64>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    /// Create an empty store. `path` is the durable entry location; `None`
    /// disables persistence entirely (tests, ephemeral shells).
    pub fn new(path: Option<PathBuf>, remember: bool) -> Self {
        let (generation, _) = watch::channel(0);
        let (events, _) = broadcast::channel(16);
        Self { pair: RwLock::new(None), remember: RwLock::new(remember), path, generation, events }
    }

    /// Watch channel that ticks on every pair change (set, clear, restore).
    pub fn subscribe_generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn pair(&self) -> Option<CredentialPair> {
        self.pair.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.pair.read().await.as_ref().map(|p| p.access_token.clone())
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.pair.read().await.as_ref().map(|p| p.refresh_token.clone())
    }

    pub async fn remember(&self) -> bool {
        *self.remember.read().await
    }

    /// Replace the pair wholesale and notify dependents.
    pub async fn set_credentials(&self, pair: CredentialPair) {
        let had_pair = {
            let mut guard = self.pair.write().await;
            let had = guard.is_some();
            *guard = Some(pair.clone());
            // Mirror to disk while still holding the write guard, so racing
            // replacements cannot leave the durable entry reflecting the
            // loser of the in-memory race.
            if *self.remember.read().await {
                self.write_entry(&pair);
            }
            had
        };

        self.generation.send_modify(|g| *g += 1);
        let event = if had_pair { SessionEvent::Renewed } else { SessionEvent::SignedIn };
        info!(renewed = had_pair, "session credentials set");
        let _ = self.events.send(event);
    }

    /// Destroy the pair and the durable entry. Idempotent: clearing an
    /// already-empty session does nothing observable.
    pub async fn clear(&self, reason: SignOutReason) {
        let had_pair = {
            let mut guard = self.pair.write().await;
            guard.take().is_some()
        };
        self.remove_entry();

        if had_pair {
            self.generation.send_modify(|g| *g += 1);
            info!(?reason, "session cleared");
            let _ = self.events.send(SessionEvent::SignedOut { reason });
        }
    }

    /// Toggle "stay signed in". Turning it off purges the durable entry
    /// synchronously; turning it on mirrors the current pair if one exists.
    pub async fn set_remember(&self, on: bool) {
        *self.remember.write().await = on;
        if on {
            if let Some(pair) = self.pair.read().await.clone() {
                self.write_entry(&pair);
            }
        } else {
            self.remove_entry();
        }
    }

    /// Restore a persisted session on process start.
    ///
    /// Returns whether a pair was restored. Restoration is all-or-nothing:
    /// if either field decodes to empty, the session stays unauthenticated.
    pub async fn restore(&self) -> bool {
        if !*self.remember.read().await {
            return false;
        }
        let Some(ref path) = self.path else {
            return false;
        };

        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) => {
                debug!(path = %path.display(), "no persisted session: {e}");
                return false;
            }
        };
        let entry: PersistedSession = match serde_json::from_str(&data) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), "failed to parse persisted session: {e}");
                return false;
            }
        };

        let access_token = codec::decode(&entry.access);
        let refresh_token = codec::decode(&entry.refresh);
        if access_token.is_empty() || refresh_token.is_empty() {
            warn!("persisted session did not decode cleanly, staying unauthenticated");
            return false;
        }

        {
            let mut guard = self.pair.write().await;
            *guard = Some(CredentialPair { access_token, refresh_token });
        }
        self.generation.send_modify(|g| *g += 1);
        info!(captured_at_ms = entry.captured_at_ms, "session restored from disk");
        let _ = self.events.send(SessionEvent::SignedIn);
        true
    }

    /// Write the durable entry atomically (unique tmp name + rename, so
    /// concurrent saves racing on one `.tmp` cannot corrupt each other).
    fn write_entry(&self, pair: &CredentialPair) {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let Some(ref path) = self.path else {
            return;
        };

        let entry = PersistedSession {
            access: codec::encode(&pair.access_token),
            refresh: codec::encode(&pair.refresh_token),
            captured_at_ms: now_ms(),
        };
        let json = match serde_json::to_string_pretty(&entry) {
            Ok(j) => j,
            Err(e) => {
                warn!("failed to serialize session entry: {e}");
                return;
            }
        };

        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = path.with_file_name(tmp_name);
        if let Err(e) = std::fs::write(&tmp_path, &json) {
            warn!(path = %tmp_path.display(), "failed to write session entry: {e}");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            warn!(path = %path.display(), "failed to rename session entry: {e}");
        }
    }

    fn remove_entry(&self) {
        if let Some(ref path) = self.path {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
