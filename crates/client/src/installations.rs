// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authorized-installation inventory with stale-while-revalidate refresh.
//!
//! Reads are synchronous and always answer from the last known good list,
//! possibly empty. A stale read triggers at most one background fetch;
//! transient fetch failures retry with capped exponential backoff and
//! jitter, then give up silently and keep serving stale data.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ApiError;

/// Which desktop-application build an installation targets. Each variant
/// registers its own URI scheme with the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppVariant {
    Production,
    Test,
    Development,
}

impl AppVariant {
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Production => "hatch",
            Self::Test => "hatch-test",
            Self::Development => "hatch-dev",
        }
    }
}

/// One installation the signed-in user is authorized to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub id: String,
    pub display_name: String,
    pub variant: AppVariant,
}

/// Durable cache shape, written after every successful fetch.
#[derive(Debug, Serialize, Deserialize)]
struct InstallationsSnapshot {
    /// Capture time as milliseconds since Unix epoch.
    captured_at_ms: u64,
    records: Vec<InstallationRecord>,
}

/// Source of the installation list. The production implementation routes the
/// authenticated fetch through the retry coordinator.
#[async_trait]
pub trait InstallationsApi: Send + Sync {
    async fn fetch_installations(&self) -> Result<Vec<InstallationRecord>, ApiError>;
}

/// Timing and retry knobs for the cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age beyond which a read triggers a background refresh.
    pub staleness: Duration,
    /// Maximum snapshot age accepted at start-up.
    pub hydrate_bound: Duration,
    /// First retry delay after a transient fetch failure.
    pub backoff_base: Duration,
    /// Upper bound on any single retry delay.
    pub backoff_cap: Duration,
    /// Total attempts per refresh before giving up silently.
    pub max_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(60),
            hydrate_bound: Duration::from_secs(600),
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

/// Last-known-good installation list with single-flight refresh.
pub struct InstallationsCache {
    api: Arc<dyn InstallationsApi>,
    records: RwLock<Vec<InstallationRecord>>,
    /// Epoch ms of the last successful fetch; 0 means never fetched.
    last_fetch_ms: AtomicU64,
    /// Set while a fetch (including its backoff retries) is in flight.
    fetching: AtomicBool,
    path: Option<PathBuf>,
    config: CacheConfig,
    shutdown: CancellationToken,
}

impl InstallationsCache {
    /// `path` is the durable snapshot location; `None` disables persistence.
    pub fn new(api: Arc<dyn InstallationsApi>, path: Option<PathBuf>, config: CacheConfig) -> Self {
        Self {
            api,
            records: RwLock::new(Vec::new()),
            last_fetch_ms: AtomicU64::new(0),
            fetching: AtomicBool::new(false),
            path,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Last known good list, possibly empty. Never blocks on the network.
    pub fn get(&self) -> Vec<InstallationRecord> {
        match self.records.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Trigger a background fetch iff the cache is older than `max_age` and
    /// no fetch is already in flight. Returns whether a fetch was triggered.
    pub fn refresh_if_stale(self: &Arc<Self>, max_age: Duration) -> bool {
        let age_ms = now_ms().saturating_sub(self.last_fetch_ms.load(Ordering::Relaxed));
        if age_ms <= max_age.as_millis() as u64 {
            return false;
        }
        if self.fetching.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            return false;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.fetch_with_backoff().await;
            cache.fetching.store(false, Ordering::Release);
        });
        true
    }

    /// Whether a fetch (including its backoff retries) is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.fetching.load(Ordering::Acquire)
    }

    /// Load the durable snapshot at start-up if it is recent enough.
    /// Returns whether records were loaded.
    pub fn hydrate(&self) -> bool {
        let Some(ref path) = self.path else {
            return false;
        };
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) => {
                debug!(path = %path.display(), "no installations snapshot: {e}");
                return false;
            }
        };
        let snapshot: InstallationsSnapshot = match serde_json::from_str(&data) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), "failed to parse installations snapshot: {e}");
                return false;
            }
        };

        let age_ms = now_ms().saturating_sub(snapshot.captured_at_ms);
        if age_ms > self.config.hydrate_bound.as_millis() as u64 {
            debug!(age_ms, "installations snapshot too old, ignoring");
            return false;
        }

        let count = snapshot.records.len();
        self.replace_records(snapshot.records);
        // Stamp with the capture time, not now, so staleness is computed
        // against when the data was actually fetched.
        self.last_fetch_ms.store(snapshot.captured_at_ms, Ordering::Relaxed);
        info!(count, age_ms, "installations hydrated from snapshot");
        true
    }

    /// Cancel any pending backoff retry. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn fetch_with_backoff(&self) {
        for attempt in 1..=self.config.max_attempts {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                result = self.api.fetch_installations() => result,
            };

            match result {
                Ok(records) => {
                    let count = records.len();
                    self.replace_records(records);
                    let fetched_at = now_ms();
                    self.last_fetch_ms.store(fetched_at, Ordering::Relaxed);
                    self.write_snapshot(fetched_at);
                    info!(count, attempt, "installations refreshed");
                    return;
                }
                Err(ApiError::Auth) => {
                    // The coordinator already owns auth recovery; a terminal
                    // auth failure here means the session is gone. No backoff.
                    warn!("installations fetch rejected, not retrying");
                    return;
                }
                Err(err) => {
                    if attempt == self.config.max_attempts {
                        warn!(attempt, "installations fetch giving up, keeping stale data: {err}");
                        return;
                    }
                    let delay = self.backoff_delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64,
                        "installations fetch failed, retrying: {err}");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// `min(cap, base * 2^(attempt-1))` with ±20% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.config.backoff_base.saturating_mul(1u32 << (attempt - 1).min(30));
        let capped = exp.min(self.config.backoff_cap);
        let jitter: f64 = rand::rng().random_range(0.8..1.2);
        capped.mul_f64(jitter)
    }

    fn replace_records(&self, records: Vec<InstallationRecord>) {
        match self.records.write() {
            Ok(mut guard) => *guard = records,
            Err(poisoned) => *poisoned.into_inner() = records,
        }
    }

    /// Snapshot writes are whole-file atomic, same scheme as the session
    /// entry: unique tmp name then rename.
    fn write_snapshot(&self, captured_at_ms: u64) {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let Some(ref path) = self.path else {
            return;
        };

        let snapshot = InstallationsSnapshot { captured_at_ms, records: self.get() };
        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                warn!("failed to serialize installations snapshot: {e}");
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
            warn!(path = %tmp_path.display(), "failed to write installations snapshot: {e}");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            warn!(path = %path.display(), "failed to rename installations snapshot: {e}");
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "installations_tests.rs"]
mod tests;
