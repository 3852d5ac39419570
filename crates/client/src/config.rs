// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::installations::CacheConfig;
use crate::renewal::TokenEndpoints;
use crate::scheduler::SchedulerConfig;

/// Session and dispatch coordinator for the hatch desktop launcher.
#[derive(Debug, Clone, Parser)]
#[command(name = "hatch", version, about)]
pub struct Config {
    /// Launcher backend base URL.
    #[arg(long, env = "HATCH_API_BASE", default_value = "https://api.hatch.example.com")]
    pub api_base: String,

    /// Identity provider token endpoint.
    #[arg(
        long,
        env = "HATCH_TOKEN_URL",
        default_value = "https://id.hatch.example.com/oauth/token"
    )]
    pub token_url: String,

    /// Identity provider authorization endpoint.
    #[arg(
        long,
        env = "HATCH_AUTHORIZE_URL",
        default_value = "https://id.hatch.example.com/oauth/authorize"
    )]
    pub authorize_url: String,

    /// Redirect URI registered for this client.
    #[arg(
        long,
        env = "HATCH_REDIRECT_URI",
        default_value = "https://launch.hatch.example.com/callback"
    )]
    pub redirect_uri: String,

    /// OAuth client identifier.
    #[arg(long, env = "HATCH_CLIENT_ID", default_value = "hatch-desktop")]
    pub client_id: String,

    /// OAuth scopes requested at sign-in.
    #[arg(long, env = "HATCH_SCOPE", default_value = "openid offline_access")]
    pub scope: String,

    /// Disable "stay signed in" (no credentials are written to disk).
    #[arg(long = "no-remember", env = "HATCH_NO_REMEMBER")]
    pub no_remember: bool,

    /// State directory override (default: XDG state dir).
    #[arg(long, env = "HATCH_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "HATCH_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "HATCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub refresh_margin_ms: Option<u64>,
    #[clap(skip)]
    pub refresh_min_delay_ms: Option<u64>,
    #[clap(skip)]
    pub cache_staleness_ms: Option<u64>,
    #[clap(skip)]
    pub cache_hydrate_bound_ms: Option<u64>,
    #[clap(skip)]
    pub cache_backoff_base_ms: Option<u64>,
    #[clap(skip)]
    pub cache_backoff_cap_ms: Option<u64>,
    #[clap(skip)]
    pub cache_max_attempts: Option<u32>,
    #[clap(skip)]
    pub launch_timeout_ms: Option<u64>,
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, url) in [
            ("--api-base", &self.api_base),
            ("--token-url", &self.token_url),
            ("--authorize-url", &self.authorize_url),
            ("--redirect-uri", &self.redirect_uri),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{name} must be an http(s) URL, got: {url}");
            }
        }

        if self.client_id.is_empty() {
            anyhow::bail!("--client-id must not be empty");
        }

        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }

        if self.max_attempts() == 0 {
            anyhow::bail!("cache max attempts must be at least 1");
        }

        Ok(())
    }

    pub fn remember(&self) -> bool {
        !self.no_remember
    }

    /// State directory: `--state-dir` / `HATCH_STATE_DIR`, else
    /// `$XDG_STATE_HOME/hatch`, else `$HOME/.local/state/hatch`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg).join("hatch");
            }
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
        PathBuf::from(home).join(".local").join("state").join("hatch")
    }

    pub fn session_path(&self) -> PathBuf {
        self.state_dir().join("session.json")
    }

    pub fn installations_path(&self) -> PathBuf {
        self.state_dir().join("installations.json")
    }

    pub fn token_endpoints(&self) -> TokenEndpoints {
        TokenEndpoints {
            token_url: self.token_url.clone(),
            authorize_url: self.authorize_url.clone(),
            redirect_uri: self.redirect_uri.clone(),
            client_id: self.client_id.clone(),
            scope: self.scope.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig { margin: self.refresh_margin(), min_delay: self.refresh_min_delay() }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            staleness: self.cache_staleness(),
            hydrate_bound: self.cache_hydrate_bound(),
            backoff_base: self.cache_backoff_base(),
            backoff_cap: self.cache_backoff_cap(),
            max_attempts: self.max_attempts(),
        }
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(refresh_margin, refresh_margin_ms, "HATCH_REFRESH_MARGIN_MS", 120_000);
    duration_field!(refresh_min_delay, refresh_min_delay_ms, "HATCH_REFRESH_MIN_DELAY_MS", 5_000);
    duration_field!(cache_staleness, cache_staleness_ms, "HATCH_CACHE_STALENESS_MS", 60_000);
    duration_field!(
        cache_hydrate_bound,
        cache_hydrate_bound_ms,
        "HATCH_CACHE_HYDRATE_BOUND_MS",
        600_000
    );
    duration_field!(cache_backoff_base, cache_backoff_base_ms, "HATCH_CACHE_BACKOFF_BASE_MS", 2_000);
    duration_field!(cache_backoff_cap, cache_backoff_cap_ms, "HATCH_CACHE_BACKOFF_CAP_MS", 60_000);
    duration_field!(launch_timeout, launch_timeout_ms, "HATCH_LAUNCH_TIMEOUT_MS", 5_000);

    pub fn max_attempts(&self) -> u32 {
        match self.cache_max_attempts {
            Some(n) => n,
            None => std::env::var("HATCH_CACHE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }

    /// Build a minimal `Config` for tests (fast timers, no persistence dir).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            api_base: "http://127.0.0.1:0".into(),
            token_url: "http://127.0.0.1:0/token".into(),
            authorize_url: "http://127.0.0.1:0/authorize".into(),
            redirect_uri: "http://127.0.0.1:0/callback".into(),
            client_id: "hatch-test".into(),
            scope: "openid offline_access".into(),
            no_remember: false,
            state_dir: None,
            log_format: "json".into(),
            log_level: "debug".into(),
            refresh_margin_ms: Some(100),
            refresh_min_delay_ms: Some(10),
            cache_staleness_ms: Some(50),
            cache_hydrate_bound_ms: Some(1_000),
            cache_backoff_base_ms: Some(10),
            cache_backoff_cap_ms: Some(50),
            cache_max_attempts: Some(2),
            launch_timeout_ms: Some(100),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
