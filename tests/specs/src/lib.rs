// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness for end-to-end scenario tests.
//!
//! Runs an in-process mock of the identity provider and the launcher
//! backend, then assembles the full client stack against it: session
//! store, renewer, retry coordinator, refresh scheduler, and the
//! installations cache. Scenarios drive the assembled stack the way the
//! launcher shell would.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tokio::net::TcpListener;

use hatch::api::{ApiClient, AuthorizedInstallations};
use hatch::installations::{CacheConfig, InstallationsCache};
use hatch::renewal::{Renewer, TokenEndpoints};
use hatch::retry::RetryCoordinator;
use hatch::scheduler::{RefreshScheduler, SchedulerConfig};
use hatch::session::SessionStore;

/// Scripted responses for one route: served in request order, repeating
/// the last entry once exhausted.
pub struct Script {
    responses: Mutex<Vec<(u16, String)>>,
    calls: AtomicU32,
}

impl Script {
    pub fn new(responses: Vec<(u16, String)>) -> Arc<Self> {
        Arc::new(Self { responses: Mutex::new(responses), calls: AtomicU32::new(0) })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    fn next(&self) -> (axum::http::StatusCode, String) {
        let idx = self.calls.fetch_add(1, Ordering::Relaxed) as usize;
        let responses = match self.responses.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let (status, body) = responses
            .get(idx.min(responses.len().saturating_sub(1)))
            .cloned()
            .unwrap_or((500, "{}".to_owned()));
        (
            axum::http::StatusCode::from_u16(status)
                .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR),
            body,
        )
    }
}

/// In-process identity provider + launcher backend.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub token: Arc<Script>,
    pub installations: Arc<Script>,
    pub launch_token: Arc<Script>,
}

impl MockBackend {
    pub async fn start(
        token: Arc<Script>,
        installations: Arc<Script>,
        launch_token: Arc<Script>,
    ) -> anyhow::Result<Self> {
        let t = Arc::clone(&token);
        let i = Arc::clone(&installations);
        let l = Arc::clone(&launch_token);
        let app = Router::new()
            .route("/token", post(move || async move { t.next() }))
            .route("/installations", get(move || async move { i.next() }))
            .route(
                "/installations/{id}/launch-token",
                post(move || async move { l.next() }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self { addr, token, installations, launch_token })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Access token whose `exp` claim can be read back.
pub fn token_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#);
    let body = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{body}.sig")
}

pub fn epoch_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

pub fn token_response(access: &str, refresh: &str) -> (u16, String) {
    (
        200,
        serde_json::json!({ "access_token": access, "refresh_token": refresh }).to_string(),
    )
}

pub fn installations_response() -> (u16, String) {
    (
        200,
        serde_json::json!([
            {"id": "ins-prod", "display_name": "Main office", "variant": "production"},
            {"id": "ins-test", "display_name": "Staging", "variant": "test"}
        ])
        .to_string(),
    )
}

/// The assembled client stack under test.
pub struct Stack {
    pub session: Arc<SessionStore>,
    pub renewer: Arc<Renewer>,
    pub coordinator: Arc<RetryCoordinator>,
    pub scheduler: Arc<RefreshScheduler>,
    pub cache: Arc<InstallationsCache>,
    pub api: Arc<ApiClient>,
    pub state_dir: tempfile::TempDir,
}

impl Stack {
    pub fn session_path(&self) -> std::path::PathBuf {
        self.state_dir.path().join("session.json")
    }

    pub fn installations_path(&self) -> std::path::PathBuf {
        self.state_dir.path().join("installations.json")
    }
}

/// Assemble the full stack against `backend`, persisting under a temp
/// state dir. Scheduler and cache timings are tightened so scenarios run
/// in real time.
pub fn assemble(
    backend: &MockBackend,
    scheduler_config: SchedulerConfig,
) -> anyhow::Result<Stack> {
    let state_dir = tempfile::tempdir()?;
    let session =
        Arc::new(SessionStore::new(Some(state_dir.path().join("session.json")), true));

    let endpoints = TokenEndpoints {
        token_url: format!("{}/token", backend.base_url()),
        authorize_url: format!("{}/authorize", backend.base_url()),
        redirect_uri: "http://127.0.0.1/callback".to_owned(),
        client_id: "hatch-specs".to_owned(),
        scope: "openid offline_access".to_owned(),
    };
    let renewer = Arc::new(Renewer::new(endpoints));
    let coordinator = Arc::new(RetryCoordinator::new(
        Arc::clone(&session),
        Arc::clone(&renewer) as Arc<dyn hatch::renewal::RenewClient>,
    ));
    let scheduler = Arc::new(RefreshScheduler::new(
        Arc::clone(&session),
        Arc::clone(&coordinator),
        scheduler_config,
    ));

    let api = Arc::new(ApiClient::new(backend.base_url()));
    let source =
        Arc::new(AuthorizedInstallations::new(Arc::clone(&coordinator), Arc::clone(&api)));
    let cache = Arc::new(InstallationsCache::new(
        source,
        Some(state_dir.path().join("installations.json")),
        CacheConfig {
            staleness: std::time::Duration::from_millis(50),
            hydrate_bound: std::time::Duration::from_secs(600),
            backoff_base: std::time::Duration::from_millis(20),
            backoff_cap: std::time::Duration::from_millis(100),
            max_attempts: 3,
        },
    ));

    Ok(Stack { session, renewer, coordinator, scheduler, cache, api, state_dir })
}
