// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::error;

use hatch::api::{ApiClient, AuthorizedInstallations};
use hatch::config::Config;
use hatch::installations::InstallationsCache;
use hatch::launch::{self, LaunchDetector, LaunchOutcome, SystemOpener};
use hatch::pkce;
use hatch::renewal::Renewer;
use hatch::retry::RetryCoordinator;
use hatch::session::{SessionStore, SignOutReason};

#[derive(Debug, Parser)]
#[command(name = "hatch", version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in via the browser and store the session.
    Login,
    /// List the installations you may launch.
    Installations,
    /// Launch an installation into the desktop app.
    Launch {
        /// Installation id (see `hatch installations`).
        id: String,
    },
    /// Sign out and remove stored credentials.
    Logout,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli.config);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

/// Everything a signed-in command needs, assembled once.
struct Client {
    session: Arc<SessionStore>,
    coordinator: Arc<RetryCoordinator>,
    api: Arc<ApiClient>,
    cache: Arc<InstallationsCache>,
}

fn build_client(config: &Config) -> Client {
    let session = Arc::new(SessionStore::new(Some(config.session_path()), config.remember()));
    let renewer = Arc::new(Renewer::new(config.token_endpoints()));
    let coordinator = Arc::new(RetryCoordinator::new(Arc::clone(&session), renewer));
    let api = Arc::new(ApiClient::new(config.api_base.clone()));
    let source =
        Arc::new(AuthorizedInstallations::new(Arc::clone(&coordinator), Arc::clone(&api)));
    let cache = Arc::new(InstallationsCache::new(
        source,
        Some(config.installations_path()),
        config.cache_config(),
    ));
    Client { session, coordinator, api, cache }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config;
    let client = build_client(&config);

    match cli.command {
        Command::Login => login(&config, &client).await,
        Command::Installations => installations(&config, &client).await,
        Command::Launch { id } => launch_installation(&config, &client, &id).await,
        Command::Logout => logout(&client).await,
    }
}

async fn login(config: &Config, client: &Client) -> anyhow::Result<()> {
    let renewer = Renewer::new(config.token_endpoints());

    let verifier = pkce::generate_code_verifier();
    let challenge = pkce::compute_code_challenge(&verifier);
    let state = pkce::generate_state();
    let url = renewer.authorize_url(&challenge, &state);

    println!("Opening the sign-in page in your browser:");
    println!("  {url}");
    if let Err(e) = open::that(&url) {
        println!("(could not open a browser automatically: {e})");
    }

    print!("Paste the authorization code: ");
    std::io::stdout().flush()?;
    let mut code = String::new();
    std::io::stdin().read_line(&mut code)?;
    let code = code.trim();
    if code.is_empty() {
        anyhow::bail!("no authorization code entered");
    }

    let pair = renewer.exchange(code, &verifier).await?;
    client.session.set_credentials(pair).await;
    println!("Signed in.");
    Ok(())
}

async fn require_session(client: &Client) -> anyhow::Result<()> {
    if !client.session.restore().await {
        anyhow::bail!("not signed in (run `hatch login` first)");
    }
    Ok(())
}

async fn installations(config: &Config, client: &Client) -> anyhow::Result<()> {
    require_session(client).await?;

    client.cache.hydrate();
    if client.cache.refresh_if_stale(config.cache_staleness()) {
        wait_for_refresh(&client.cache).await;
    }

    let records = client.cache.get();
    if records.is_empty() {
        println!("No installations available.");
        return Ok(());
    }
    for record in records {
        println!("{:<24} {:<12} {}", record.id, record.variant.scheme(), record.display_name);
    }
    Ok(())
}

async fn launch_installation(config: &Config, client: &Client, id: &str) -> anyhow::Result<()> {
    require_session(client).await?;

    client.cache.hydrate();
    let mut record = client.cache.get().into_iter().find(|r| r.id == id);
    if record.is_none() {
        // Unknown locally; the list may be stale.
        client.cache.refresh_if_stale(Duration::ZERO);
        wait_for_refresh(&client.cache).await;
        record = client.cache.get().into_iter().find(|r| r.id == id);
    }
    let Some(record) = record else {
        anyhow::bail!("unknown installation: {id}");
    };

    let api = Arc::clone(&client.api);
    let installation_id = record.id.clone();
    let token = client
        .coordinator
        .execute(move |access| {
            let api = Arc::clone(&api);
            let installation_id = installation_id.clone();
            async move { api.launch_token(&access, &installation_id).await }
        })
        .await?;

    let uri = launch::launch_uri(record.variant, &token);
    println!("Launching {} ...", record.display_name);

    // No focus signals in a terminal; the detector waits out its window and
    // falls back unless the channel reports a hand-off.
    let detector = LaunchDetector::new(Arc::new(SystemOpener), config.launch_timeout());
    let (_signals_tx, signals_rx) = mpsc::channel(4);
    let outcome = detector
        .launch(&uri, signals_rx, || {
            println!("The desktop app did not respond.");
            println!("Install it from https://hatch.example.com/download and try again.");
        })
        .await;

    if outcome == LaunchOutcome::Handled {
        println!("Handed off to the desktop app.");
    }
    Ok(())
}

async fn logout(client: &Client) -> anyhow::Result<()> {
    // Restore first so the in-memory state and the file are cleared together.
    let _ = client.session.restore().await;
    client.session.clear(SignOutReason::UserRequested).await;
    client.cache.stop();
    println!("Signed out.");
    Ok(())
}

/// Wait for an in-flight cache refresh to settle, bounded so a long backoff
/// tail cannot hang the command.
async fn wait_for_refresh(cache: &InstallationsCache) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while cache.is_refreshing() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
