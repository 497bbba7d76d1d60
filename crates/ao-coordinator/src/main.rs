use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use ao_coordinator::agent::{AgentRepository, AgentService};
use ao_coordinator::api::{self, AppState};
use ao_coordinator::auth::AuthState;
use ao_coordinator::callback::CallbackOrchestrator;
use ao_coordinator::config::Config;
use ao_coordinator::db::Database;
use ao_coordinator::run::{RunQueue, RunRepository};
use ao_coordinator::runner::RunnerRegistry;
use ao_coordinator::session::{EventRepository, SessionRepository, SessionStore};
use ao_coordinator::ws::WsHub;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Command::Serve(cmd) => serve(cmd),
        Command::Migrate(cmd) => migrate(cmd),
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Agent Orchestrator Coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the coordinator HTTP server.
    Serve(ServeCommand),
    /// Apply pending database migrations and exit.
    Migrate(MigrateCommand),
}

#[derive(Debug, Parser)]
struct ServeCommand {
    /// Address to bind the HTTP server to, overriding `AO_BIND_ADDR`.
    #[arg(long)]
    bind_addr: Option<String>,
}

#[derive(Debug, Parser)]
struct MigrateCommand {
    /// Sqlite database path, overriding `AO_DATABASE_PATH`.
    #[arg(long)]
    database_path: Option<PathBuf>,
}

fn serve(cmd: ServeCommand) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    rt.block_on(async_serve(cmd))
}

fn migrate(cmd: MigrateCommand) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    rt.block_on(async_migrate(cmd))
}

async fn async_migrate(cmd: MigrateCommand) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(path) = cmd.database_path {
        config.database_path = path.display().to_string();
    }
    Database::new(&PathBuf::from(&config.database_path)).await?;
    info!(path = %config.database_path, "migrations applied");
    Ok(())
}

async fn async_serve(cmd: ServeCommand) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(addr) = cmd.bind_addr {
        config.bind_addr = addr;
    }
    let config = Arc::new(config);

    let db = Database::new(&PathBuf::from(&config.database_path)).await?;
    let pool = db.pool().clone();

    let sessions = SessionStore::new(
        SessionRepository::new(pool.clone()),
        EventRepository::new(pool.clone()),
        AgentRepository::new(pool.clone()),
    );
    let agents = Arc::new(AgentService::new(AgentRepository::new(pool.clone())));
    let hub = Arc::new(WsHub::new());
    let runs = RunQueue::new(RunRepository::new(pool.clone()), sessions.clone(), hub.clone());
    let runners = Arc::new(RunnerRegistry::new());
    let callbacks = Arc::new(CallbackOrchestrator::new(runs.clone(), sessions.clone()));
    let auth = if config.auth_disabled {
        AuthState::disabled()
    } else {
        AuthState::new(true, config.auth_api_keys.clone())
    };

    runs.recover(config.run_recovery_mode, config.stale_claim_threshold)
        .await
        .context("recovering run queue at startup")?;

    let state = AppState {
        sessions,
        agents,
        runs: Arc::new(runs),
        runners,
        callbacks,
        hub,
        auth,
        config: config.clone(),
    };

    spawn_background_tickers(state.clone());

    let app = api::create_router(state);
    let addr: SocketAddr = config.bind_addr.parse().context("invalid AO_BIND_ADDR")?;

    info!(%addr, "coordinator listening");
    let listener = TcpListener::bind(addr).await.context("binding to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    Ok(())
}

/// Periodic sweeps that don't belong to any single request: timing out runs
/// with no matching runner, and marking runners stale after a missed
/// heartbeat window.
fn spawn_background_tickers(state: AppState) {
    let timeout_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            if let Err(err) = timeout_state.runs.sweep_timeouts().await {
                warn!(error = %err, "sweep_timeouts failed");
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            let stale = state.runners.sweep_stale(state.config.runner_heartbeat_timeout);
            for runner_id in stale {
                warn!(runner_id, "runner went stale (missed heartbeat window)");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
