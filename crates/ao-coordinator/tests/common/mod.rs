//! Test harness: an in-memory-sqlite, auth-disabled application instance.

use std::sync::Arc;

use axum::Router;

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

/// Build a fully wired `AppState` against an in-memory database, auth disabled.
pub async fn test_state() -> AppState {
    test_state_with_config(Config::default()).await
}

pub async fn test_state_with_config(config: Config) -> AppState {
    let db = Database::in_memory().await.unwrap();
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

    AppState {
        sessions,
        agents,
        runs: Arc::new(runs),
        runners,
        callbacks,
        hub,
        auth: AuthState::disabled(),
        config: Arc::new(config),
    }
}

pub async fn test_app() -> Router {
    api::create_router(test_state().await)
}
