//! Application state shared across all handlers: the composition root
//! wiring persistence, the run queue, runner registry, callback
//! orchestrator, and fanout hub together.

use std::sync::Arc;

use crate::agent::AgentService;
use crate::auth::AuthState;
use crate::callback::CallbackOrchestrator;
use crate::config::Config;
use crate::run::RunQueue;
use crate::runner::RunnerRegistry;
use crate::session::SessionStore;
use crate::ws::WsHub;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub agents: Arc<AgentService>,
    pub runs: Arc<RunQueue>,
    pub runners: Arc<RunnerRegistry>,
    pub callbacks: Arc<CallbackOrchestrator>,
    pub hub: Arc<WsHub>,
    pub auth: AuthState,
    pub config: Arc<Config>,
}
