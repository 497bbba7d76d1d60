//! HTTP API module: REST endpoints for sessions, agents, runs, and runners.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
