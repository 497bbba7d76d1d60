//! API route definitions (spec §6).

use axum::http::HeaderValue;
use axum::http::{Method, header};
use axum::routing::{get, patch, post};
use axum::{Router, middleware};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;
use crate::ws::ws_handler;

use super::handlers;
use super::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));
    let auth_state = state.auth.clone();

    let protected_routes = Router::new()
        .route("/ws", get(ws_handler))
        .route("/sessions", get(handlers::list_sessions).post(handlers::create_session))
        .route("/sessions/{session_id}", get(handlers::get_session).delete(handlers::delete_session))
        .route("/sessions/{session_id}/status", get(handlers::get_session_status))
        .route("/sessions/{session_id}/result", get(handlers::get_session_result))
        .route("/sessions/{session_id}/metadata", patch(handlers::patch_session_metadata))
        .route("/sessions/{session_id}/stop", post(handlers::stop_session))
        .route(
            "/sessions/{session_id}/events",
            get(handlers::list_events).post(handlers::append_session_event),
        )
        .route("/events", post(handlers::append_event_legacy))
        .route("/agents", get(handlers::list_agents).post(handlers::create_agent))
        .route(
            "/agents/{name}",
            get(handlers::get_agent)
                .patch(handlers::patch_agent)
                .delete(handlers::delete_agent),
        )
        .route("/agents/{name}/status", patch(handlers::patch_agent_status))
        .route("/runs", get(handlers::list_runs).post(handlers::create_run))
        .route("/runs/{run_id}", get(handlers::get_run))
        .route("/runs/{run_id}/stop", post(handlers::stop_run))
        .route("/runners/register", post(handlers::register_runner))
        .route("/runners/jobs", get(handlers::poll_jobs))
        .route("/runners/jobs/{run_id}/started", post(handlers::report_started))
        .route("/runners/jobs/{run_id}/completed", post(handlers::report_completed))
        .route("/runners/jobs/{run_id}/failed", post(handlers::report_failed))
        .route("/runners/jobs/{run_id}/stopped", post(handlers::report_stopped))
        .route("/runners/heartbeat", post(handlers::heartbeat))
        .route("/runners", get(handlers::list_runners))
        .route("/runners/{runner_id}", axum::routing::delete(handlers::deregister_runner))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .layer(cors)
        .layer(trace_layer)
        .with_state(state)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let origins = &state.config.cors_origins;

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::OPTIONS,
    ];
    let headers = [header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN];

    if origins.is_empty() {
        tracing::warn!("CORS: no origins configured, denying all cross-origin requests");
        return CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")));
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: invalid origin in config: {origin}");
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        tracing::error!("CORS: all configured origins are invalid");
        return CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")));
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
