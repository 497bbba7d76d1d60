//! HTTP handlers for the Coordinator's REST surface (spec §6).

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use ao_protocol::agent::{AgentBlueprintCreate, AgentBlueprintPatch, AgentStatusPatch};
use ao_protocol::event::EventCreate;
use ao_protocol::run::{ExecutionMode, RunCreate, RunStatus, RunType};
use ao_protocol::runner::{
    FailedReport, HeartbeatRequest, JobsQuery, PollResponse, RegisterRequest, RegisterResponse,
};
use ao_protocol::session::{SessionCreate, SessionMetadataPatch, SessionResult, SessionStatus};

use crate::schema::{self, SchemaError};
use crate::session::AppendOutcome;

use super::error::{ApiError, ApiResult, SchemaValidationFailure};
use super::state::AppState;

const OUTPUT_SCHEMA_VALIDATION_ERROR: &str =
    "OutputSchemaValidationError: Output validation failed after 1 retry";

// ---- Sessions ----

#[derive(Serialize)]
pub struct SessionsResponse {
    sessions: Vec<ao_protocol::session::Session>,
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<SessionsResponse>> {
    let sessions = state.sessions.list_sessions().await?;
    Ok(Json(SessionsResponse { sessions }))
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    ok: bool,
    session: ao_protocol::session::Session,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<SessionCreate>,
) -> ApiResult<(StatusCode, Json<CreateSessionResponse>)> {
    let session = state.sessions.create_session(body).await?;
    state.hub.session_created(session.clone());
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { ok: true, session })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ao_protocol::session::Session>> {
    Ok(Json(state.sessions.get_session_required(&session_id).await?))
}

#[derive(Serialize)]
pub struct SessionStatusResponse {
    session_id: String,
    status: SessionStatus,
}

pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let session = state.sessions.get_session_required(&session_id).await?;
    Ok(Json(SessionStatusResponse { session_id: session.session_id, status: session.status }))
}

pub async fn get_session_result(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionResult>> {
    let (result_text, result_data) = state
        .sessions
        .get_result(&session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session not found: {session_id}")))?;
    Ok(Json(SessionResult { result_text, result_data }))
}

pub async fn patch_session_metadata(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SessionMetadataPatch>,
) -> ApiResult<Json<ao_protocol::session::Session>> {
    state
        .sessions
        .update_metadata(&session_id, body.session_name.as_deref(), body.project_dir.as_deref())
        .await?;
    let session = state.sessions.get_session_required(&session_id).await?;
    state.hub.session_updated(session.clone());
    Ok(Json(session))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sessions.delete_session(&session_id).await?;
    state.hub.session_deleted(session_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    let run = state
        .runs
        .get_run_by_session_id(&session_id)
        .await?
        .ok_or_else(|| ApiError::bad_request(format!("session '{session_id}' has no active run")))?;
    stop_run_and_signal(&state, &run.run_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Events ----

pub async fn list_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<ao_protocol::event::Event>>> {
    Ok(Json(state.sessions.list_events(&session_id).await?))
}

pub async fn append_session_event(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<EventCreate>,
) -> ApiResult<(StatusCode, Json<ao_protocol::event::Event>)> {
    append_event_for_session(&state, &session_id, body).await
}

#[derive(Deserialize)]
pub struct LegacyEventCreate {
    session_id: String,
    #[serde(flatten)]
    event: EventCreate,
}

pub async fn append_event_legacy(
    State(state): State<AppState>,
    Json(body): Json<LegacyEventCreate>,
) -> ApiResult<(StatusCode, Json<ao_protocol::event::Event>)> {
    append_event_for_session(&state, &body.session_id, body.event).await
}

async fn append_event_for_session(
    state: &AppState,
    session_id: &str,
    body: EventCreate,
) -> ApiResult<(StatusCode, Json<ao_protocol::event::Event>)> {
    let session = state.sessions.get_session_required(session_id).await?;
    let agent = state.sessions.resolve_agent(&session).await?;

    match state
        .sessions
        .append_event(session_id, body.payload, agent.as_ref())
        .await?
    {
        AppendOutcome::Appended { event, session_became_terminal } => {
            state.hub.event(event.clone());
            if session_became_terminal {
                let detail = match &event.payload {
                    ao_protocol::event::EventPayload::SessionStop { reason, .. } => Some(reason.clone()),
                    _ => None,
                };
                state.callbacks.on_child_terminal(session_id, detail).await?;
                state.callbacks.flush(session_id).await?;
            }
            Ok((StatusCode::CREATED, Json(event)))
        }
        AppendOutcome::OutputValidationFailed { errors } => {
            let schema = agent
                .as_ref()
                .and_then(|a| a.output_schema.clone())
                .unwrap_or_else(|| serde_json::json!({}));
            retry_output_schema_validation(state, session_id, &schema, &errors).await?;
            Err(ApiError::OutputSchemaValidation(SchemaValidationFailure {
                agent_name: agent.as_ref().map(|a| a.name.clone()).unwrap_or_default(),
                schema,
                errors,
            }))
        }
        AppendOutcome::OutputValidationExhausted { errors } => {
            let schema = agent
                .as_ref()
                .and_then(|a| a.output_schema.clone())
                .unwrap_or_else(|| serde_json::json!({}));
            fail_owning_run(state, session_id, OUTPUT_SCHEMA_VALIDATION_ERROR).await?;
            Err(ApiError::OutputSchemaValidation(SchemaValidationFailure {
                agent_name: agent.as_ref().map(|a| a.name.clone()).unwrap_or_default(),
                schema,
                errors,
            }))
        }
    }
}

/// Inject a resume run whose prompt carries the validation errors and
/// re-states the required schema, giving the agent a second attempt before
/// the retry budget (spec §4.6) is exhausted. Mirrors the resume-run
/// injection `CallbackOrchestrator::deliver` uses for child-completion frames.
async fn retry_output_schema_validation(
    state: &AppState,
    session_id: &str,
    schema: &serde_json::Value,
    errors: &[schema::ValidationError],
) -> ApiResult<()> {
    let errors_json = serde_json::to_string_pretty(errors).unwrap_or_default();
    let schema_json = serde_json::to_string_pretty(schema).unwrap_or_default();
    let prompt = format!(
        "<output-schema-validation-error>\n## Validation Errors\n```json\n{errors_json}\n```\n\n## Required Output Schema\n```json\n{schema_json}\n```\n</output-schema-validation-error>\n\nYour previous result did not conform to the required output schema. Correct it and submit a result that validates against the schema above."
    );
    state
        .runs
        .add_run(RunCreate {
            run_type: RunType::ResumeSession,
            session_id: Some(session_id.to_string()),
            session_name: None,
            agent_name: None,
            parameters: serde_json::json!({ "prompt": prompt }),
            project_dir: None,
            parent_session_id: None,
            execution_mode: ExecutionMode::AsyncCallback,
        })
        .await?;
    Ok(())
}

async fn fail_owning_run(state: &AppState, session_id: &str, reason: &str) -> ApiResult<()> {
    if let Some(run) = state.runs.get_run_by_session_id(session_id).await? {
        state
            .runs
            .update_run_status(&run.run_id, RunStatus::Failed, Some(reason.to_string()))
            .await?;
    }
    state.callbacks.on_child_terminal(session_id, Some(reason.to_string())).await?;
    state.callbacks.flush(session_id).await?;
    Ok(())
}

// ---- Agents ----

pub async fn list_agents(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ao_protocol::agent::AgentBlueprint>>> {
    Ok(Json(state.agents.list().await?))
}

pub async fn create_agent(
    State(state): State<AppState>,
    Json(body): Json<AgentBlueprintCreate>,
) -> ApiResult<(StatusCode, Json<ao_protocol::agent::AgentBlueprint>)> {
    Ok((StatusCode::CREATED, Json(state.agents.create(body).await?)))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ao_protocol::agent::AgentBlueprint>> {
    Ok(Json(state.agents.get_required(&name).await?))
}

pub async fn patch_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<AgentBlueprintPatch>,
) -> ApiResult<Json<ao_protocol::agent::AgentBlueprint>> {
    Ok(Json(state.agents.patch(&name, body).await?))
}

pub async fn patch_agent_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<AgentStatusPatch>,
) -> ApiResult<Json<ao_protocol::agent::AgentBlueprint>> {
    Ok(Json(state.agents.set_status(&name, body.status).await?))
}

pub async fn delete_agent(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<StatusCode> {
    state.agents.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Runs ----

pub async fn create_run(
    State(state): State<AppState>,
    Json(body): Json<RunCreate>,
) -> ApiResult<(StatusCode, Json<ao_protocol::run::RunCreated>)> {
    let agent = match &body.agent_name {
        Some(name) => Some(state.agents.get_required(name).await?),
        None => None,
    };

    if let Some(agent) = &agent {
        let schema = agent.effective_parameters_schema();
        match schema::validate(&schema, &body.parameters) {
            Ok(()) => {}
            Err(SchemaError::Invalid(errors)) => {
                return Err(ApiError::ParameterValidation(SchemaValidationFailure {
                    agent_name: agent.name.clone(),
                    schema,
                    errors,
                }));
            }
            Err(SchemaError::InvalidSchema(msg)) => {
                return Err(ApiError::internal(format!("agent '{}' has an invalid parameters_schema: {msg}", agent.name)));
            }
        }
    }

    let created = state.runs.add_run(body).await?;
    let demands = agent.as_ref().and_then(|a| a.demands.clone());
    state
        .runs
        .set_run_demands(&created.run_id, demands, state.config.run_no_match_timeout.as_secs() as i64)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Deserialize)]
pub struct ListRunsQuery {
    #[serde(default)]
    include_completed: bool,
    status: Option<RunStatus>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<Vec<ao_protocol::run::Run>>> {
    Ok(Json(state.runs.list(query.include_completed, query.status).await?))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ao_protocol::run::Run>> {
    let run = state
        .runs
        .get_run_with_fallback(&run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run not found: {run_id}")))?;
    Ok(Json(run))
}

pub async fn stop_run(State(state): State<AppState>, Path(run_id): Path<String>) -> ApiResult<StatusCode> {
    stop_run_and_signal(&state, &run_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_run_and_signal(state: &AppState, run_id: &str) -> ApiResult<()> {
    if let Some(runner_id) = state.runs.request_stop(run_id).await? {
        state.runners.queue_stop(&runner_id, run_id.to_string());
    }
    Ok(())
}

// ---- Runner control plane ----

pub async fn register_runner(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<Json<RegisterResponse>> {
    let info = state.runners.register(body);
    Ok(Json(RegisterResponse {
        runner_id: info.runner_id,
        poll_endpoint: "/runners/jobs".to_string(),
        poll_timeout_seconds: state.config.runner_poll_timeout.as_secs(),
        heartbeat_interval_seconds: state.config.runner_heartbeat_interval.as_secs(),
    }))
}

pub async fn poll_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<(StatusCode, Json<PollResponse>)> {
    let response = crate::runner::poll_for_job(
        &state.runs,
        &state.runners,
        &query.runner_id,
        state.config.runner_poll_timeout,
    )
    .await?;

    if response.is_empty() {
        Ok((StatusCode::NO_CONTENT, Json(response)))
    } else {
        Ok((StatusCode::OK, Json(response)))
    }
}

pub async fn report_started(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.runs.update_run_status(&run_id, RunStatus::Running, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn report_completed(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.runs.update_run_status(&run_id, RunStatus::Completed, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn report_failed(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<FailedReport>,
) -> ApiResult<StatusCode> {
    let (session_id, became_terminal) = state
        .runs
        .update_run_status(&run_id, RunStatus::Failed, Some(body.error.clone()))
        .await?;
    if became_terminal {
        state.callbacks.on_child_terminal(&session_id, Some(body.error)).await?;
        state.callbacks.flush(&session_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn report_stopped(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<StatusCode> {
    let (session_id, became_terminal) = state
        .runs
        .update_run_status(&run_id, RunStatus::Stopped, None)
        .await?;
    if became_terminal {
        state.callbacks.on_child_terminal(&session_id, None).await?;
        state.callbacks.flush(&session_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(body): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    if state.runners.heartbeat(&body.runner_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("runner not registered: {}", body.runner_id)))
    }
}

pub async fn list_runners(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ao_protocol::runner::RunnerInfo>>> {
    Ok(Json(state.runners.list()))
}

#[derive(Deserialize)]
pub struct DeregisterQuery {
    #[serde(default)]
    #[serde(rename = "self")]
    is_self: bool,
}

pub async fn deregister_runner(
    State(state): State<AppState>,
    Path(runner_id): Path<String>,
    Query(query): Query<DeregisterQuery>,
) -> ApiResult<StatusCode> {
    if query.is_self {
        state.runners.deregister(&runner_id);
    } else {
        // Marked for deregistration; the runner sees `{deregistered:true}` on
        // its next poll and removes itself from the registry at that point.
        state.runners.mark_shutting_down(&runner_id);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
