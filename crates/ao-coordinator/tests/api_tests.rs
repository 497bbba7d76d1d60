//! API integration tests driving the full `axum::Router` end to end.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{test_app, test_state};

async fn call(app: axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .method(method)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_endpoint_requires_no_auth() {
    let app = test_app().await;
    let (status, body) = call(app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_and_fetch_agent_blueprint() {
    let app = test_app().await;

    let (status, created) = call(
        app.clone(),
        Method::POST,
        "/agents",
        Some(json!({
            "name": "researcher",
            "description": "Looks things up",
            "agent_type": "autonomous",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "active");

    let (status, fetched) = call(app, Method::GET, "/agents/researcher", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "researcher");
}

#[tokio::test]
async fn create_run_rejects_parameters_missing_prompt() {
    let app = test_app().await;

    call(
        app.clone(),
        Method::POST,
        "/agents",
        Some(json!({
            "name": "writer",
            "description": "Writes drafts",
            "agent_type": "autonomous",
        })),
    )
    .await;

    let (status, body) = call(
        app,
        Method::POST,
        "/runs",
        Some(json!({
            "run_type": "start_session",
            "agent_name": "writer",
            "parameters": {},
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["error"], "parameter_validation_failed");
    assert_eq!(body["detail"]["agent_name"], "writer");
    assert!(body["detail"]["validation_errors"].as_array().unwrap().len() >= 1);
    assert!(body["detail"]["parameters_schema"]["required"].as_array().unwrap().contains(&json!("prompt")));
}

#[tokio::test]
async fn create_run_starts_session_and_runner_claims_it() {
    let app = test_app().await;

    call(
        app.clone(),
        Method::POST,
        "/agents",
        Some(json!({
            "name": "writer",
            "description": "Writes drafts",
            "agent_type": "autonomous",
        })),
    )
    .await;

    let (status, created) = call(
        app.clone(),
        Method::POST,
        "/runs",
        Some(json!({
            "run_type": "start_session",
            "agent_name": "writer",
            "parameters": {"prompt": "draft a memo"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = created["session_id"].as_str().unwrap().to_string();

    let (status, registered) = call(
        app.clone(),
        Method::POST,
        "/runners/register",
        Some(json!({
            "hostname": "box-1",
            "project_dir": "/work/proj",
            "executor_profile": "claude-default",
            "capabilities": {"tags": []},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let runner_id = registered["runner_id"].as_str().unwrap().to_string();

    let (status, polled) = call(
        app.clone(),
        Method::GET,
        &format!("/runners/jobs?runner_id={runner_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polled["run"]["session_id"], session_id);

    let run_id = polled["run"]["run_id"].as_str().unwrap().to_string();

    let (status, _) = call(app.clone(), Method::POST, &format!("/runners/jobs/{run_id}/started"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, session) = call(app.clone(), Method::GET, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["status"], "running");

    // A successfully completed run does not, by itself, terminate the
    // session: only an explicit `session_stop` event does.
    let (status, _) = call(app.clone(), Method::POST, &format!("/runners/jobs/{run_id}/completed"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, session) = call(app.clone(), Method::GET, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["status"], "running");

    let (status, _) = call(
        app.clone(),
        Method::POST,
        &format!("/sessions/{session_id}/events"),
        Some(json!({"event_type": "session_stop", "exit_code": 0, "reason": "done"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, session) = call(app, Method::GET, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["status"], "finished");
}

#[tokio::test]
async fn runner_failure_marks_session_failed() {
    let app = test_app().await;

    let (_, created) = call(
        app.clone(),
        Method::POST,
        "/runs",
        Some(json!({"run_type": "start_session", "parameters": {"prompt": "hi"}})),
    )
    .await;
    let session_id = created["session_id"].as_str().unwrap().to_string();
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let (status, _) = call(
        app.clone(),
        Method::POST,
        &format!("/runners/jobs/{run_id}/failed"),
        Some(json!({"error": "executor crashed"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, session) = call(app, Method::GET, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(session["status"], "failed");
}

#[tokio::test]
async fn output_schema_validation_retries_then_fails_the_session() {
    let app = test_app().await;

    call(
        app.clone(),
        Method::POST,
        "/agents",
        Some(json!({
            "name": "grader",
            "description": "Grades submissions",
            "agent_type": "autonomous",
            "output_schema": {
                "type": "object",
                "required": ["score"],
                "properties": {"score": {"type": "number"}}
            },
        })),
    )
    .await;

    let (_, created) = call(
        app.clone(),
        Method::POST,
        "/runs",
        Some(json!({
            "run_type": "start_session",
            "agent_name": "grader",
            "parameters": {"prompt": "grade this"},
        })),
    )
    .await;
    let session_id = created["session_id"].as_str().unwrap().to_string();
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let bad_result = json!({"event_type": "result", "result_text": null, "result_data": {"score": "not a number"}});

    let (status, body) = call(
        app.clone(),
        Method::POST,
        &format!("/sessions/{session_id}/events"),
        Some(bad_result.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["error"], "output_schema_validation_failed");
    assert_eq!(body["detail"]["agent_name"], "grader");
    assert!(body["detail"]["validation_errors"].as_array().unwrap().len() >= 1);

    let (_, session) = call(app.clone(), Method::GET, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(session["status"], "pending");

    // The first failure must have injected a retry resume run carrying the
    // validation errors, giving the agent a second attempt.
    let (_, runs) = call(app.clone(), Method::GET, "/runs", None).await;
    let retry_runs: Vec<&Value> = runs
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["session_id"] == session_id && r["run_type"] == "resume_session")
        .collect();
    assert_eq!(retry_runs.len(), 1, "expected exactly one retry resume run after the first failure");
    assert!(
        retry_runs[0]["parameters"]["prompt"]
            .as_str()
            .unwrap_or_default()
            .contains("output-schema-validation-error"),
        "expected the retry prompt to carry the validation errors and required schema"
    );

    let (status, body) = call(
        app.clone(),
        Method::POST,
        &format!("/sessions/{session_id}/events"),
        Some(bad_result),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["error"], "output_schema_validation_failed");

    let (_, session) = call(app.clone(), Method::GET, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(session["status"], "failed");

    let (_, run) = call(app, Method::GET, &format!("/runs/{run_id}"), None).await;
    assert!(
        run["error"]
            .as_str()
            .unwrap_or_default()
            .starts_with("OutputSchemaValidationError: Output validation failed after 1 retry"),
        "run.error was {:?}",
        run["error"]
    );
}

#[tokio::test]
async fn get_session_status_returns_current_status() {
    let app = test_app().await;

    let (_, created) = call(
        app.clone(),
        Method::POST,
        "/runs",
        Some(json!({"run_type": "start_session", "parameters": {"prompt": "hi"}})),
    )
    .await;
    let session_id = created["session_id"].as_str().unwrap().to_string();

    let (status, body) = call(app, Method::GET, &format!("/sessions/{session_id}/status"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], session_id);
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn child_session_completion_resumes_idle_parent_via_callback() {
    let state = test_state().await;
    let app = ao_coordinator::api::create_router(state.clone());

    let (_, parent) = call(
        app.clone(),
        Method::POST,
        "/runs",
        Some(json!({"run_type": "start_session", "parameters": {"prompt": "orchestrate"}})),
    )
    .await;
    let parent_id = parent["session_id"].as_str().unwrap().to_string();
    let parent_run_id = parent["run_id"].as_str().unwrap().to_string();

    // The parent's own run must finish before it's considered idle.
    call(app.clone(), Method::POST, &format!("/runners/jobs/{parent_run_id}/completed"), None).await;

    let (_, child) = call(
        app.clone(),
        Method::POST,
        "/runs",
        Some(json!({
            "run_type": "start_session",
            "parameters": {"prompt": "do the subtask"},
            "parent_session_id": parent_id,
        })),
    )
    .await;
    let child_id = child["session_id"].as_str().unwrap().to_string();

    call(
        app.clone(),
        Method::POST,
        &format!("/sessions/{child_id}/events"),
        Some(json!({"event_type": "result", "result_text": "subtask done", "result_data": null})),
    )
    .await;

    let (status, _) = call(
        app.clone(),
        Method::POST,
        &format!("/sessions/{child_id}/events"),
        Some(json!({"event_type": "session_stop", "exit_code": 0, "reason": "done"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, runs) = call(app, Method::GET, "/runs", None).await;
    let parent_runs: Vec<&Value> = runs
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["session_id"] == parent_id)
        .collect();
    assert!(
        parent_runs
            .iter()
            .any(|r| r["parameters"]["prompt"].as_str().unwrap_or_default().contains("agent-callback")),
        "expected a resume run carrying the rendered <agent-callback> prompt"
    );
}

#[tokio::test]
async fn stopping_a_run_queues_a_stop_for_its_runner() {
    let app = test_app().await;

    let (_, created) = call(
        app.clone(),
        Method::POST,
        "/runs",
        Some(json!({"run_type": "start_session", "parameters": {"prompt": "hi"}})),
    )
    .await;
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let (_, registered) = call(
        app.clone(),
        Method::POST,
        "/runners/register",
        Some(json!({"executor_profile": "claude-default"})),
    )
    .await;
    let runner_id = registered["runner_id"].as_str().unwrap().to_string();

    let (_, polled) = call(app.clone(), Method::GET, &format!("/runners/jobs?runner_id={runner_id}"), None).await;
    assert_eq!(polled["run"]["run_id"], run_id);

    let (status, _) = call(app.clone(), Method::POST, &format!("/runs/{run_id}/stop"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, polled) = call(app, Method::GET, &format!("/runners/jobs?runner_id={runner_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polled["stop_runs"][0], run_id);
}

#[tokio::test]
async fn runner_long_poll_wakes_up_when_a_run_is_queued() {
    let app = test_app().await;

    let (_, registered) = call(
        app.clone(),
        Method::POST,
        "/runners/register",
        Some(json!({"executor_profile": "claude-default"})),
    )
    .await;
    let runner_id = registered["runner_id"].as_str().unwrap().to_string();

    // Start long-polling before any run exists; the handler should block on
    // `claim_notify` rather than returning immediately.
    let poll_app = app.clone();
    let poll_runner_id = runner_id.clone();
    let poll_task = tokio::spawn(async move {
        call(poll_app, Method::GET, &format!("/runners/jobs?runner_id={poll_runner_id}"), None).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!poll_task.is_finished(), "poll should still be waiting with no run queued");

    let (_, created) = call(
        app,
        Method::POST,
        "/runs",
        Some(json!({"run_type": "start_session", "parameters": {"prompt": "hi"}})),
    )
    .await;
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let (status, polled) = poll_task.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polled["run"]["run_id"], run_id);
}

#[tokio::test]
async fn websocket_sends_init_snapshot_then_streams_session_created() {
    let state = test_state().await;

    let ws_app = ao_coordinator::api::create_router(state.clone());
    let server = axum_test::TestServer::new(ws_app).unwrap();
    let mut ws = server.get_websocket("/ws").await.into_websocket().await;

    let init: Value = ws.receive_json().await;
    assert_eq!(init["type"], "init");
    assert!(init["sessions"].as_array().unwrap().is_empty());

    let rest_app = ao_coordinator::api::create_router(state);
    let (_, created) = call(
        rest_app,
        Method::POST,
        "/runs",
        Some(json!({"run_type": "start_session", "parameters": {"prompt": "hi"}})),
    )
    .await;

    let frame: Value = ws.receive_json().await;
    assert_eq!(frame["type"], "session_created");
    assert_eq!(frame["session"]["session_id"], created["session_id"].clone());
}
