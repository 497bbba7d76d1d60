//! The Session + Event Store (spec §4.3).

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;

use ao_protocol::agent::AgentBlueprint;
use ao_protocol::event::{Event, EventPayload};
use ao_protocol::session::{Session, SessionCreate, SessionStatus};

use crate::agent::AgentRepository;
use crate::schema::{self, ValidationError};

use super::repository::{EventRepository, SessionRepository};

/// Retries allowed for a session whose `result` event fails `output_schema`
/// validation. One retry means two total attempts.
const MAX_OUTPUT_SCHEMA_RETRIES: u8 = 1;

pub enum AppendOutcome {
    /// The event was persisted. `session_became_terminal` is set when this
    /// event (`session_stop`, or a failing owning run) just flipped the
    /// session into a terminal state.
    Appended {
        event: Event,
        session_became_terminal: bool,
    },
    /// A `result` event's `result_data` failed `output_schema` validation
    /// and a retry is still available. Nothing was persisted.
    OutputValidationFailed { errors: Vec<ValidationError> },
    /// A `result` event failed validation for the second time; the retry
    /// budget is exhausted and the caller should fail the session.
    OutputValidationExhausted { errors: Vec<ValidationError> },
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: SessionRepository,
    events: EventRepository,
    agents: AgentRepository,
    // Shared via Arc, not deep-cloned: every clone of `SessionStore` (one
    // lives in `AppState`, one in `RunQueue`, one in `CallbackOrchestrator`)
    // must observe the same retry counters.
    output_retry_counts: Arc<DashMap<String, u8>>,
}

impl SessionStore {
    pub fn new(sessions: SessionRepository, events: EventRepository, agents: AgentRepository) -> Self {
        Self {
            sessions,
            events,
            agents,
            output_retry_counts: Arc::new(DashMap::new()),
        }
    }

    pub async fn create_session(&self, create: SessionCreate) -> Result<Session> {
        let session_id = create
            .session_id
            .unwrap_or_else(ao_protocol::ids::new_session_id);

        if let Some(name) = &create.session_name {
            if self.sessions.get_by_name(name).await?.is_some() {
                anyhow::bail!("a session named '{name}' already exists");
            }
        }
        if self.sessions.get(&session_id).await?.is_some() {
            anyhow::bail!("session '{session_id}' already exists");
        }

        let session = Session {
            session_id,
            session_name: create.session_name,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            last_resumed_at: None,
            project_dir: create.project_dir,
            agent_name: create.agent_name,
            parent_session_id: create.parent_session_id,
        };

        self.sessions.create(&session).await?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.sessions.get(session_id).await
    }

    pub async fn get_session_required(&self, session_id: &str) -> Result<Session> {
        self.get_session(session_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("session not found: {session_id}"))
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.sessions.list().await
    }

    /// Resolve the blueprint a session was started from, if it named one.
    pub async fn resolve_agent(&self, session: &Session) -> Result<Option<AgentBlueprint>> {
        match &session.agent_name {
            Some(name) => self.agents.get(name).await,
            None => Ok(None),
        }
    }

    pub async fn mark_running(&self, session_id: &str) -> Result<()> {
        self.sessions.mark_resumed(session_id, Utc::now()).await
    }

    pub async fn mark_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        self.sessions.update_status(session_id, status).await
    }

    pub async fn update_metadata(
        &self,
        session_id: &str,
        session_name: Option<&str>,
        project_dir: Option<&str>,
    ) -> Result<()> {
        self.get_session_required(session_id).await?;
        self.sessions
            .update_metadata(session_id, session_name, project_dir)
            .await
    }

    pub async fn get_result(
        &self,
        session_id: &str,
    ) -> Result<Option<(Option<String>, Option<serde_json::Value>)>> {
        let session = self.get_session_required(session_id).await?;
        if !session.status.is_terminal() {
            anyhow::bail!("session '{session_id}' has not finished yet");
        }
        self.sessions.get_result(session_id).await
    }

    pub async fn list_events(&self, session_id: &str) -> Result<Vec<Event>> {
        self.get_session_required(session_id).await?;
        self.events.list(session_id).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.get_session_required(session_id).await?;
        // ON DELETE CASCADE on sessions.parent_session_id and events.session_id
        // takes care of child sessions and the event log.
        self.sessions.delete(session_id).await
    }

    /// Append an event, driving the session state machine as described in
    /// spec §4.3. `agent` is the session's resolved blueprint, if any — used
    /// to validate `result` payloads against `output_schema`.
    pub async fn append_event(
        &self,
        session_id: &str,
        payload: EventPayload,
        agent: Option<&AgentBlueprint>,
    ) -> Result<AppendOutcome> {
        let session = self.get_session_required(session_id).await?;

        if let EventPayload::Result {
            result_text,
            result_data,
        } = &payload
        {
            if let Some(outcome) = self
                .validate_result(session_id, agent, result_text.as_deref(), result_data.as_ref())
                .await?
            {
                return Ok(outcome);
            }
        }

        let now = Utc::now();
        let event = self.events.append(session_id, &payload, now).await?;

        let mut became_terminal = false;
        match &payload {
            EventPayload::Result {
                result_text,
                result_data,
            } => {
                self.sessions
                    .set_result(session_id, result_text.as_deref(), result_data.as_ref())
                    .await?;
                self.output_retry_counts.remove(session_id);
            }
            EventPayload::SessionStop { exit_code, .. } => {
                let status = if *exit_code == 0 {
                    SessionStatus::Finished
                } else {
                    SessionStatus::Failed
                };
                self.sessions.update_status(session_id, status).await?;
                became_terminal = true;
            }
            EventPayload::SessionStart {} => {
                if session.status == SessionStatus::Pending {
                    self.sessions.mark_resumed(session_id, now).await?;
                }
            }
            _ => {}
        }

        Ok(AppendOutcome::Appended {
            event,
            session_became_terminal: became_terminal,
        })
    }

    async fn validate_result(
        &self,
        session_id: &str,
        agent: Option<&AgentBlueprint>,
        result_text: Option<&str>,
        result_data: Option<&serde_json::Value>,
    ) -> Result<Option<AppendOutcome>> {
        let Some(schema) = agent.and_then(|a| a.output_schema.as_ref()) else {
            return Ok(None);
        };
        let Some(data) = result_data else { return Ok(None) };
        let _ = result_text;

        match schema::validate(schema, data) {
            Ok(()) => Ok(None),
            Err(schema::SchemaError::Invalid(errors)) => {
                let attempts = {
                    let mut entry = self.output_retry_counts.entry(session_id.to_string()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if attempts <= MAX_OUTPUT_SCHEMA_RETRIES {
                    Ok(Some(AppendOutcome::OutputValidationFailed { errors }))
                } else {
                    self.output_retry_counts.remove(session_id);
                    Ok(Some(AppendOutcome::OutputValidationExhausted { errors }))
                }
            }
            Err(schema::SchemaError::InvalidSchema(msg)) => {
                Err(anyhow::anyhow!("output_schema is not a valid JSON schema: {msg}"))
                    .context("validating result payload")
            }
        }
    }
}
