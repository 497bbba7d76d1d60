//! The Callback Orchestrator (spec §4.4): parent/child session linkage and
//! guaranteed delivery of child-completion notifications to a parent,
//! whether it is idle or busy.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;

use ao_protocol::run::{ExecutionMode, RunCreate, RunType};
use ao_protocol::session::SessionStatus;

use crate::run::RunQueue;
use crate::session::SessionStore;

/// A single child-completion frame, queued for a busy parent.
#[derive(Debug, Clone)]
struct CallbackFrame {
    child_session_id: String,
    status: &'static str,
    result_text: Option<String>,
    result_data: Option<Value>,
    error: Option<String>,
}

impl CallbackFrame {
    fn render(&self) -> String {
        let body_heading = if self.status == "completed" {
            "## Child Result"
        } else {
            "## Error"
        };
        let body = self
            .error
            .clone()
            .or_else(|| self.result_text.clone())
            .unwrap_or_default();

        let data_section = match &self.result_data {
            Some(data) => format!(
                "\n\n## Structured Data\n```json\n{}\n```",
                serde_json::to_string_pretty(data).unwrap_or_default()
            ),
            None => String::new(),
        };

        format!(
            "<agent-callback session=\"{}\" status=\"{}\">\n{}\n{}{}\n</agent-callback>",
            self.child_session_id, self.status, body_heading, body, data_section
        )
    }
}

fn render_frames(frames: &[CallbackFrame]) -> String {
    let joined = frames
        .iter()
        .map(CallbackFrame::render)
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{joined}\n\nPlease continue with the orchestration based on this result.")
}

pub struct CallbackOrchestrator {
    queue: RunQueue,
    sessions: SessionStore,
    pending: DashMap<String, Vec<CallbackFrame>>,
    /// Child session ids already delivered. A child can reach "terminal"
    /// through two independent paths (a `session_stop` event, or its owning
    /// run entering `failed`/`stopped`); this guard makes calling from both
    /// safe.
    delivered: Mutex<HashSet<String>>,
}

impl CallbackOrchestrator {
    pub fn new(queue: RunQueue, sessions: SessionStore) -> Self {
        Self {
            queue,
            sessions,
            pending: DashMap::new(),
            delivered: Mutex::new(HashSet::new()),
        }
    }

    /// `detail` carries the best available human-readable explanation for a
    /// non-successful terminal status (a run's `error`, or a `session_stop`
    /// event's `reason`); ignored for `completed`.
    pub async fn on_child_terminal(&self, child_session_id: &str, detail: Option<String>) -> Result<()> {
        {
            let mut delivered = self.delivered.lock().unwrap();
            if !delivered.insert(child_session_id.to_string()) {
                return Ok(());
            }
        }

        let child = self.sessions.get_session_required(child_session_id).await?;
        let Some(parent_id) = child.parent_session_id.clone() else {
            return Ok(());
        };

        let status = match child.status {
            SessionStatus::Finished => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Pending | SessionStatus::Running => {
                // Called before the session actually reached a terminal
                // status; nothing to deliver yet.
                let mut delivered = self.delivered.lock().unwrap();
                delivered.remove(child_session_id);
                return Ok(());
            }
        };

        let (result_text, result_data) = if status == "completed" {
            self.sessions
                .get_result(child_session_id)
                .await?
                .unwrap_or((None, None))
        } else {
            (None, None)
        };

        let frame = CallbackFrame {
            child_session_id: child_session_id.to_string(),
            status,
            result_text,
            result_data,
            error: detail,
        };

        if self.parent_is_busy(&parent_id).await? {
            self.pending.entry(parent_id).or_default().push(frame);
        } else {
            self.deliver(&parent_id, vec![frame]).await?;
        }

        Ok(())
    }

    async fn parent_is_busy(&self, parent_session_id: &str) -> Result<bool> {
        Ok(self
            .queue
            .get_run_by_session_id(parent_session_id)
            .await?
            .is_some())
    }

    async fn deliver(&self, parent_session_id: &str, frames: Vec<CallbackFrame>) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        let prompt = render_frames(&frames);
        self.queue
            .add_run(RunCreate {
                run_type: RunType::ResumeSession,
                session_id: Some(parent_session_id.to_string()),
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

    /// Called whenever a session reaches a terminal status: flush any
    /// notifications queued while it was busy. If the session is itself
    /// terminal there is nothing left to resume into, so a flush that
    /// arrives too late is a discard, per spec.
    pub async fn flush(&self, session_id: &str) -> Result<()> {
        let Some((_, frames)) = self.pending.remove(session_id) else {
            return Ok(());
        };

        let session = self.sessions.get_session_required(session_id).await?;
        if session.status.is_terminal() {
            return Ok(());
        }

        self.deliver(session_id, frames).await
    }
}
