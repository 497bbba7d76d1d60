//! Session data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Finished,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub session_name: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_resumed_at: Option<DateTime<Utc>>,
    pub project_dir: Option<String>,
    pub agent_name: Option<String>,
    pub parent_session_id: Option<String>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreate {
    pub session_id: Option<String>,
    pub session_name: Option<String>,
    pub project_dir: Option<String>,
    pub agent_name: Option<String>,
    pub parent_session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionMetadataPatch {
    pub session_name: Option<String>,
    pub project_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub result_text: Option<String>,
    pub result_data: Option<serde_json::Value>,
}
