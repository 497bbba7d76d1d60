//! The run: the only durable scheduling entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::Capabilities;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    StartSession,
    ResumeSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    AsyncPoll,
    AsyncCallback,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Sync
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Claimed,
    Running,
    Stopping,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A capability predicate a blueprint or run requires of a runner. The only
/// predicate currently defined is a required-tags set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Demands {
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Demands {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn satisfied_by(&self, capabilities: &Capabilities) -> bool {
        self.tags.iter().all(|tag| capabilities.tags.contains(tag))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub run_id: String,
    pub session_id: String,
    pub run_type: RunType,
    pub agent_name: Option<String>,
    pub parameters: serde_json::Value,
    pub project_dir: Option<String>,
    pub parent_session_id: Option<String>,
    pub execution_mode: ExecutionMode,
    pub demands: Option<Demands>,
    pub status: RunStatus,
    pub runner_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunCreate {
    pub run_type: RunType,
    pub session_id: Option<String>,
    pub session_name: Option<String>,
    pub agent_name: Option<String>,
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
    pub project_dir: Option<String>,
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
}

fn default_parameters() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Serialize)]
pub struct RunCreated {
    pub run_id: String,
    pub session_id: String,
    pub status: RunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demands_empty_matches_any_runner() {
        let demands = Demands::default();
        let caps = Capabilities {
            tags: vec![],
            executor_type: "claude".to_string(),
        };
        assert!(demands.satisfied_by(&caps));
    }

    #[test]
    fn demands_require_subset_of_tags() {
        let demands = Demands {
            tags: vec!["gpu".to_string()],
        };
        let no_gpu = Capabilities {
            tags: vec!["cpu".to_string()],
            executor_type: "claude".to_string(),
        };
        let with_gpu = Capabilities {
            tags: vec!["gpu".to_string(), "cpu".to_string()],
            executor_type: "claude".to_string(),
        };
        assert!(!demands.satisfied_by(&no_gpu));
        assert!(demands.satisfied_by(&with_gpu));
    }
}
