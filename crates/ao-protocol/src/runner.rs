//! Runner identity, registration, and the long-poll job-delivery contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::Run;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Online,
    Stale,
    ShuttingDown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_executor_type")]
    pub executor_type: String,
}

fn default_executor_type() -> String {
    "claude".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct RunnerInfo {
    pub runner_id: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub hostname: Option<String>,
    pub project_dir: Option<String>,
    pub executor_profile: String,
    pub capabilities: Capabilities,
    pub status: RunnerStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub hostname: Option<String>,
    pub project_dir: Option<String>,
    pub executor_profile: String,
    #[serde(default)]
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub runner_id: String,
    pub poll_endpoint: String,
    pub poll_timeout_seconds: u64,
    pub heartbeat_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    pub runner_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsQuery {
    pub runner_id: String,
}

/// The body of a long-poll response. At most one of `run`/`stop_runs` (non-empty)/
/// `deregistered` is populated for any given response; absent fields are omitted
/// from the JSON rather than serialized as `null`/`[]`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct PollResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<Run>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_runs: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deregistered: bool,
}

impl PollResponse {
    pub fn claimed(run: Run) -> Self {
        Self {
            run: Some(run),
            ..Default::default()
        }
    }

    pub fn stop(stop_runs: Vec<String>) -> Self {
        Self {
            stop_runs,
            ..Default::default()
        }
    }

    pub fn deregistered() -> Self {
        Self {
            deregistered: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.run.is_none() && self.stop_runs.is_empty() && !self.deregistered
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FailedReport {
    pub error: String,
}
