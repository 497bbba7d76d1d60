//! The agent blueprint: a template describing how to run a class of agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::run::Demands;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Autonomous,
    Procedural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentBlueprint {
    pub name: String,
    pub description: String,
    pub agent_type: AgentType,
    pub system_prompt: Option<String>,
    pub mcp_servers: Vec<String>,
    pub skills: Vec<String>,
    pub status: AgentStatus,
    pub demands: Option<Demands>,
    pub parameters_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
    pub command: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentBlueprint {
    /// The implicit schema for an autonomous agent that declares no explicit one:
    /// a single required `prompt` string.
    pub fn implicit_parameters_schema() -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["prompt"],
            "properties": {
                "prompt": { "type": "string", "minLength": 1 }
            },
            "additionalProperties": false
        })
    }

    /// The schema that governs this blueprint's run parameters: the explicit
    /// one if set; otherwise the implicit autonomous default for
    /// `AgentType::Autonomous`, or an unconstrained `{}` for `Procedural`
    /// agents, which have no notion of a free-form prompt.
    pub fn effective_parameters_schema(&self) -> serde_json::Value {
        match &self.parameters_schema {
            Some(schema) => schema.clone(),
            None if self.agent_type == AgentType::Autonomous => Self::implicit_parameters_schema(),
            None => json!({}),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentBlueprintCreate {
    pub name: String,
    pub description: String,
    pub agent_type: AgentType,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub demands: Option<Demands>,
    pub parameters_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentBlueprintPatch {
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub mcp_servers: Option<Vec<String>>,
    pub skills: Option<Vec<String>>,
    pub demands: Option<Demands>,
    pub parameters_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentStatusPatch {
    pub status: AgentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_schema_requires_prompt() {
        let schema = AgentBlueprint::implicit_parameters_schema();
        assert_eq!(schema["required"][0], "prompt");
    }

    fn blueprint(agent_type: AgentType, parameters_schema: Option<serde_json::Value>) -> AgentBlueprint {
        let now = Utc::now();
        AgentBlueprint {
            name: "test".to_string(),
            description: String::new(),
            agent_type,
            system_prompt: None,
            mcp_servers: Vec::new(),
            skills: Vec::new(),
            status: AgentStatus::Active,
            demands: None,
            parameters_schema,
            output_schema: None,
            command: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn autonomous_agent_without_explicit_schema_gets_implicit_default() {
        let agent = blueprint(AgentType::Autonomous, None);
        assert_eq!(agent.effective_parameters_schema(), AgentBlueprint::implicit_parameters_schema());
    }

    #[test]
    fn procedural_agent_without_explicit_schema_gets_unconstrained_default() {
        let agent = blueprint(AgentType::Procedural, None);
        assert_eq!(agent.effective_parameters_schema(), json!({}));
    }

    #[test]
    fn explicit_schema_wins_regardless_of_agent_type() {
        let explicit = json!({"type": "object", "required": ["x"]});
        let agent = blueprint(AgentType::Procedural, Some(explicit.clone()));
        assert_eq!(agent.effective_parameters_schema(), explicit);
    }
}
