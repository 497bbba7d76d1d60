//! Agent blueprint CRUD (spec §3 "Agent Blueprint").

use anyhow::{Context, Result};
use chrono::Utc;

use ao_protocol::agent::{
    AgentBlueprint, AgentBlueprintCreate, AgentBlueprintPatch, AgentStatus,
};

use crate::schema;

use super::repository::AgentRepository;

#[derive(Clone)]
pub struct AgentService {
    repo: AgentRepository,
}

impl AgentService {
    pub fn new(repo: AgentRepository) -> Self {
        Self { repo }
    }

    pub async fn create(&self, create: AgentBlueprintCreate) -> Result<AgentBlueprint> {
        if create.name.trim().is_empty() {
            anyhow::bail!("agent name must be non-empty");
        }
        if self.repo.get(&create.name).await?.is_some() {
            anyhow::bail!("agent '{}' already exists", create.name);
        }
        if let Some(schema) = &create.parameters_schema {
            schema::validate_schema(schema)
                .map_err(|e| anyhow::anyhow!("parameters_schema is invalid: {e}"))?;
        }
        if let Some(schema) = &create.output_schema {
            schema::validate_schema(schema).map_err(|e| anyhow::anyhow!("output_schema is invalid: {e}"))?;
        }

        let now = Utc::now();
        let blueprint = AgentBlueprint {
            name: create.name,
            description: create.description,
            agent_type: create.agent_type,
            system_prompt: create.system_prompt,
            mcp_servers: create.mcp_servers,
            skills: create.skills,
            status: AgentStatus::Active,
            demands: create.demands,
            parameters_schema: create.parameters_schema,
            output_schema: create.output_schema,
            command: create.command,
            created_at: now,
            updated_at: now,
        };

        self.repo.create(&blueprint).await?;
        Ok(blueprint)
    }

    pub async fn get(&self, name: &str) -> Result<Option<AgentBlueprint>> {
        self.repo.get(name).await
    }

    pub async fn get_required(&self, name: &str) -> Result<AgentBlueprint> {
        self.repo
            .get(name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("agent not found: {name}"))
    }

    pub async fn list(&self) -> Result<Vec<AgentBlueprint>> {
        self.repo.list().await
    }

    pub async fn patch(&self, name: &str, patch: AgentBlueprintPatch) -> Result<AgentBlueprint> {
        let mut blueprint = self.get_required(name).await?;

        if let Some(description) = patch.description {
            blueprint.description = description;
        }
        if patch.system_prompt.is_some() {
            blueprint.system_prompt = patch.system_prompt;
        }
        if let Some(mcp_servers) = patch.mcp_servers {
            blueprint.mcp_servers = mcp_servers;
        }
        if let Some(skills) = patch.skills {
            blueprint.skills = skills;
        }
        if patch.demands.is_some() {
            blueprint.demands = patch.demands;
        }
        if patch.parameters_schema.is_some() {
            blueprint.parameters_schema = patch.parameters_schema;
        }
        if patch.output_schema.is_some() {
            blueprint.output_schema = patch.output_schema;
        }
        if patch.command.is_some() {
            blueprint.command = patch.command;
        }
        blueprint.updated_at = Utc::now();

        self.repo.update(&blueprint).await?;
        Ok(blueprint)
    }

    pub async fn set_status(&self, name: &str, status: AgentStatus) -> Result<AgentBlueprint> {
        self.get_required(name).await?;
        self.repo.update_status(name, status).await?;
        self.get_required(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.get_required(name)
            .await
            .context("agent must exist to be deleted")?;
        self.repo.delete(name).await
    }
}
