//! Persistence for agent blueprints.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use ao_protocol::agent::{AgentBlueprint, AgentStatus, AgentType};
use ao_protocol::run::Demands;

fn parse_ts(s: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc))
}

fn row_to_blueprint(row: SqliteRow) -> Result<AgentBlueprint> {
    let agent_type: String = row.try_get("agent_type")?;
    let status: String = row.try_get("status")?;
    let mcp_servers: String = row.try_get("mcp_servers")?;
    let skills: String = row.try_get("skills")?;
    let demands: Option<String> = row.try_get("demands")?;
    let parameters_schema: Option<String> = row.try_get("parameters_schema")?;
    let output_schema: Option<String> = row.try_get("output_schema")?;

    Ok(AgentBlueprint {
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        agent_type: match agent_type.as_str() {
            "autonomous" => AgentType::Autonomous,
            "procedural" => AgentType::Procedural,
            other => anyhow::bail!("unknown agent_type: {other}"),
        },
        system_prompt: row.try_get("system_prompt")?,
        mcp_servers: serde_json::from_str(&mcp_servers).context("decoding mcp_servers")?,
        skills: serde_json::from_str(&skills).context("decoding skills")?,
        status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        demands: demands
            .map(|d| serde_json::from_str::<Demands>(&d))
            .transpose()
            .context("decoding agent demands")?,
        parameters_schema: parameters_schema
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("decoding parameters_schema")?,
        output_schema: output_schema
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("decoding output_schema")?,
        command: row.try_get("command")?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        updated_at: parse_ts(row.try_get("updated_at")?)?,
    })
}

#[derive(Clone)]
pub struct AgentRepository {
    pool: SqlitePool,
}

impl AgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, blueprint: &AgentBlueprint) -> Result<()> {
        let agent_type = match blueprint.agent_type {
            AgentType::Autonomous => "autonomous",
            AgentType::Procedural => "procedural",
        };
        let mcp_servers = serde_json::to_string(&blueprint.mcp_servers)?;
        let skills = serde_json::to_string(&blueprint.skills)?;
        let demands = blueprint
            .demands
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let parameters_schema = blueprint
            .parameters_schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let output_schema = blueprint
            .output_schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO agent_blueprints (
                name, description, agent_type, system_prompt, mcp_servers, skills,
                status, demands, parameters_schema, output_schema, command,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&blueprint.name)
        .bind(&blueprint.description)
        .bind(agent_type)
        .bind(&blueprint.system_prompt)
        .bind(mcp_servers)
        .bind(skills)
        .bind(blueprint.status.to_string())
        .bind(demands)
        .bind(parameters_schema)
        .bind(output_schema)
        .bind(&blueprint.command)
        .bind(blueprint.created_at.to_rfc3339())
        .bind(blueprint.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("inserting agent blueprint")?;

        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<AgentBlueprint>> {
        let row = sqlx::query("SELECT * FROM agent_blueprints WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("fetching agent blueprint")?;

        row.map(row_to_blueprint).transpose()
    }

    pub async fn list(&self) -> Result<Vec<AgentBlueprint>> {
        let rows = sqlx::query("SELECT * FROM agent_blueprints ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .context("listing agent blueprints")?;

        rows.into_iter().map(row_to_blueprint).collect()
    }

    pub async fn update(&self, blueprint: &AgentBlueprint) -> Result<()> {
        let mcp_servers = serde_json::to_string(&blueprint.mcp_servers)?;
        let skills = serde_json::to_string(&blueprint.skills)?;
        let demands = blueprint
            .demands
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let parameters_schema = blueprint
            .parameters_schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let output_schema = blueprint
            .output_schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            UPDATE agent_blueprints SET
                description = ?, system_prompt = ?, mcp_servers = ?, skills = ?,
                demands = ?, parameters_schema = ?, output_schema = ?, command = ?,
                updated_at = ?
            WHERE name = ?
            "#,
        )
        .bind(&blueprint.description)
        .bind(&blueprint.system_prompt)
        .bind(mcp_servers)
        .bind(skills)
        .bind(demands)
        .bind(parameters_schema)
        .bind(output_schema)
        .bind(&blueprint.command)
        .bind(blueprint.updated_at.to_rfc3339())
        .bind(&blueprint.name)
        .execute(&self.pool)
        .await
        .context("updating agent blueprint")?;

        Ok(())
    }

    pub async fn update_status(&self, name: &str, status: AgentStatus) -> Result<()> {
        sqlx::query("UPDATE agent_blueprints SET status = ? WHERE name = ?")
            .bind(status.to_string())
            .bind(name)
            .execute(&self.pool)
            .await
            .context("updating agent blueprint status")?;

        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM agent_blueprints WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .context("deleting agent blueprint")?;

        Ok(())
    }
}
