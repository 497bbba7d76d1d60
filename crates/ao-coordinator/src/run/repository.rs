//! Persistence for runs. Every write is a single statement; the conditional
//! update in `claim` is the only compare-and-swap in the schema.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use ao_protocol::run::{Demands, ExecutionMode, Run, RunStatus, RunType};

fn row_to_run(row: SqliteRow) -> Result<Run> {
    let run_type: String = row.try_get("run_type")?;
    let execution_mode: String = row.try_get("execution_mode")?;
    let status: String = row.try_get("status")?;
    let demands: Option<String> = row.try_get("demands")?;
    let parameters: String = row.try_get("parameters")?;

    Ok(Run {
        run_id: row.try_get("run_id")?,
        session_id: row.try_get("session_id")?,
        run_type: parse_run_type(&run_type)?,
        agent_name: row.try_get("agent_name")?,
        parameters: serde_json::from_str(&parameters).context("decoding run parameters")?,
        project_dir: row.try_get("project_dir")?,
        parent_session_id: row.try_get("parent_session_id")?,
        execution_mode: parse_execution_mode(&execution_mode)?,
        demands: demands
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .context("decoding run demands")?,
        status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        runner_id: row.try_get("runner_id")?,
        error: row.try_get("error")?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        claimed_at: parse_opt_ts(row.try_get("claimed_at")?)?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
        timeout_at: parse_opt_ts(row.try_get("timeout_at")?)?,
    })
}

fn parse_run_type(s: &str) -> Result<RunType> {
    match s {
        "start_session" => Ok(RunType::StartSession),
        "resume_session" => Ok(RunType::ResumeSession),
        other => anyhow::bail!("unknown run_type: {other}"),
    }
}

fn run_type_str(t: RunType) -> &'static str {
    match t {
        RunType::StartSession => "start_session",
        RunType::ResumeSession => "resume_session",
    }
}

fn parse_execution_mode(s: &str) -> Result<ExecutionMode> {
    match s {
        "sync" => Ok(ExecutionMode::Sync),
        "async_poll" => Ok(ExecutionMode::AsyncPoll),
        "async_callback" => Ok(ExecutionMode::AsyncCallback),
        other => anyhow::bail!("unknown execution_mode: {other}"),
    }
}

fn execution_mode_str(m: ExecutionMode) -> &'static str {
    match m {
        ExecutionMode::Sync => "sync",
        ExecutionMode::AsyncPoll => "async_poll",
        ExecutionMode::AsyncCallback => "async_callback",
    }
}

fn parse_ts(s: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}

#[derive(Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, run: &Run) -> Result<()> {
        let parameters = serde_json::to_string(&run.parameters)?;
        let demands = run
            .demands
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO runs (
                run_id, session_id, run_type, agent_name, parameters, project_dir,
                parent_session_id, execution_mode, demands, status, runner_id, error,
                created_at, claimed_at, started_at, completed_at, timeout_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.session_id)
        .bind(run_type_str(run.run_type))
        .bind(&run.agent_name)
        .bind(parameters)
        .bind(&run.project_dir)
        .bind(&run.parent_session_id)
        .bind(execution_mode_str(run.execution_mode))
        .bind(demands)
        .bind(run.status.to_string())
        .bind(&run.runner_id)
        .bind(&run.error)
        .bind(run.created_at.to_rfc3339())
        .bind(run.claimed_at.map(|t| t.to_rfc3339()))
        .bind(run.started_at.map(|t| t.to_rfc3339()))
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(run.timeout_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .context("inserting run")?;

        Ok(())
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching run")?;

        row.map(row_to_run).transpose()
    }

    pub async fn get_active_by_session(&self, session_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT * FROM runs WHERE session_id = ? AND status NOT IN ('completed','failed','stopped') \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching active run for session")?;

        row.map(row_to_run).transpose()
    }

    pub async fn list(&self, include_completed: bool, status: Option<RunStatus>) -> Result<Vec<Run>> {
        let rows = if let Some(status) = status {
            sqlx::query("SELECT * FROM runs WHERE status = ? ORDER BY created_at DESC")
                .bind(status.to_string())
                .fetch_all(&self.pool)
                .await
        } else if include_completed {
            sqlx::query("SELECT * FROM runs ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await
        } else {
            sqlx::query(
                "SELECT * FROM runs WHERE status NOT IN ('completed','failed','stopped') \
                 ORDER BY created_at DESC",
            )
            .fetch_all(&self.pool)
            .await
        }
        .context("listing runs")?;

        rows.into_iter().map(row_to_run).collect()
    }

    pub async fn list_pending_fifo(&self) -> Result<Vec<Run>> {
        let rows = sqlx::query("SELECT * FROM runs WHERE status = 'pending' ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .context("listing pending runs")?;

        rows.into_iter().map(row_to_run).collect()
    }

    pub async fn list_non_terminal(&self) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE status NOT IN ('completed','failed','stopped') \
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("listing non-terminal runs")?;

        rows.into_iter().map(row_to_run).collect()
    }

    /// Atomically claim a pending run. Returns `true` iff this call won the
    /// race (the conditional `WHERE status='pending'` affected exactly one row).
    pub async fn claim(&self, run_id: &str, runner_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'claimed', runner_id = ?, claimed_at = ? \
             WHERE run_id = ? AND status = 'pending'",
        )
        .bind(runner_id)
        .bind(now.to_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("claiming run")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_demands(
        &self,
        run_id: &str,
        demands: Option<&Demands>,
        timeout_at: DateTime<Utc>,
    ) -> Result<()> {
        let demands = demands.map(serde_json::to_string).transpose()?;

        sqlx::query("UPDATE runs SET demands = ?, timeout_at = ? WHERE run_id = ?")
            .bind(demands)
            .bind(timeout_at.to_rfc3339())
            .bind(run_id)
            .execute(&self.pool)
            .await
            .context("setting run demands")?;

        Ok(())
    }

    pub async fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
        now: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        match status {
            RunStatus::Running => {
                sqlx::query("UPDATE runs SET status = ?, started_at = ? WHERE run_id = ?")
                    .bind(status.to_string())
                    .bind(now.to_rfc3339())
                    .bind(run_id)
                    .execute(&self.pool)
                    .await
            }
            RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped => {
                sqlx::query(
                    "UPDATE runs SET status = ?, completed_at = ?, error = ? WHERE run_id = ?",
                )
                .bind(status.to_string())
                .bind(now.to_rfc3339())
                .bind(error)
                .bind(run_id)
                .execute(&self.pool)
                .await
            }
            _ => {
                sqlx::query("UPDATE runs SET status = ? WHERE run_id = ?")
                    .bind(status.to_string())
                    .bind(run_id)
                    .execute(&self.pool)
                    .await
            }
        }
        .context("updating run status")?;

        Ok(())
    }

    /// Revert a stale `claimed` run back to `pending` during startup recovery.
    pub async fn revert_to_pending(&self, run_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = 'pending', runner_id = NULL, claimed_at = NULL WHERE run_id = ?",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("reverting run to pending")?;

        Ok(())
    }

    /// Mark every `pending` run whose `timeout_at` has elapsed as failed.
    /// Returns the ids that were failed.
    pub async fn fail_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT run_id FROM runs WHERE status = 'pending' AND timeout_at IS NOT NULL AND timeout_at < ?",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .context("finding timed-out runs")?;

        let ids: Vec<String> = rows
            .into_iter()
            .map(|r| r.try_get::<String, _>("run_id"))
            .collect::<Result<_, _>>()?;

        for id in &ids {
            sqlx::query(
                "UPDATE runs SET status = 'failed', error = ?, completed_at = ? \
                 WHERE run_id = ? AND status = 'pending'",
            )
            .bind("No matching runner available within timeout")
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failing timed-out run")?;
        }

        Ok(ids)
    }
}
