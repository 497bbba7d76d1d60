//! Persistence for sessions and their append-only event log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use ao_protocol::event::{Event, EventPayload};
use ao_protocol::session::{Session, SessionStatus};

fn parse_ts(s: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}

fn row_to_session(row: SqliteRow) -> Result<Session> {
    let status: String = row.try_get("status")?;
    Ok(Session {
        session_id: row.try_get("session_id")?,
        session_name: row.try_get("session_name")?,
        status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        last_resumed_at: parse_opt_ts(row.try_get("last_resumed_at")?)?,
        project_dir: row.try_get("project_dir")?,
        agent_name: row.try_get("agent_name")?,
        parent_session_id: row.try_get("parent_session_id")?,
    })
}

fn row_to_event(row: SqliteRow) -> Result<Event> {
    let payload: String = row.try_get("payload")?;
    let payload: EventPayload = serde_json::from_str(&payload).context("decoding event payload")?;

    Ok(Event {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        timestamp: parse_ts(row.try_get("timestamp")?)?,
        payload,
    })
}

#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, session_name, status, created_at, last_resumed_at,
                project_dir, agent_name, parent_session_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.session_name)
        .bind(session.status.to_string())
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_resumed_at.map(|t| t.to_rfc3339()))
        .bind(&session.project_dir)
        .bind(&session.agent_name)
        .bind(&session.parent_session_id)
        .execute(&self.pool)
        .await
        .context("inserting session")?;

        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session")?;

        row.map(row_to_session).transpose()
    }

    pub async fn get_by_name(&self, session_name: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_name = ?")
            .bind(session_name)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session by name")?;

        row.map(row_to_session).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .context("listing sessions")?;

        rows.into_iter().map(row_to_session).collect()
    }

    pub async fn list_children(&self, parent_session_id: &str) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions WHERE parent_session_id = ?")
            .bind(parent_session_id)
            .fetch_all(&self.pool)
            .await
            .context("listing child sessions")?;

        rows.into_iter().map(row_to_session).collect()
    }

    pub async fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        sqlx::query("UPDATE sessions SET status = ? WHERE session_id = ?")
            .bind(status.to_string())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("updating session status")?;

        Ok(())
    }

    pub async fn mark_resumed(&self, session_id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET status = 'running', last_resumed_at = ? WHERE session_id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("marking session resumed")?;

        Ok(())
    }

    pub async fn update_metadata(
        &self,
        session_id: &str,
        session_name: Option<&str>,
        project_dir: Option<&str>,
    ) -> Result<()> {
        if let Some(name) = session_name {
            sqlx::query("UPDATE sessions SET session_name = ? WHERE session_id = ?")
                .bind(name)
                .bind(session_id)
                .execute(&self.pool)
                .await
                .context("updating session name")?;
        }
        if let Some(dir) = project_dir {
            sqlx::query("UPDATE sessions SET project_dir = ? WHERE session_id = ?")
                .bind(dir)
                .bind(session_id)
                .execute(&self.pool)
                .await
                .context("updating session project_dir")?;
        }
        Ok(())
    }

    pub async fn set_result(
        &self,
        session_id: &str,
        result_text: Option<&str>,
        result_data: Option<&serde_json::Value>,
    ) -> Result<()> {
        let result_data = result_data.map(serde_json::to_string).transpose()?;

        sqlx::query("UPDATE sessions SET result_text = ?, result_data = ? WHERE session_id = ?")
            .bind(result_text)
            .bind(result_data)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("setting session result")?;

        Ok(())
    }

    pub async fn get_result(
        &self,
        session_id: &str,
    ) -> Result<Option<(Option<String>, Option<serde_json::Value>)>> {
        let row = sqlx::query("SELECT result_text, result_data FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session result")?;

        let Some(row) = row else { return Ok(None) };
        let result_text: Option<String> = row.try_get("result_text")?;
        let result_data: Option<String> = row.try_get("result_data")?;
        let result_data = result_data
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .context("decoding session result_data")?;

        Ok(Some((result_text, result_data)))
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("deleting session")?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        session_id: &str,
        payload: &EventPayload,
        timestamp: DateTime<Utc>,
    ) -> Result<Event> {
        let payload_json = serde_json::to_string(payload)?;

        let result = sqlx::query(
            "INSERT INTO events (session_id, event_type, timestamp, payload) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(payload.type_name())
        .bind(timestamp.to_rfc3339())
        .bind(payload_json)
        .execute(&self.pool)
        .await
        .context("appending event")?;

        Ok(Event {
            id: result.last_insert_rowid(),
            session_id: session_id.to_string(),
            timestamp,
            payload: payload.clone(),
        })
    }

    pub async fn list(&self, session_id: &str) -> Result<Vec<Event>> {
        let rows = sqlx::query("SELECT * FROM events WHERE session_id = ? ORDER BY id ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .context("listing events")?;

        rows.into_iter().map(row_to_event).collect()
    }
}
