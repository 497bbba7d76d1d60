//! The Run Queue and Dispatch Engine (spec §4.1).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{info, warn};

use ao_protocol::run::{Demands, Run, RunCreate, RunCreated, RunStatus, RunType};
use ao_protocol::runner::Capabilities;
use ao_protocol::session::{SessionCreate, SessionStatus};

use crate::config::RecoveryMode;
use crate::session::SessionStore;
use crate::ws::WsHub;

use super::repository::RunRepository;

#[derive(Clone)]
pub struct RunQueue {
    repo: RunRepository,
    sessions: SessionStore,
    hub: Arc<WsHub>,
    /// Signalled whenever a run becomes claimable, so long-polling runners
    /// wake up instead of busy-polling the database.
    pub claim_notify: Arc<Notify>,
    /// Write-through cache of every non-terminal run: the hot path for claim
    /// decisions and polling (spec §3 "Ownership & persistence", §4.1, §9).
    /// Every write persists first, then updates this cache, then broadcasts.
    /// Terminal runs are evicted; they remain queryable through `repo`.
    cache: Arc<Mutex<HashMap<String, Run>>>,
}

impl RunQueue {
    pub fn new(repo: RunRepository, sessions: SessionStore, hub: Arc<WsHub>) -> Self {
        Self {
            repo,
            sessions,
            hub,
            claim_notify: Arc::new(Notify::new()),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn cache_put(&self, run: Run) {
        self.cache.lock().unwrap().insert(run.run_id.clone(), run);
    }

    fn cache_evict(&self, run_id: &str) {
        self.cache.lock().unwrap().remove(run_id);
    }

    pub async fn add_run(&self, create: RunCreate) -> Result<RunCreated> {
        let (session, session_is_new) = self.resolve_session(&create).await?;

        let run = Run {
            run_id: ao_protocol::ids::new_run_id(),
            session_id: session.session_id.clone(),
            run_type: create.run_type,
            agent_name: create.agent_name.or_else(|| session.agent_name.clone()),
            parameters: create.parameters,
            project_dir: create.project_dir.or_else(|| session.project_dir.clone()),
            parent_session_id: create.parent_session_id.or(session.parent_session_id.clone()),
            execution_mode: create.execution_mode,
            demands: None,
            status: RunStatus::Pending,
            runner_id: None,
            error: None,
            created_at: Utc::now(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
            timeout_at: None,
        };

        self.repo.insert(&run).await?;
        self.cache_put(run.clone());

        if session_is_new {
            self.hub.session_created(session);
        } else {
            self.hub
                .session_updated(self.sessions.get_session_required(&run.session_id).await?);
        }
        self.claim_notify.notify_waiters();

        Ok(RunCreated {
            run_id: run.run_id,
            session_id: run.session_id,
            status: run.status,
        })
    }

    async fn resolve_session(
        &self,
        create: &RunCreate,
    ) -> Result<(ao_protocol::session::Session, bool)> {
        match create.run_type {
            RunType::StartSession => {
                let session = self
                    .sessions
                    .create_session(SessionCreate {
                        session_id: create.session_id.clone(),
                        session_name: create.session_name.clone(),
                        project_dir: create.project_dir.clone(),
                        agent_name: create.agent_name.clone(),
                        parent_session_id: create.parent_session_id.clone(),
                    })
                    .await?;
                Ok((session, true))
            }
            RunType::ResumeSession => {
                let session_id = create
                    .session_id
                    .as_ref()
                    .context("resume_session requires session_id")?;
                let session = self.sessions.get_session_required(session_id).await?;
                Ok((session, false))
            }
        }
    }

    pub async fn set_run_demands(
        &self,
        run_id: &str,
        demands: Option<Demands>,
        timeout_seconds: i64,
    ) -> Result<()> {
        let timeout_at = Utc::now() + chrono::Duration::seconds(timeout_seconds);
        self.repo.set_demands(run_id, demands.as_ref(), timeout_at).await?;

        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(cached) = cache.get_mut(run_id) {
                cached.demands = demands;
                cached.timeout_at = Some(timeout_at);
            }
        }

        self.claim_notify.notify_waiters();
        Ok(())
    }

    /// Scan the cache FIFO and attempt to claim the first pending run whose
    /// demands this runner's capabilities satisfy. The cache serves the scan;
    /// the repository's conditional update is still the single source of
    /// claim truth, so at most one concurrent caller wins any given run.
    pub async fn claim_run(&self, runner_id: &str, capabilities: &Capabilities) -> Result<Option<Run>> {
        let mut candidates: Vec<Run> = {
            let cache = self.cache.lock().unwrap();
            cache
                .values()
                .filter(|r| r.status == RunStatus::Pending)
                .cloned()
                .collect()
        };
        candidates.sort_by_key(|r| r.created_at);

        for mut candidate in candidates {
            let matches = candidate
                .demands
                .as_ref()
                .map(|d| d.satisfied_by(capabilities))
                .unwrap_or(true);
            if !matches {
                continue;
            }

            let now = Utc::now();
            if self.repo.claim(&candidate.run_id, runner_id, now).await? {
                candidate.status = RunStatus::Claimed;
                candidate.runner_id = Some(runner_id.to_string());
                candidate.claimed_at = Some(now);
                self.cache_put(candidate.clone());
                info!(run_id = %candidate.run_id, runner_id, "run claimed");
                return Ok(Some(candidate));
            }

            // Lost the race to another poller; the cache entry is stale
            // (still `pending`) until the winner's update lands, so refresh
            // it from persistence and move on to the next candidate.
            if let Some(fresh) = self.repo.get(&candidate.run_id).await? {
                if fresh.status.is_terminal() {
                    self.cache_evict(&fresh.run_id);
                } else {
                    self.cache_put(fresh);
                }
            }
        }

        Ok(None)
    }

    /// Update a run's status, propagating the corresponding transition onto
    /// its session. Returns the run's session id and whether the session
    /// just became terminal, for the caller to drive the callback orchestrator.
    pub async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(String, bool)> {
        let run = self
            .repo
            .get(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run not found: {run_id}"))?;

        let now = Utc::now();
        self.repo
            .update_status(run_id, status, now, error.as_deref())
            .await?;

        let mut cached = run.clone();
        cached.status = status;
        match status {
            RunStatus::Running => cached.started_at = Some(now),
            RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped => {
                cached.completed_at = Some(now);
                cached.error = error.clone();
            }
            _ => {}
        }
        if status.is_terminal() {
            self.cache_evict(run_id);
        } else {
            self.cache_put(cached);
        }

        // A session only becomes `finished` via its own `session_stop` event
        // (§4.3); a run reaching `completed` is not by itself a session
        // transition. `failed`/`stopped` runs do drive the session terminal,
        // since there is no further event to wait for.
        let mut became_terminal = false;
        match status {
            RunStatus::Running => {
                self.sessions.mark_running(&run.session_id).await?;
            }
            RunStatus::Failed => {
                self.sessions
                    .mark_status(&run.session_id, SessionStatus::Failed)
                    .await?;
                became_terminal = true;
            }
            RunStatus::Stopped => {
                self.sessions
                    .mark_status(&run.session_id, SessionStatus::Stopped)
                    .await?;
                became_terminal = true;
            }
            RunStatus::Completed | RunStatus::Stopping | RunStatus::Claimed | RunStatus::Pending => {}
        }

        self.hub
            .session_updated(self.sessions.get_session_required(&run.session_id).await?);

        Ok((run.session_id, became_terminal))
    }

    /// Cache-first; falls back to persistence for terminal runs, which are
    /// evicted from the cache as soon as they complete.
    pub async fn get_run_with_fallback(&self, run_id: &str) -> Result<Option<Run>> {
        if let Some(run) = self.cache.lock().unwrap().get(run_id).cloned() {
            return Ok(Some(run));
        }
        self.repo.get(run_id).await
    }

    pub async fn get_run_by_session_id(&self, session_id: &str) -> Result<Option<Run>> {
        let cached = {
            let cache = self.cache.lock().unwrap();
            cache.values().find(|r| r.session_id == session_id).cloned()
        };
        if cached.is_some() {
            return Ok(cached);
        }
        self.repo.get_active_by_session(session_id).await
    }

    pub async fn list(&self, include_completed: bool, status: Option<RunStatus>) -> Result<Vec<Run>> {
        self.repo.list(include_completed, status).await
    }

    /// Request that a run stop. Returns the run's `runner_id` so the caller
    /// can wake that runner's long-poll with a stop command.
    pub async fn request_stop(&self, run_id: &str) -> Result<Option<String>> {
        let run = self
            .repo
            .get(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run not found: {run_id}"))?;

        if run.status.is_terminal() {
            anyhow::bail!("run '{run_id}' cannot be stopped, it is already {}", run.status);
        }

        self.repo
            .update_status(run_id, RunStatus::Stopping, Utc::now(), None)
            .await?;

        let mut cached = run.clone();
        cached.status = RunStatus::Stopping;
        self.cache_put(cached);

        self.claim_notify.notify_waiters();

        Ok(run.runner_id)
    }

    /// Fail every `pending` run whose timeout has elapsed. Called by a
    /// background ticker.
    pub async fn sweep_timeouts(&self) -> Result<Vec<String>> {
        let failed = self.repo.fail_timed_out(Utc::now()).await?;
        for run_id in &failed {
            self.cache_evict(run_id);
            if let Some(run) = self.repo.get(run_id).await? {
                self.sessions
                    .mark_status(&run.session_id, SessionStatus::Failed)
                    .await?;
                self.hub
                    .session_updated(self.sessions.get_session_required(&run.session_id).await?);
                warn!(run_id, "run timed out waiting for a matching runner");
            }
        }
        Ok(failed)
    }

    /// Startup recovery: resolve every non-terminal run left over from a
    /// previous process according to the configured policy, then load
    /// whatever remains non-terminal into the active cache.
    pub async fn recover(&self, mode: RecoveryMode, stale_threshold: Duration) -> Result<()> {
        let runs = self.repo.list_non_terminal().await?;

        if mode == RecoveryMode::None {
            for run in runs {
                self.cache_put(run);
            }
            return Ok(());
        }

        let now = Utc::now();

        for mut run in runs {
            let mut became_terminal = false;
            match run.status {
                RunStatus::Stopping => {
                    self.repo
                        .update_status(&run.run_id, RunStatus::Stopped, now, None)
                        .await?;
                    self.sessions
                        .mark_status(&run.session_id, SessionStatus::Stopped)
                        .await?;
                    run.status = RunStatus::Stopped;
                    became_terminal = true;
                    info!(run_id = %run.run_id, "recovered stopping run as stopped");
                }
                RunStatus::Claimed if mode == RecoveryMode::All => {
                    self.repo.revert_to_pending(&run.run_id).await?;
                    run.status = RunStatus::Pending;
                    run.runner_id = None;
                    run.claimed_at = None;
                    info!(run_id = %run.run_id, "recovered claimed run as pending");
                }
                RunStatus::Claimed => {
                    let stale = run
                        .claimed_at
                        .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default() > stale_threshold)
                        .unwrap_or(true);
                    if stale {
                        self.repo.revert_to_pending(&run.run_id).await?;
                        run.status = RunStatus::Pending;
                        run.runner_id = None;
                        run.claimed_at = None;
                        info!(run_id = %run.run_id, "recovered stale claimed run as pending");
                    }
                }
                RunStatus::Running if mode == RecoveryMode::All => {
                    self.repo
                        .update_status(
                            &run.run_id,
                            RunStatus::Failed,
                            now,
                            Some("Coordinator restarted during execution"),
                        )
                        .await?;
                    self.sessions
                        .mark_status(&run.session_id, SessionStatus::Failed)
                        .await?;
                    run.status = RunStatus::Failed;
                    became_terminal = true;
                    info!(run_id = %run.run_id, "recovered running run as failed");
                }
                RunStatus::Running => {
                    let stale = run
                        .started_at
                        .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default() > stale_threshold)
                        .unwrap_or(true);
                    if stale {
                        self.repo
                            .update_status(
                                &run.run_id,
                                RunStatus::Failed,
                                now,
                                Some("Coordinator restarted during execution"),
                            )
                            .await?;
                        self.sessions
                            .mark_status(&run.session_id, SessionStatus::Failed)
                            .await?;
                        run.status = RunStatus::Failed;
                        became_terminal = true;
                        info!(run_id = %run.run_id, "recovered stale running run as failed");
                    }
                }
                RunStatus::Pending | RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped => {}
            }

            if !became_terminal {
                self.cache_put(run);
            }
        }

        Ok(())
    }
}
