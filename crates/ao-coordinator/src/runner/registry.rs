//! In-memory runner registry (spec §4.2). Runner identity is deterministic
//! and not persisted: a restarted coordinator simply waits for runners to
//! re-register, which they do under the same `runner_id`.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;

use ao_protocol::runner::{Capabilities, RegisterRequest, RunnerInfo, RunnerStatus};

#[derive(Default)]
pub struct RunnerRegistry {
    runners: DashMap<String, RunnerInfo>,
    /// Stop requests queued for a runner, drained the next time it long-polls.
    pending_stops: DashMap<String, Vec<String>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, req: RegisterRequest) -> RunnerInfo {
        let hostname = req.hostname.unwrap_or_default();
        let project_dir = req.project_dir.clone().unwrap_or_default();
        let runner_id =
            ao_protocol::ids::compute_runner_id(&hostname, &project_dir, &req.executor_profile);

        let now = Utc::now();
        let info = self
            .runners
            .entry(runner_id.clone())
            .and_modify(|info| {
                info.last_heartbeat = now;
                info.status = RunnerStatus::Online;
                info.capabilities = req.capabilities.clone();
            })
            .or_insert_with(|| RunnerInfo {
                runner_id: runner_id.clone(),
                registered_at: now,
                last_heartbeat: now,
                hostname: if hostname.is_empty() { None } else { Some(hostname) },
                project_dir: req.project_dir.clone(),
                executor_profile: req.executor_profile.clone(),
                capabilities: req.capabilities,
                status: RunnerStatus::Online,
            })
            .clone();

        info
    }

    pub fn heartbeat(&self, runner_id: &str) -> bool {
        if let Some(mut info) = self.runners.get_mut(runner_id) {
            info.last_heartbeat = Utc::now();
            info.status = RunnerStatus::Online;
            true
        } else {
            false
        }
    }

    /// Self-deregistration: the runner is shutting down cleanly.
    pub fn deregister(&self, runner_id: &str) {
        self.runners.remove(runner_id);
        self.pending_stops.remove(runner_id);
    }

    /// Mark a runner for deregistration by a third party (e.g. an admin
    /// request). The runner picks this up as `deregistered: true` on its
    /// next long-poll and removes itself.
    pub fn mark_shutting_down(&self, runner_id: &str) {
        if let Some(mut info) = self.runners.get_mut(runner_id) {
            info.status = RunnerStatus::ShuttingDown;
        }
    }

    pub fn is_shutting_down(&self, runner_id: &str) -> bool {
        self.runners
            .get(runner_id)
            .map(|r| r.status == RunnerStatus::ShuttingDown)
            .unwrap_or(false)
    }

    pub fn get(&self, runner_id: &str) -> Option<RunnerInfo> {
        self.runners.get(runner_id).map(|r| r.clone())
    }

    pub fn capabilities(&self, runner_id: &str) -> Option<Capabilities> {
        self.runners.get(runner_id).map(|r| r.capabilities.clone())
    }

    pub fn list(&self) -> Vec<RunnerInfo> {
        self.runners.iter().map(|r| r.clone()).collect()
    }

    pub fn queue_stop(&self, runner_id: &str, run_id: String) {
        self.pending_stops.entry(runner_id.to_string()).or_default().push(run_id);
    }

    pub fn drain_stops(&self, runner_id: &str) -> Vec<String> {
        self.pending_stops
            .get_mut(runner_id)
            .map(|mut v| std::mem::take(v.value_mut()))
            .unwrap_or_default()
    }

    /// Mark runners that have not heartbeat within `threshold` as stale.
    /// Returns the `runner_id`s of runs that should be considered abandoned
    /// (their owning runner is stale), for the caller to fail.
    pub fn sweep_stale(&self, threshold: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut went_stale = Vec::new();

        for mut entry in self.runners.iter_mut() {
            if entry.status == RunnerStatus::Online {
                let elapsed = now
                    .signed_duration_since(entry.last_heartbeat)
                    .to_std()
                    .unwrap_or_default();
                if elapsed > threshold {
                    entry.status = RunnerStatus::Stale;
                    went_stale.push(entry.runner_id.clone());
                }
            }
        }

        went_stale
    }
}
