//! Long-poll job delivery (spec §4.2): a runner blocks on `/runners/jobs`
//! until a matching run is claimable, a stop is queued for it, or the
//! configured timeout elapses with nothing to deliver.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use ao_protocol::runner::PollResponse;

use crate::run::RunQueue;

use super::registry::RunnerRegistry;

pub async fn poll_for_job(
    queue: &RunQueue,
    registry: &RunnerRegistry,
    runner_id: &str,
    timeout: Duration,
) -> Result<PollResponse> {
    let capabilities = registry
        .capabilities(runner_id)
        .context("runner is not registered")?;

    let deadline = Instant::now() + timeout;

    loop {
        if registry.is_shutting_down(runner_id) {
            registry.deregister(runner_id);
            return Ok(PollResponse::deregistered());
        }

        let stops = registry.drain_stops(runner_id);
        if !stops.is_empty() {
            return Ok(PollResponse::stop(stops));
        }

        if let Some(run) = queue.claim_run(runner_id, &capabilities).await? {
            return Ok(PollResponse::claimed(run));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(PollResponse::default());
        }

        // Wake on the next claimable run, or on the timeout, whichever first.
        // A stale notify_waiters() firing from an unrelated run doesn't
        // matter: the loop simply re-checks and goes back to waiting.
        let _ = tokio::time::timeout(remaining, queue.claim_notify.notified()).await;
    }
}
