//! Identifier allocation and the deterministic runner identity scheme.

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub fn new_session_id() -> String {
    format!("ses_{}", Uuid::new_v4().simple())
}

pub fn new_run_id() -> String {
    format!("run_{}", Uuid::new_v4().simple())
}

pub fn new_agent_id() -> String {
    format!("agt_{}", Uuid::new_v4().simple())
}

/// `runner_id = "lnch_" + first 12 hex chars of SHA-256(hostname || project_dir || executor_profile)`.
///
/// Stable across restarts of the same runner so reconnection is recognized
/// rather than treated as a new worker.
pub fn compute_runner_id(hostname: &str, project_dir: &str, executor_profile: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(project_dir.as_bytes());
    hasher.update(executor_profile.as_bytes());
    let digest = hasher.finalize();
    format!("lnch_{}", &hex::encode(digest)[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_id_is_deterministic() {
        let a = compute_runner_id("host-1", "/work/proj", "claude-default");
        let b = compute_runner_id("host-1", "/work/proj", "claude-default");
        assert_eq!(a, b);
        assert!(a.starts_with("lnch_"));
        assert_eq!(a.len(), "lnch_".len() + 12);
    }

    #[test]
    fn runner_id_differs_on_inputs() {
        let a = compute_runner_id("host-1", "/work/proj", "claude-default");
        let b = compute_runner_id("host-2", "/work/proj", "claude-default");
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_prefixed() {
        assert!(new_session_id().starts_with("ses_"));
        assert!(new_run_id().starts_with("run_"));
        assert!(new_agent_id().starts_with("agt_"));
    }
}
