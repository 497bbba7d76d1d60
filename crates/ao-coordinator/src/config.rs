//! Layered configuration: environment variables with documented defaults
//! (spec §6), assembled the way `octo`'s `CommonOpts` loads settings.

use std::time::Duration;

use serde::Deserialize;

/// Run-queue recovery policy applied to non-terminal runs found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    /// Leave every non-terminal run exactly as found.
    None,
    /// Revert stale `claimed`/`running` runs, unconditionally stop `stopping` runs.
    Stale,
    /// Treat every non-terminal run as abandoned and fail it.
    All,
}

impl std::str::FromStr for RecoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "stale" => Ok(Self::Stale),
            "all" => Ok(Self::All),
            other => Err(format!("unknown RUN_RECOVERY_MODE: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_path: String,
    pub runner_poll_timeout: Duration,
    pub runner_heartbeat_interval: Duration,
    pub runner_heartbeat_timeout: Duration,
    pub run_no_match_timeout: Duration,
    pub run_recovery_mode: RecoveryMode,
    pub cors_origins: Vec<String>,
    pub auth_disabled: bool,
    /// Static bearer tokens accepted when `auth_disabled` is false.
    pub auth_api_keys: Vec<String>,
    /// Threshold above which a `claimed`/`running` run is considered stale
    /// during startup recovery.
    pub stale_claim_threshold: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".to_string(),
            database_path: "./ao-coordinator.db".to_string(),
            runner_poll_timeout: Duration::from_secs(30),
            runner_heartbeat_interval: Duration::from_secs(60),
            runner_heartbeat_timeout: Duration::from_secs(120),
            run_no_match_timeout: Duration::from_secs(300),
            run_recovery_mode: RecoveryMode::Stale,
            cors_origins: default_cors_origins(),
            auth_disabled: false,
            auth_api_keys: Vec::new(),
            stale_claim_threshold: Duration::from_secs(300),
        }
    }
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

impl Config {
    /// Load from environment, falling back to the documented defaults for
    /// anything unset. Mirrors `octo`'s `config` crate + env-var layering.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let source = config::Config::builder()
            .set_default("bind_addr", defaults.bind_addr.clone())?
            .set_default("database_path", defaults.database_path.clone())?
            .set_default(
                "runner_poll_timeout_seconds",
                defaults.runner_poll_timeout.as_secs() as i64,
            )?
            .set_default(
                "runner_heartbeat_interval_seconds",
                defaults.runner_heartbeat_interval.as_secs() as i64,
            )?
            .set_default(
                "runner_heartbeat_timeout_seconds",
                defaults.runner_heartbeat_timeout.as_secs() as i64,
            )?
            .set_default(
                "run_no_match_timeout_seconds",
                defaults.run_no_match_timeout.as_secs() as i64,
            )?
            .set_default("run_recovery_mode", "stale")?
            .set_default("cors_origins", defaults.cors_origins.join(","))?
            .set_default("auth_disabled", false)?
            .set_default("auth_api_keys", "")?
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()?;

        let run_recovery_mode: String = source.get("run_recovery_mode")?;
        let cors_origins: String = source.get("cors_origins")?;
        let auth_api_keys: String = source.get("auth_api_keys")?;

        Ok(Self {
            bind_addr: source.get("bind_addr")?,
            database_path: source.get("database_path")?,
            runner_poll_timeout: Duration::from_secs(source.get("runner_poll_timeout_seconds")?),
            runner_heartbeat_interval: Duration::from_secs(
                source.get("runner_heartbeat_interval_seconds")?,
            ),
            runner_heartbeat_timeout: Duration::from_secs(
                source.get("runner_heartbeat_timeout_seconds")?,
            ),
            run_no_match_timeout: Duration::from_secs(source.get("run_no_match_timeout_seconds")?),
            run_recovery_mode: run_recovery_mode.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            cors_origins: cors_origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            auth_disabled: source.get("auth_disabled")?,
            auth_api_keys: auth_api_keys
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            stale_claim_threshold: defaults.stale_claim_threshold,
        })
    }
}
