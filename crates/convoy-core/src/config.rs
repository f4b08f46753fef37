//! Orchestration configuration: hooks root, safety limits, version control.
//!
//! Loaded from an optional `convoy.toml`. The hooks root can be overridden
//! by the `HOOKS_PATH` environment variable.

use crate::approval::DEFAULT_APPROVAL_TTL_HOURS;
use crate::budget::DEFAULT_COST_RETENTION_HOURS;
use crate::iteration::DEFAULT_MAX_ITERATIONS;
use crate::rollback::DEFAULT_ROLLBACK_LOG_CAP;
use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the hooks root.
pub const HOOKS_PATH_ENV: &str = "HOOKS_PATH";

pub const DEFAULT_HOOKS_PATH: &str = "./hooks";

/// Agent role reserved for the orchestrator; never assignable to a task.
pub const DEFAULT_ORCHESTRATOR_ROLE: &str = "mayor";

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default = "default_hooks_path")]
    pub hooks_path: PathBuf,
    #[serde(default)]
    pub limits: SafetyLimits,
    #[serde(default)]
    pub vcs: VcsConfig,
}

fn default_hooks_path() -> PathBuf {
    PathBuf::from(DEFAULT_HOOKS_PATH)
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            hooks_path: default_hooks_path(),
            limits: SafetyLimits::default(),
            vcs: VcsConfig::default(),
        }
    }
}

impl OrchestrationConfig {
    /// Load from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .context(format!("failed to read config: {}", path.display()))?;
        let config = Self::from_toml(&contents)
            .context(format!("failed to parse config: {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            hooks = %config.hooks_path.display(),
            "loaded config"
        );
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `HOOKS_PATH` from the process environment, if set.
    pub fn with_env_overrides(self) -> Self {
        let hooks = std::env::var(HOOKS_PATH_ENV).ok();
        self.with_hooks_override(hooks.as_deref())
    }

    pub fn with_hooks_override(mut self, hooks: Option<&str>) -> Self {
        if let Some(hooks) = hooks.map(str::trim).filter(|h| !h.is_empty()) {
            self.hooks_path = PathBuf::from(hooks);
        }
        self
    }
}

/// Ceilings enforced (advisorily) by the safety engine.
#[derive(Debug, Clone, Deserialize)]
pub struct SafetyLimits {
    #[serde(default = "default_max_iterations")]
    pub max_iterations_per_task: u32,
    #[serde(default = "default_hourly_budget")]
    pub hourly_budget_usd: f64,
    #[serde(default = "default_max_parallel_agents")]
    pub max_parallel_agents: usize,
    #[serde(default = "default_approval_ttl_hours")]
    pub approval_ttl_hours: i64,
    #[serde(default = "default_rollback_log_cap")]
    pub rollback_log_cap: usize,
    #[serde(default = "default_cost_retention_hours")]
    pub cost_log_retention_hours: i64,
    /// Registrations older than this are dropped by a sweep. `None` disables it.
    #[serde(default)]
    pub agent_ttl_minutes: Option<i64>,
    #[serde(default = "default_orchestrator_role")]
    pub orchestrator_role: String,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_hourly_budget() -> f64 {
    10.0
}

fn default_max_parallel_agents() -> usize {
    3
}

fn default_approval_ttl_hours() -> i64 {
    DEFAULT_APPROVAL_TTL_HOURS
}

fn default_rollback_log_cap() -> usize {
    DEFAULT_ROLLBACK_LOG_CAP
}

fn default_cost_retention_hours() -> i64 {
    DEFAULT_COST_RETENTION_HOURS
}

fn default_orchestrator_role() -> String {
    DEFAULT_ORCHESTRATOR_ROLE.into()
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_iterations_per_task: default_max_iterations(),
            hourly_budget_usd: default_hourly_budget(),
            max_parallel_agents: default_max_parallel_agents(),
            approval_ttl_hours: default_approval_ttl_hours(),
            rollback_log_cap: default_rollback_log_cap(),
            cost_log_retention_hours: default_cost_retention_hours(),
            agent_ttl_minutes: None,
            orchestrator_role: default_orchestrator_role(),
        }
    }
}

impl SafetyLimits {
    pub fn approval_ttl(&self) -> Duration {
        Duration::hours(self.approval_ttl_hours)
    }

    pub fn cost_retention(&self) -> Duration {
        Duration::hours(self.cost_log_retention_hours)
    }

    pub fn agent_ttl(&self) -> Option<Duration> {
        self.agent_ttl_minutes.map(Duration::minutes)
    }

    pub fn is_orchestrator_role(&self, agent_type: &str) -> bool {
        agent_type.trim().eq_ignore_ascii_case(&self.orchestrator_role)
    }
}

/// Version-control binary used by rollback.
#[derive(Debug, Clone, Deserialize)]
pub struct VcsConfig {
    #[serde(default = "default_vcs_program")]
    pub program: String,
    #[serde(default = "default_vcs_work_dir")]
    pub work_dir: PathBuf,
}

fn default_vcs_program() -> String {
    "git".into()
}

fn default_vcs_work_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            program: default_vcs_program(),
            work_dir: default_vcs_work_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = OrchestrationConfig::from_toml("").unwrap();
        assert_eq!(config.hooks_path, PathBuf::from("./hooks"));
        assert_eq!(config.limits.max_iterations_per_task, 5);
        assert_eq!(config.limits.hourly_budget_usd, 10.0);
        assert_eq!(config.limits.max_parallel_agents, 3);
        assert!(config.limits.agent_ttl().is_none());
        assert_eq!(config.vcs.program, "git");
    }

    #[test]
    fn partial_limits_section() {
        let toml_str = r#"
hooks_path = "/var/lib/convoy"

[limits]
hourly_budget_usd = 25.5
agent_ttl_minutes = 90
orchestrator_role = "Mayor"

[vcs]
work_dir = "/srv/repo"
"#;
        let config = OrchestrationConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.hooks_path, PathBuf::from("/var/lib/convoy"));
        assert_eq!(config.limits.hourly_budget_usd, 25.5);
        assert_eq!(config.limits.max_parallel_agents, 3);
        assert_eq!(config.limits.agent_ttl(), Some(Duration::minutes(90)));
        assert!(config.limits.is_orchestrator_role("mayor"));
        assert!(config.limits.is_orchestrator_role(" MAYOR "));
        assert!(!config.limits.is_orchestrator_role("builder"));
        assert_eq!(config.vcs.work_dir, PathBuf::from("/srv/repo"));
    }

    #[test]
    fn hooks_override_ignores_blank() {
        let config = OrchestrationConfig::default().with_hooks_override(Some("  "));
        assert_eq!(config.hooks_path, PathBuf::from("./hooks"));
        let config = config.with_hooks_override(Some("/tmp/hooks"));
        assert_eq!(config.hooks_path, PathBuf::from("/tmp/hooks"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestrationConfig::load(&dir.path().join("convoy.toml")).unwrap();
        assert_eq!(config.limits.rollback_log_cap, 50);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convoy.toml");
        std::fs::write(&path, "limits = 3").unwrap();
        let err = OrchestrationConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("convoy.toml"));
    }
}
