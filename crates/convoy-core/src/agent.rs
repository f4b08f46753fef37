use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A currently running agent, registered only to bound concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAgent {
    pub agent_id: String,
    pub agent_type: String,
    pub started_at: DateTime<Utc>,
}

impl ActiveAgent {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            started_at: now,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.started_at > ttl
    }
}

/// Persisted snapshot of the concurrency guard (`safety-state.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyState {
    #[serde(default)]
    pub active_agents: Vec<ActiveAgent>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SafetyState {
    /// Register an agent, replacing any previous registration with the same id.
    pub fn register(&mut self, agent: ActiveAgent) {
        self.active_agents.retain(|a| a.agent_id != agent.agent_id);
        self.updated_at = Some(agent.started_at);
        self.active_agents.push(agent);
    }

    /// Returns `true` if the agent was registered.
    pub fn unregister(&mut self, agent_id: &str, now: DateTime<Utc>) -> bool {
        let before = self.active_agents.len();
        self.active_agents.retain(|a| a.agent_id != agent_id);
        self.updated_at = Some(now);
        self.active_agents.len() != before
    }

    /// Drop registrations older than `ttl`, returning the removed agents.
    pub fn sweep(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<ActiveAgent> {
        let (stale, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active_agents)
            .into_iter()
            .partition(|a| a.is_stale(now, ttl));
        self.active_agents = live;
        if !stale.is_empty() {
            self.updated_at = Some(now);
        }
        stale
    }

    pub fn active_count(&self) -> usize {
        self.active_agents.len()
    }
}
