use super::SafetyControl;
use chrono::{DateTime, Utc};
use convoy_core::agent::ActiveAgent;
use convoy_core::{EngineError, EngineResult};

impl SafetyControl {
    /// Whether another agent may start without exceeding the parallel limit.
    pub fn can_spawn_agent(&self) -> EngineResult<bool> {
        let active = self.store.safety.read()?.active_count();
        Ok(active < self.limits.max_parallel_agents)
    }

    /// Register a running agent. Returns the number of active agents.
    pub fn register_agent(&self, agent_id: &str, agent_type: &str) -> EngineResult<usize> {
        let agent_id = agent_id.trim();
        if agent_id.is_empty() {
            return Err(EngineError::InvalidArgument("agent id is required".into()));
        }
        let agent = ActiveAgent::new(agent_id, agent_type.trim(), Utc::now());
        let active = self.store.safety.update(|state| {
            state.register(agent);
            Ok::<_, EngineError>(state.active_count())
        })?;
        tracing::info!(agent_id, agent_type, active, "agent registered");
        if active > self.limits.max_parallel_agents {
            tracing::warn!(
                active,
                max = self.limits.max_parallel_agents,
                "more agents registered than the parallel limit allows"
            );
        }
        Ok(active)
    }

    /// Returns `true` if the agent was registered.
    pub fn unregister_agent(&self, agent_id: &str) -> EngineResult<bool> {
        let removed = self
            .store
            .safety
            .update(|state| Ok::<_, EngineError>(state.unregister(agent_id, Utc::now())))?;
        if removed {
            tracing::info!(agent_id, "agent unregistered");
        } else {
            tracing::debug!(agent_id, "unregister for unknown agent");
        }
        Ok(removed)
    }

    pub fn list_active_agents(&self) -> EngineResult<Vec<ActiveAgent>> {
        Ok(self.store.safety.read()?.active_agents)
    }

    /// Drop registrations older than the configured TTL. Without a TTL this
    /// is a no-op.
    pub fn sweep_stale_agents(&self, now: DateTime<Utc>) -> EngineResult<Vec<ActiveAgent>> {
        let Some(ttl) = self.limits.agent_ttl() else {
            return Ok(Vec::new());
        };
        let stale = self
            .store
            .safety
            .update(|state| Ok::<_, EngineError>(state.sweep(now, ttl)))?;
        for agent in &stale {
            tracing::warn!(
                agent_id = %agent.agent_id,
                started_at = %agent.started_at,
                "dropped stale agent registration"
            );
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{FakeVcs, safety, safety_with};
    use chrono::{Duration, Utc};
    use convoy_core::config::SafetyLimits;

    #[test]
    fn parallel_limit() {
        let (_dir, safety) = safety();
        for i in 0..3 {
            assert!(safety.can_spawn_agent().unwrap());
            safety.register_agent(&format!("agent-{i}"), "builder").unwrap();
        }
        assert!(!safety.can_spawn_agent().unwrap());

        // Re-registering the same id does not take a new slot.
        assert_eq!(safety.register_agent("agent-0", "builder").unwrap(), 3);

        assert!(safety.unregister_agent("agent-1").unwrap());
        assert!(!safety.unregister_agent("agent-1").unwrap());
        assert!(safety.can_spawn_agent().unwrap());
        assert_eq!(safety.list_active_agents().unwrap().len(), 2);
    }

    #[test]
    fn sweep_without_ttl_keeps_everyone() {
        let (_dir, safety) = safety();
        safety.register_agent("a", "builder").unwrap();
        let swept = safety.sweep_stale_agents(Utc::now() + Duration::days(30)).unwrap();
        assert!(swept.is_empty());
        assert_eq!(safety.list_active_agents().unwrap().len(), 1);
    }

    #[test]
    fn sweep_with_ttl_frees_slots() {
        let limits = SafetyLimits {
            agent_ttl_minutes: Some(30),
            ..SafetyLimits::default()
        };
        let (_dir, safety) = safety_with(limits, Box::new(FakeVcs::new(&["a"])));
        safety.register_agent("crashed", "builder").unwrap();
        assert!(safety.sweep_stale_agents(Utc::now()).unwrap().is_empty());

        let swept = safety
            .sweep_stale_agents(Utc::now() + Duration::minutes(31))
            .unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].agent_id, "crashed");
        assert!(safety.list_active_agents().unwrap().is_empty());
    }

    #[test]
    fn blank_agent_id_is_rejected() {
        let (_dir, safety) = safety();
        assert!(safety.register_agent("  ", "builder").is_err());
    }
}
