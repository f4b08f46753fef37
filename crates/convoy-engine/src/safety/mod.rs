//! Cross-cutting guards on agent behaviour: iteration ceilings, hourly
//! spend, parallel agents, human approvals, and rollback.
//!
//! The guards are advisory. Callers check before proceeding; nothing here
//! rejects work on its own.

mod approval;
mod budget;
mod concurrency;
mod iteration;
mod rollback;

pub use budget::BudgetStatus;

use crate::task_engine::TaskEngine;
use crate::vcs::VersionControl;
use convoy_core::EngineResult;
use convoy_core::config::SafetyLimits;
use convoy_core::rollback::RollbackRecord;
use convoy_db::Store;
use serde::Serialize;
use std::sync::Arc;

pub struct SafetyControl {
    store: Arc<Store>,
    tasks: TaskEngine,
    limits: SafetyLimits,
    vcs: Box<dyn VersionControl>,
}

/// Operator-facing summary of every guard.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyStatus {
    pub budget: BudgetStatus,
    pub active_agents: usize,
    pub max_parallel_agents: usize,
    pub pending_approvals: usize,
    pub last_rollback: Option<RollbackRecord>,
}

impl SafetyControl {
    pub fn new(
        store: Arc<Store>,
        tasks: TaskEngine,
        limits: SafetyLimits,
        vcs: Box<dyn VersionControl>,
    ) -> Self {
        Self {
            store,
            tasks,
            limits,
            vcs,
        }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    pub fn safety_status(&self) -> EngineResult<SafetyStatus> {
        let budget = self.budget_status()?;
        let active_agents = self.store.safety.read()?.active_count();
        let pending_approvals = self.store.approvals.read()?.pending_count();
        let last_rollback = self.store.rollbacks.read()?.last().cloned();
        Ok(SafetyStatus {
            budget,
            active_agents,
            max_parallel_agents: self.limits.max_parallel_agents,
            pending_approvals,
            last_rollback,
        })
    }
}
