pub mod convoy_engine;
pub mod safety;
pub mod task_engine;
pub mod vcs;

use anyhow::Result;
use convoy_core::config::OrchestrationConfig;
use convoy_db::{HooksLayout, Store};
use std::sync::Arc;

pub use convoy_engine::{ConvoyEngine, ConvoyFilter};
pub use safety::{BudgetStatus, SafetyControl, SafetyStatus};
pub use task_engine::{TaskEngine, TaskFilter};
pub use vcs::{GitCli, VersionControl};

/// The three engines wired to one shared store.
pub struct Orchestrator {
    store: Arc<Store>,
    pub tasks: TaskEngine,
    pub convoys: ConvoyEngine,
    pub safety: SafetyControl,
}

impl Orchestrator {
    /// Open the store under the configured hooks root, using the configured
    /// version-control program for rollback.
    pub fn open(config: &OrchestrationConfig) -> Result<Self> {
        Self::with_vcs(config, Box::new(GitCli::from_config(&config.vcs)))
    }

    pub fn with_vcs(config: &OrchestrationConfig, vcs: Box<dyn VersionControl>) -> Result<Self> {
        let store = Arc::new(Store::open(
            HooksLayout::new(&config.hooks_path),
            &config.limits,
        )?);
        let tasks = TaskEngine::new(Arc::clone(&store), config.limits.clone());
        let convoys = ConvoyEngine::new(Arc::clone(&store), tasks.clone());
        let safety = SafetyControl::new(
            Arc::clone(&store),
            tasks.clone(),
            config.limits.clone(),
            vcs,
        );
        Ok(Self {
            store,
            tasks,
            convoys,
            safety,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
