pub mod atomic;
pub mod convoy_store;
pub mod counter;
pub mod document;
pub mod layout;
pub mod locks;
pub mod record_store;
pub mod task_store;

use anyhow::Result;
use chrono::Utc;
use convoy_core::agent::SafetyState;
use convoy_core::approval::ApprovalQueue;
use convoy_core::budget::BudgetLedger;
use convoy_core::config::SafetyLimits;
use convoy_core::rollback::RollbackLog;
use std::path::PathBuf;

pub use convoy_store::ConvoyStore;
pub use document::JsonDocument;
pub use layout::HooksLayout;
pub use record_store::{Record, RecordStore};
pub use task_store::TaskStore;

/// Everything persisted under one hooks root.
///
/// Constructed once per process and shared (`Arc<Store>`) by every engine.
pub struct Store {
    layout: HooksLayout,
    pub tasks: TaskStore,
    pub convoys: ConvoyStore,
    pub budget: JsonDocument<BudgetLedger>,
    pub safety: JsonDocument<SafetyState>,
    pub approvals: JsonDocument<ApprovalQueue>,
    pub rollbacks: JsonDocument<RollbackLog>,
}

impl Store {
    pub fn open(layout: HooksLayout, limits: &SafetyLimits) -> Result<Self> {
        let tasks = TaskStore::open(layout.tasks_dir())?;
        let convoys = ConvoyStore::open(layout.convoys_dir())?;
        atomic::remove_orphaned_tmp(&layout.orchestration_dir())?;
        atomic::remove_orphaned_tmp(&layout.reviews_dir())?;

        tracing::info!(root = %layout.root().display(), "store opened");
        Ok(Self {
            tasks,
            convoys,
            budget: JsonDocument::new(
                layout.budget_file(),
                BudgetLedger::new(limits.hourly_budget_usd, Utc::now()),
            ),
            safety: JsonDocument::new(layout.safety_state_file(), SafetyState::default()),
            approvals: JsonDocument::new(layout.approvals_file(), ApprovalQueue::default()),
            rollbacks: JsonDocument::new(layout.rollback_log_file(), RollbackLog::default()),
            layout,
        })
    }

    pub fn layout(&self) -> &HooksLayout {
        &self.layout
    }
}

/// Open (or create) the store rooted at `root`.
pub fn open_store(root: impl Into<PathBuf>, limits: &SafetyLimits) -> Result<Store> {
    Store::open(HooksLayout::new(root), limits)
}
