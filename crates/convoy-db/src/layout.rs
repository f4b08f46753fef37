//! On-disk layout under the hooks root.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct HooksLayout {
    root: PathBuf,
}

impl HooksLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    pub fn convoys_dir(&self) -> PathBuf {
        self.root.join("convoys")
    }

    pub fn orchestration_dir(&self) -> PathBuf {
        self.root.join("orchestration")
    }

    pub fn reviews_dir(&self) -> PathBuf {
        self.root.join("reviews")
    }

    pub fn budget_file(&self) -> PathBuf {
        self.orchestration_dir().join("budget.json")
    }

    pub fn safety_state_file(&self) -> PathBuf {
        self.orchestration_dir().join("safety-state.json")
    }

    pub fn rollback_log_file(&self) -> PathBuf {
        self.orchestration_dir().join("rollback-log.json")
    }

    pub fn approvals_file(&self) -> PathBuf {
        self.reviews_dir().join("pending-approval.json")
    }
}
