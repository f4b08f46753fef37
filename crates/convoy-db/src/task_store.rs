use crate::record_store::{Record, RecordStore};
use anyhow::Result;
use convoy_core::task::{TASK_PREFIX, Task, TaskId, TaskStatus};
use std::collections::BTreeMap;

impl Record for Task {
    const PREFIX: &'static str = TASK_PREFIX;

    fn record_id(&self) -> &str {
        self.id.as_str()
    }
}

pub type TaskStore = RecordStore<Task>;

impl RecordStore<Task> {
    pub fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        self.load(id.as_str())
    }

    pub fn allocate_id(&self) -> TaskId {
        TaskId(self.next_id())
    }

    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    /// Blocked tasks that list `id` among their dependencies.
    pub fn blocked_dependents_of(&self, id: &TaskId) -> Result<Vec<TaskId>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Blocked && t.depends_on(id))
            .map(|t| t.id)
            .collect())
    }

    /// Task count per status label; every status is present.
    pub fn status_counts(&self) -> Result<BTreeMap<&'static str, usize>> {
        let mut counts: BTreeMap<&'static str, usize> =
            TaskStatus::ALL.iter().map(|s| (s.label(), 0)).collect();
        for task in self.list()? {
            *counts.entry(task.status.label()).or_default() += 1;
        }
        Ok(counts)
    }
}
