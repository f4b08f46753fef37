//! Task lifecycle: creation, assignment, progress, and dependency unblocking.

use crate::convoy_engine::promote_on_member_start;
use chrono::{DateTime, Utc};
use convoy_core::config::SafetyLimits;
use convoy_core::convoy::ConvoyId;
use convoy_core::iteration::IterationRecord;
use convoy_core::task::{Task, TaskConfig, TaskId, TaskStatus};
use convoy_core::{EngineError, EngineResult, EntityKind};
use convoy_db::Store;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Optional constraints for [`TaskEngine::list_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub iteration: Option<String>,
    pub convoy: Option<ConvoyId>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status
            && task.status != status
        {
            return false;
        }
        if let Some(iteration) = &self.iteration
            && task.iteration.as_ref() != Some(iteration)
        {
            return false;
        }
        if let Some(convoy) = &self.convoy
            && task.convoy_id.as_ref() != Some(convoy)
        {
            return false;
        }
        true
    }
}

#[derive(Clone)]
pub struct TaskEngine {
    store: Arc<Store>,
    limits: SafetyLimits,
}

impl TaskEngine {
    pub fn new(store: Arc<Store>, limits: SafetyLimits) -> Self {
        Self { store, limits }
    }

    /// Create a task. One created `Blocked` is re-checked under its own lock
    /// once saved, so a dependency completing meanwhile is not missed.
    pub fn create_task(&self, config: TaskConfig) -> EngineResult<Task> {
        validate_config(&config)?;

        let initial = if self.dependencies_satisfied(&config.dependencies)? {
            TaskStatus::Pending
        } else {
            TaskStatus::Blocked
        };
        let id = self.store.tasks.allocate_id();
        let task = Task::new(
            id,
            config,
            initial,
            self.limits.max_iterations_per_task,
            Utc::now(),
        );
        self.persist(&task)?;
        tracing::info!(
            task_id = %task.id,
            name = %task.name,
            status = %task.status,
            deps = task.dependencies.len(),
            "task created"
        );
        if task.status == TaskStatus::Blocked
            && let Some(unblocked) = self.try_unblock(&task.id)?
        {
            return Ok(unblocked);
        }
        Ok(task)
    }

    /// Fetch a task. Unknown ids are an error.
    pub fn get_task(&self, id: &TaskId) -> EngineResult<Task> {
        self.store
            .tasks
            .get(id)?
            .ok_or_else(|| EngineError::not_found(EntityKind::Task, id))
    }

    pub fn assign_task(&self, id: &TaskId, agent_type: &str) -> EngineResult<Task> {
        let agent_type = agent_type.trim();
        if agent_type.is_empty() {
            return Err(EngineError::InvalidArgument("agent type is required".into()));
        }
        if self.limits.is_orchestrator_role(agent_type) {
            return Err(EngineError::Precondition(format!(
                "tasks cannot be assigned to the orchestrator role '{agent_type}'"
            )));
        }
        let task = self.mutate(id, "assign", |task, now| task.assign(agent_type, now))?;
        tracing::info!(task_id = %id, agent_type, "task assigned");
        Ok(task)
    }

    pub fn unassign_task(&self, id: &TaskId) -> EngineResult<Task> {
        let task = self.mutate(id, "unassign", |task, now| task.unassign(now))?;
        tracing::info!(task_id = %id, "task returned to pending");
        Ok(task)
    }

    /// Start an assigned task. A `Pending` owning convoy is promoted to
    /// `InProgress` once the task lock is released.
    pub fn start_task(&self, id: &TaskId) -> EngineResult<Task> {
        let task = self.mutate(id, "start", |task, now| task.start(now))?;
        tracing::info!(task_id = %id, "task started");

        if let Some(convoy_id) = &task.convoy_id
            && let Err(e) = promote_on_member_start(&self.store, convoy_id)
        {
            tracing::error!(task_id = %id, convoy_id = %convoy_id, error = %e, "convoy promotion failed");
        }
        Ok(task)
    }

    /// Complete a task, then unblock any dependents whose dependencies are
    /// now all satisfied.
    pub fn complete_task(&self, id: &TaskId, result: Option<String>) -> EngineResult<Task> {
        let task = self.mutate(id, "complete", |task, now| task.complete(result, now))?;
        tracing::info!(task_id = %id, "task completed");
        self.unblock_dependents(id);
        Ok(task)
    }

    /// Fail a task and count the attempt against its iteration ceiling.
    pub fn fail_task(&self, id: &TaskId, reason: &str) -> EngineResult<Task> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::InvalidArgument("failure reason is required".into()));
        }
        let mut reached = false;
        let task = self.mutate(id, "fail", |task, now| {
            reached = task.fail(reason, now)?;
            Ok(())
        })?;
        tracing::info!(task_id = %id, reason, attempts = task.attempts.count, "task failed");
        if reached {
            tracing::warn!(
                task_id = %id,
                attempts = task.attempts.count,
                ceiling = task.attempts.ceiling,
                "task reached its iteration ceiling"
            );
        }
        Ok(task)
    }

    pub fn cancel_task(&self, id: &TaskId, reason: Option<String>) -> EngineResult<Task> {
        let reason = reason.filter(|r| !r.trim().is_empty());
        let task = self.mutate(id, "cancel", |task, now| task.cancel(reason, now))?;
        tracing::info!(task_id = %id, "task cancelled");
        Ok(task)
    }

    /// Send a failed task back to `Pending`. The attempt count is kept.
    pub fn retry_task(&self, id: &TaskId) -> EngineResult<Task> {
        let task = self.mutate(id, "retry", |task, now| task.retry(now))?;
        tracing::info!(task_id = %id, attempts = task.attempts.count, "task retried");
        Ok(task)
    }

    /// Add a dependency to a `Pending` or `Blocked` task. A pending task whose
    /// new dependency is not yet complete becomes `Blocked`.
    pub fn add_dependency(&self, id: &TaskId, dependency: &TaskId) -> EngineResult<Task> {
        if id == dependency {
            return Err(EngineError::InvalidArgument(format!(
                "{id} cannot depend on itself"
            )));
        }
        let dep = self.get_task(dependency)?;
        if self.reaches(&dep, id)? {
            return Err(EngineError::InvalidArgument(format!(
                "{id} -> {dependency} would create a dependency cycle"
            )));
        }
        let satisfied = dep.status == TaskStatus::Completed;

        let task = self.mutate(id, "add_dependency", |task, now| {
            if !matches!(task.status, TaskStatus::Pending | TaskStatus::Blocked) {
                return Err(EngineError::Precondition(format!(
                    "dependencies can only be added to pending or blocked tasks ({} is {})",
                    task.id, task.status
                )));
            }
            if !task.depends_on(dependency) {
                task.dependencies.push(dependency.clone());
            }
            if !satisfied && task.status == TaskStatus::Pending {
                task.block(now)?;
            }
            Ok(())
        })?;
        tracing::info!(task_id = %id, dependency = %dependency, status = %task.status, "dependency added");
        if task.status == TaskStatus::Blocked
            && let Some(unblocked) = self.try_unblock(id)?
        {
            return Ok(unblocked);
        }
        Ok(task)
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> EngineResult<Vec<Task>> {
        Ok(self
            .store
            .tasks
            .list()?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect())
    }

    /// Highest-priority `Pending` task whose dependencies are satisfied.
    /// Ties go to the oldest task. `Blocked` tasks whose dependencies have
    /// all completed are unblocked first.
    pub fn next_ready_task(&self, iteration: Option<&str>) -> EngineResult<Option<Task>> {
        let in_iteration = |t: &Task| iteration.is_none_or(|it| t.iteration.as_deref() == Some(it));
        for task in self.store.tasks.list_by_status(TaskStatus::Blocked)? {
            if in_iteration(&task) && self.dependencies_satisfied(&task.dependencies)? {
                self.try_unblock(&task.id)?;
            }
        }

        let mut candidates: Vec<Task> = self
            .store
            .tasks
            .list_by_status(TaskStatus::Pending)?
            .into_iter()
            .filter(|t| in_iteration(t))
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.seq().cmp(&b.id.seq())));

        for task in candidates {
            if self.dependencies_satisfied(&task.dependencies)? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Every id resolves to a completed task. Unknown ids are unsatisfied.
    pub fn dependencies_satisfied(&self, ids: &[TaskId]) -> EngineResult<bool> {
        for id in ids {
            match self.store.tasks.get(id)? {
                Some(dep) if dep.status == TaskStatus::Completed => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    pub fn status_counts(&self) -> EngineResult<BTreeMap<&'static str, usize>> {
        Ok(self.store.tasks.status_counts()?)
    }

    /// Count one execution attempt. Returns the updated record.
    pub fn record_attempt(&self, id: &TaskId) -> EngineResult<IterationRecord> {
        let task = self.mutate(id, "record_attempt", |task, now| {
            task.attempts.record(now);
            Ok(())
        })?;
        Ok(task.attempts)
    }

    pub fn reset_attempts(&self, id: &TaskId) -> EngineResult<IterationRecord> {
        let task = self.mutate(id, "reset_attempts", |task, _| {
            task.attempts.reset();
            Ok(())
        })?;
        tracing::info!(task_id = %id, "task iterations reset");
        Ok(task.attempts)
    }

    fn unblock_dependents(&self, completed: &TaskId) {
        let dependents = match self.store.tasks.blocked_dependents_of(completed) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(task_id = %completed, error = %format!("{e:#}"), "failed to scan dependents");
                return;
            }
        };

        for dep_id in dependents {
            if let Err(e) = self.try_unblock(&dep_id) {
                tracing::error!(task_id = %dep_id, unblocked_by = %completed, error = %e, "failed to unblock task");
            }
        }
    }

    /// Move a `Blocked` task to `Pending` if every dependency has completed.
    /// Decided under the task lock on a fresh read.
    fn try_unblock(&self, id: &TaskId) -> EngineResult<Option<Task>> {
        let unblocked = self.store.tasks.with_lock(id.as_str(), || -> EngineResult<_> {
            let mut task = self.load(id)?;
            if task.status != TaskStatus::Blocked
                || !self.dependencies_satisfied(&task.dependencies)?
            {
                return Ok(None);
            }
            task.unblock(Utc::now())?;
            self.persist(&task)?;
            Ok(Some(task))
        })?;
        if unblocked.is_some() {
            tracing::info!(task_id = %id, "task unblocked");
        }
        Ok(unblocked)
    }

    /// Whether `from` transitively depends on `target`.
    fn reaches(&self, from: &Task, target: &TaskId) -> EngineResult<bool> {
        let mut seen = HashSet::new();
        let mut stack: Vec<TaskId> = from.dependencies.clone();
        while let Some(id) = stack.pop() {
            if &id == target {
                return Ok(true);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(task) = self.store.tasks.get(&id)? {
                stack.extend(task.dependencies);
            }
        }
        Ok(false)
    }

    fn load(&self, id: &TaskId) -> EngineResult<Task> {
        self.get_task(id)
    }

    fn persist(&self, task: &Task) -> EngineResult<()> {
        self.store.tasks.save(task).map_err(|e| {
            tracing::error!(task_id = %task.id, error = %format!("{e:#}"), "failed to persist task");
            EngineError::Storage(e)
        })
    }

    /// Lock, re-read, apply `f`, persist. On error nothing is written.
    fn mutate(
        &self,
        id: &TaskId,
        op: &'static str,
        f: impl FnOnce(&mut Task, DateTime<Utc>) -> EngineResult<()>,
    ) -> EngineResult<Task> {
        self.store.tasks.with_lock(id.as_str(), || {
            let mut task = self.load(id)?;
            if let Err(e) = f(&mut task, Utc::now()) {
                if let EngineError::InvalidTransition { from, to, .. } = &e {
                    tracing::warn!(task_id = %id, op, from = %from, to = %to, "invalid task transition ignored");
                }
                return Err(e);
            }
            self.persist(&task)?;
            Ok(task)
        })
    }
}

/// Argument checks shared by every path that creates a task.
pub(crate) fn validate_config(config: &TaskConfig) -> EngineResult<()> {
    if config.name.trim().is_empty() {
        return Err(EngineError::InvalidArgument("task name is required".into()));
    }
    if config.max_iterations == Some(0) {
        return Err(EngineError::InvalidArgument(
            "max_iterations must be at least 1".into(),
        ));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use convoy_db::{HooksLayout, Store};

    fn engine() -> (tempfile::TempDir, TaskEngine) {
        let dir = tempfile::tempdir().unwrap();
        let limits = SafetyLimits::default();
        let store = Store::open(HooksLayout::new(dir.path()), &limits).unwrap();
        (dir, TaskEngine::new(Arc::new(store), limits))
    }

    fn run_to_completion(engine: &TaskEngine, id: &TaskId) {
        engine.assign_task(id, "builder").unwrap();
        engine.start_task(id).unwrap();
        engine.complete_task(id, Some("done".into())).unwrap();
    }

    #[test]
    fn create_requires_name() {
        let (_dir, engine) = engine();
        let err = engine.create_task(TaskConfig::new("   ")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let (_dir, engine) = engine();
        let a = engine.create_task(TaskConfig::new("a")).unwrap();
        let b = engine.create_task(TaskConfig::new("b")).unwrap();
        assert_eq!(a.id.as_str(), "task-001");
        assert_eq!(b.id.as_str(), "task-002");
        assert_eq!(a.attempts.ceiling, 5);
    }

    #[test]
    fn unknown_dependency_blocks() {
        let (_dir, engine) = engine();
        let t = engine
            .create_task(TaskConfig::new("a").with_dependencies([TaskId::from("task-999")]))
            .unwrap();
        assert_eq!(t.status, TaskStatus::Blocked);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let (_dir, engine) = engine();
        let err = engine.get_task(&TaskId::from_seq(7)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn orchestrator_role_cannot_be_assigned() {
        let (_dir, engine) = engine();
        let t = engine.create_task(TaskConfig::new("a")).unwrap();
        let err = engine.assign_task(&t.id, "Mayor").unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
        assert_eq!(engine.get_task(&t.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn invalid_transition_leaves_task_unchanged() {
        let (_dir, engine) = engine();
        let t = engine.create_task(TaskConfig::new("a")).unwrap();
        let err = engine.complete_task(&t.id, None).unwrap_err();
        assert!(err.is_invalid_transition());
        let stored = engine.get_task(&t.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.history.len(), 1);
    }

    #[test]
    fn completion_unblocks_only_fully_satisfied_dependents() {
        let (_dir, engine) = engine();
        let a = engine.create_task(TaskConfig::new("a")).unwrap();
        let b = engine.create_task(TaskConfig::new("b")).unwrap();
        let c = engine
            .create_task(TaskConfig::new("c").with_dependencies([a.id.clone(), b.id.clone()]))
            .unwrap();
        assert_eq!(c.status, TaskStatus::Blocked);

        run_to_completion(&engine, &a.id);
        assert_eq!(engine.get_task(&c.id).unwrap().status, TaskStatus::Blocked);

        run_to_completion(&engine, &b.id);
        assert_eq!(engine.get_task(&c.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn fail_then_retry_keeps_attempts() {
        let (_dir, engine) = engine();
        let t = engine.create_task(TaskConfig::new("a")).unwrap();
        engine.assign_task(&t.id, "builder").unwrap();
        engine.start_task(&t.id).unwrap();
        let failed = engine.fail_task(&t.id, "compile error").unwrap();
        assert_eq!(failed.attempts.count, 1);
        assert_eq!(failed.error.as_deref(), Some("compile error"));

        let retried = engine.retry_task(&t.id).unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert_eq!(retried.attempts.count, 1);
        assert!(retried.assigned_agent.is_none());
        assert!(retried.error.is_none());

        assert!(engine.retry_task(&t.id).unwrap_err().is_invalid_transition());
    }

    #[test]
    fn next_ready_prefers_priority_then_age() {
        let (_dir, engine) = engine();
        let low = engine.create_task(TaskConfig::new("low")).unwrap();
        let high1 = engine
            .create_task(TaskConfig::new("high1").with_priority(5))
            .unwrap();
        engine
            .create_task(TaskConfig::new("high2").with_priority(5))
            .unwrap();
        engine
            .create_task(
                TaskConfig::new("blocked")
                    .with_priority(9)
                    .with_dependencies([low.id.clone()]),
            )
            .unwrap();

        assert_eq!(engine.next_ready_task(None).unwrap().unwrap().id, high1.id);
        assert!(engine.next_ready_task(Some("it-2")).unwrap().is_none());
    }

    #[test]
    fn next_ready_recovers_missed_unblock() {
        let (_dir, engine) = engine();
        let a = engine.create_task(TaskConfig::new("a")).unwrap();
        let b = engine
            .create_task(TaskConfig::new("b").with_dependencies([a.id.clone()]))
            .unwrap();
        assert_eq!(b.status, TaskStatus::Blocked);

        // Complete `a` on disk without going through the engine, so no
        // dependent scan runs.
        let mut done = engine.get_task(&a.id).unwrap();
        let now = Utc::now();
        done.assign("builder", now).unwrap();
        done.start(now).unwrap();
        done.complete(None, now).unwrap();
        engine.store.tasks.save(&done).unwrap();
        assert_eq!(engine.get_task(&b.id).unwrap().status, TaskStatus::Blocked);

        let next = engine.next_ready_task(None).unwrap().unwrap();
        assert_eq!(next.id, b.id);
        assert_eq!(next.status, TaskStatus::Pending);
        assert_eq!(engine.get_task(&b.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn add_dependency_on_completed_task_stays_pending() {
        let (_dir, engine) = engine();
        let a = engine.create_task(TaskConfig::new("a")).unwrap();
        run_to_completion(&engine, &a.id);
        let b = engine.create_task(TaskConfig::new("b")).unwrap();
        let b = engine.add_dependency(&b.id, &a.id).unwrap();
        assert_eq!(b.status, TaskStatus::Pending);
        assert_eq!(b.history.len(), 1);
    }

    #[test]
    fn add_dependency_blocks_and_rejects_cycles() {
        let (_dir, engine) = engine();
        let a = engine.create_task(TaskConfig::new("a")).unwrap();
        let b = engine.create_task(TaskConfig::new("b")).unwrap();

        let b = engine.add_dependency(&b.id, &a.id).unwrap();
        assert_eq!(b.status, TaskStatus::Blocked);

        let err = engine.add_dependency(&a.id, &b.id).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        let err = engine.add_dependency(&a.id, &a.id).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        let err = engine.add_dependency(&a.id, &TaskId::from_seq(99)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn list_filters() {
        let (_dir, engine) = engine();
        engine
            .create_task(TaskConfig::new("a").with_iteration("it-1"))
            .unwrap();
        let b = engine
            .create_task(TaskConfig::new("b").with_iteration("it-2"))
            .unwrap();
        engine.cancel_task(&b.id, Some("obsolete".into())).unwrap();

        let filter = TaskFilter {
            iteration: Some("it-2".into()),
            ..TaskFilter::default()
        };
        assert_eq!(engine.list_tasks(&filter).unwrap().len(), 1);
        let filter = TaskFilter {
            status: Some(TaskStatus::Pending),
            ..TaskFilter::default()
        };
        assert_eq!(engine.list_tasks(&filter).unwrap()[0].name, "a");
        assert_eq!(engine.status_counts().unwrap()["cancelled"], 1);
    }
}
