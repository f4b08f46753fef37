//! Convoys: groups of tasks with their own dependency graph and
//! aggregate progress derived from member tasks.

use crate::task_engine::{TaskEngine, validate_config};
use chrono::{DateTime, Utc};
use convoy_core::convoy::{Convoy, ConvoyConfig, ConvoyId, ConvoyProgress, ConvoyStatus};
use convoy_core::task::{Task, TaskId, TaskStatus};
use convoy_core::{EngineError, EngineResult, EntityKind};
use convoy_db::Store;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ConvoyFilter {
    pub status: Option<ConvoyStatus>,
    pub iteration: Option<String>,
}

impl ConvoyFilter {
    fn matches(&self, convoy: &Convoy) -> bool {
        if let Some(status) = self.status
            && convoy.status != status
        {
            return false;
        }
        if let Some(iteration) = &self.iteration
            && convoy.iteration.as_ref() != Some(iteration)
        {
            return false;
        }
        true
    }
}

#[derive(Clone)]
pub struct ConvoyEngine {
    store: Arc<Store>,
    tasks: TaskEngine,
}

impl ConvoyEngine {
    pub fn new(store: Arc<Store>, tasks: TaskEngine) -> Self {
        Self { store, tasks }
    }

    /// Create a convoy, creating its inline member tasks and adopting any
    /// existing tasks it lists.
    ///
    /// If the convoy cannot be saved, adopted tasks are released and inline
    /// tasks are released and cancelled, so no task is left pointing at a
    /// convoy that does not exist.
    pub fn create_convoy(&self, config: ConvoyConfig) -> EngineResult<Convoy> {
        if config.name.trim().is_empty() {
            return Err(EngineError::InvalidArgument("convoy name is required".into()));
        }
        for task_config in &config.tasks {
            validate_config(task_config)?;
        }
        for task_id in &config.task_ids {
            let task = self.tasks.get_task(task_id)?;
            if task.convoy_id.is_some() {
                return Err(EngineError::Precondition(format!(
                    "{task_id} already belongs to a convoy"
                )));
            }
        }

        let id = self.store.convoys.allocate_id();
        let mut adopted: Vec<TaskId> = Vec::new();
        let mut created: Vec<TaskId> = Vec::new();
        let convoy = match self.assemble(&id, config, &mut adopted, &mut created) {
            Ok(convoy) => convoy,
            Err(e) => {
                tracing::warn!(convoy_id = %id, error = %e, "convoy creation failed, releasing members");
                for task_id in &adopted {
                    self.release_member(task_id, &id, false);
                }
                for task_id in &created {
                    self.release_member(task_id, &id, true);
                }
                return Err(e);
            }
        };
        tracing::info!(
            convoy_id = %convoy.id,
            name = %convoy.name,
            status = %convoy.status,
            tasks = convoy.tasks.len(),
            "convoy created"
        );
        Ok(convoy)
    }

    /// Stamp and create members, then save the convoy. Every task touched is
    /// recorded in `adopted` or `created` as soon as it carries `id`.
    fn assemble(
        &self,
        id: &ConvoyId,
        config: ConvoyConfig,
        adopted: &mut Vec<TaskId>,
        created: &mut Vec<TaskId>,
    ) -> EngineResult<Convoy> {
        let mut members: Vec<TaskId> = Vec::new();
        for task_id in &config.task_ids {
            self.stamp_member(task_id, id)?;
            if !members.contains(task_id) {
                adopted.push(task_id.clone());
                members.push(task_id.clone());
            }
        }
        for task_config in &config.tasks {
            let mut task_config = task_config.clone();
            task_config.convoy_id = Some(id.clone());
            if task_config.iteration.is_none() {
                task_config.iteration = config.iteration.clone();
            }
            let task = self.tasks.create_task(task_config)?;
            created.push(task.id.clone());
            members.push(task.id);
        }

        let initial = if self.dependencies_satisfied(&config.dependencies)? {
            ConvoyStatus::Pending
        } else {
            ConvoyStatus::Blocked
        };
        let mut convoy = Convoy::new(id.clone(), config, members, initial, Utc::now());
        convoy.progress = self.compute_progress(&convoy)?;
        self.persist(&convoy)?;
        Ok(convoy)
    }

    /// Fetch a convoy with freshly computed progress.
    pub fn get_convoy(&self, id: &ConvoyId) -> EngineResult<Convoy> {
        let mut convoy = self.load(id)?;
        convoy.progress = self.compute_progress(&convoy)?;
        Ok(convoy)
    }

    pub fn progress(&self, id: &ConvoyId) -> EngineResult<ConvoyProgress> {
        let convoy = self.load(id)?;
        self.compute_progress(&convoy)
    }

    pub fn list_convoys(&self, filter: &ConvoyFilter) -> EngineResult<Vec<Convoy>> {
        let mut convoys = Vec::new();
        for mut convoy in self.store.convoys.list()? {
            if filter.matches(&convoy) {
                convoy.progress = self.compute_progress(&convoy)?;
                convoys.push(convoy);
            }
        }
        Ok(convoys)
    }

    /// Attach an existing task to a non-terminal convoy.
    pub fn add_task_to_convoy(&self, convoy_id: &ConvoyId, task_id: &TaskId) -> EngineResult<Convoy> {
        let convoy = self.load(convoy_id)?;
        if convoy.status.is_terminal() {
            return Err(EngineError::Precondition(format!(
                "{convoy_id} is {} and cannot take new tasks",
                convoy.status
            )));
        }
        let already_member = self.tasks.get_task(task_id)?.convoy_id.as_ref() == Some(convoy_id);
        let task = self.stamp_member(task_id, convoy_id)?;

        let added = self.mutate(convoy_id, "add_task", |convoy, _| {
            if convoy.status.is_terminal() {
                return Err(EngineError::Precondition(format!(
                    "{convoy_id} is {} and cannot take new tasks",
                    convoy.status
                )));
            }
            if !convoy.has_member(task_id) {
                convoy.tasks.push(task_id.clone());
            }
            Ok(())
        });
        let convoy = match added {
            Ok(convoy) => convoy,
            Err(e) => {
                let listed = self.load(convoy_id).is_ok_and(|c| c.has_member(task_id));
                if !already_member && !listed {
                    self.release_member(task_id, convoy_id, false);
                }
                return Err(e);
            }
        };
        tracing::info!(convoy_id = %convoy_id, task_id = %task_id, "task added to convoy");

        if task.status == TaskStatus::InProgress {
            promote_on_member_start(&self.store, convoy_id)?;
            return self.get_convoy(convoy_id);
        }
        Ok(convoy)
    }

    pub fn start_convoy(&self, id: &ConvoyId) -> EngineResult<Convoy> {
        let convoy = self.mutate(id, "start", |convoy, now| {
            convoy.transition(ConvoyStatus::InProgress, Some("started".into()), now)
        })?;
        tracing::info!(convoy_id = %id, "convoy started");
        Ok(convoy)
    }

    /// Complete a convoy. Refused unless every member task is complete at
    /// the moment of the call. A `Pending` convoy is promoted on the way.
    pub fn complete_convoy(&self, id: &ConvoyId) -> EngineResult<Convoy> {
        let convoy = self.mutate(id, "complete", |convoy, now| {
            let progress = self.compute_progress(convoy)?;
            if !progress.all_tasks_complete {
                return Err(EngineError::Precondition(format!(
                    "{id} has {}/{} tasks complete",
                    progress.completed, progress.total
                )));
            }
            if convoy.status == ConvoyStatus::Pending {
                convoy.transition(ConvoyStatus::InProgress, Some("auto-promoted".into()), now)?;
            }
            convoy.transition(ConvoyStatus::Completed, None, now)?;
            convoy.progress = progress;
            Ok(())
        })?;
        tracing::info!(convoy_id = %id, "convoy completed");
        self.unblock_dependents(id);
        Ok(convoy)
    }

    pub fn fail_convoy(&self, id: &ConvoyId, reason: &str) -> EngineResult<Convoy> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::InvalidArgument("failure reason is required".into()));
        }
        let convoy = self.mutate(id, "fail", |convoy, now| {
            convoy.transition(ConvoyStatus::Failed, Some(reason.to_string()), now)?;
            convoy.error = Some(reason.to_string());
            Ok(())
        })?;
        tracing::info!(convoy_id = %id, reason, "convoy failed");
        Ok(convoy)
    }

    pub fn cancel_convoy(&self, id: &ConvoyId, reason: Option<String>) -> EngineResult<Convoy> {
        let reason = reason.filter(|r| !r.trim().is_empty());
        let convoy = self.mutate(id, "cancel", |convoy, now| {
            convoy.transition(ConvoyStatus::Cancelled, reason.clone(), now)?;
            if reason.is_some() {
                convoy.error = reason;
            }
            Ok(())
        })?;
        tracing::info!(convoy_id = %id, "convoy cancelled");
        Ok(convoy)
    }

    pub fn retry_convoy(&self, id: &ConvoyId) -> EngineResult<Convoy> {
        let convoy = self.mutate(id, "retry", |convoy, now| convoy.retry(now))?;
        tracing::info!(convoy_id = %id, "convoy retried");
        Ok(convoy)
    }

    /// Highest-priority `Pending` convoy with satisfied dependencies. Failing
    /// that, the first `Blocked` convoy whose dependencies have since been
    /// satisfied is unblocked and returned.
    pub fn next_ready_convoy(&self, iteration: Option<&str>) -> EngineResult<Option<Convoy>> {
        let mut convoys: Vec<Convoy> = self
            .store
            .convoys
            .list()?
            .into_iter()
            .filter(|c| iteration.is_none_or(|it| c.iteration.as_deref() == Some(it)))
            .collect();
        convoys.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.seq().cmp(&b.id.seq())));

        for convoy in convoys.iter().filter(|c| c.status == ConvoyStatus::Pending) {
            if self.dependencies_satisfied(&convoy.dependencies)? {
                return self.get_convoy(&convoy.id).map(Some);
            }
        }
        for convoy in convoys.iter().filter(|c| c.status == ConvoyStatus::Blocked) {
            if let Some(unblocked) = self.try_unblock(&convoy.id)? {
                return Ok(Some(unblocked));
            }
        }
        Ok(None)
    }

    /// Every id resolves to a completed convoy. Unknown ids are unsatisfied.
    pub fn dependencies_satisfied(&self, ids: &[ConvoyId]) -> EngineResult<bool> {
        for id in ids {
            match self.store.convoys.get(id)? {
                Some(dep) if dep.status == ConvoyStatus::Completed => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    fn compute_progress(&self, convoy: &Convoy) -> EngineResult<ConvoyProgress> {
        let mut statuses = Vec::with_capacity(convoy.tasks.len());
        for task_id in &convoy.tasks {
            statuses.push(self.store.tasks.get(task_id)?.map(|t| t.status));
        }
        Ok(ConvoyProgress::from_statuses(statuses))
    }

    /// Set the task's owning convoy under the task lock.
    fn stamp_member(&self, task_id: &TaskId, convoy_id: &ConvoyId) -> EngineResult<Task> {
        self.store.tasks.with_lock(task_id.as_str(), || {
            let mut task = self.tasks.get_task(task_id)?;
            if let Some(owner) = task.convoy_id.clone() {
                if owner == *convoy_id {
                    return Ok(task);
                }
                return Err(EngineError::Precondition(format!(
                    "{task_id} already belongs to {owner}"
                )));
            }
            task.convoy_id = Some(convoy_id.clone());
            self.store.tasks.save(&task)?;
            Ok(task)
        })
    }

    /// Undo `stamp_member` after a failed membership change. Inline tasks
    /// created for the convoy are also cancelled. Failures are logged.
    fn release_member(&self, task_id: &TaskId, convoy_id: &ConvoyId, cancel: bool) {
        let released = self.store.tasks.with_lock(task_id.as_str(), || -> EngineResult<()> {
            let mut task = self.tasks.get_task(task_id)?;
            if task.convoy_id.as_ref() != Some(convoy_id) {
                return Ok(());
            }
            task.convoy_id = None;
            if cancel && task.status.can_transition_to(TaskStatus::Cancelled) {
                task.cancel(Some(format!("{convoy_id} was not created")), Utc::now())?;
            }
            self.store.tasks.save(&task)?;
            Ok(())
        });
        match released {
            Ok(()) => tracing::info!(task_id = %task_id, convoy_id = %convoy_id, cancelled = cancel, "task released from convoy"),
            Err(e) => tracing::error!(task_id = %task_id, convoy_id = %convoy_id, error = %e, "failed to release task from convoy"),
        }
    }

    /// Unblock a `Blocked` convoy whose dependencies are now satisfied.
    fn try_unblock(&self, id: &ConvoyId) -> EngineResult<Option<Convoy>> {
        let unblocked = self.store.convoys.with_lock(id.as_str(), || -> EngineResult<_> {
            let mut convoy = self.load(id)?;
            if convoy.status != ConvoyStatus::Blocked
                || !self.dependencies_satisfied(&convoy.dependencies)?
            {
                return Ok(None);
            }
            let progress = self.compute_progress(&convoy)?;
            let next = if progress.has_running() {
                ConvoyStatus::InProgress
            } else {
                ConvoyStatus::Pending
            };
            convoy.transition(next, Some("dependencies satisfied".into()), Utc::now())?;
            convoy.progress = progress;
            self.persist(&convoy)?;
            Ok(Some(convoy))
        })?;
        if let Some(convoy) = &unblocked {
            tracing::info!(convoy_id = %id, status = %convoy.status, "convoy unblocked");
        }
        Ok(unblocked)
    }

    fn unblock_dependents(&self, completed: &ConvoyId) {
        let dependents = match self.store.convoys.blocked_dependents_of(completed) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(convoy_id = %completed, error = %format!("{e:#}"), "failed to scan dependent convoys");
                return;
            }
        };
        for dep_id in dependents {
            if let Err(e) = self.try_unblock(&dep_id) {
                tracing::error!(convoy_id = %dep_id, error = %e, "failed to unblock convoy");
            }
        }
    }

    fn load(&self, id: &ConvoyId) -> EngineResult<Convoy> {
        self.store
            .convoys
            .get(id)?
            .ok_or_else(|| EngineError::not_found(EntityKind::Convoy, id))
    }

    fn persist(&self, convoy: &Convoy) -> EngineResult<()> {
        persist(&self.store, convoy)
    }

    fn mutate(
        &self,
        id: &ConvoyId,
        op: &'static str,
        f: impl FnOnce(&mut Convoy, DateTime<Utc>) -> EngineResult<()>,
    ) -> EngineResult<Convoy> {
        let mut convoy = self.store.convoys.with_lock(id.as_str(), || -> EngineResult<_> {
            let mut convoy = self.load(id)?;
            if let Err(e) = f(&mut convoy, Utc::now()) {
                if let EngineError::InvalidTransition { from, to, .. } = &e {
                    tracing::warn!(convoy_id = %id, op, from = %from, to = %to, "invalid convoy transition ignored");
                }
                return Err(e);
            }
            self.persist(&convoy)?;
            Ok(convoy)
        })?;
        convoy.progress = self.compute_progress(&convoy)?;
        Ok(convoy)
    }
}

fn persist(store: &Store, convoy: &Convoy) -> EngineResult<()> {
    store.convoys.save(convoy).map_err(|e| {
        tracing::error!(convoy_id = %convoy.id, error = %format!("{e:#}"), "failed to persist convoy");
        EngineError::Storage(e)
    })
}

/// Promote a `Pending` convoy to `InProgress` because one of its tasks started.
/// Called with no task lock held.
pub(crate) fn promote_on_member_start(store: &Store, convoy_id: &ConvoyId) -> EngineResult<()> {
    store.convoys.with_lock(convoy_id.as_str(), || {
        let Some(mut convoy) = store.convoys.get(convoy_id)? else {
            tracing::warn!(convoy_id = %convoy_id, "member task references a missing convoy");
            return Ok(());
        };
        if convoy.status != ConvoyStatus::Pending {
            return Ok(());
        }
        convoy.transition(
            ConvoyStatus::InProgress,
            Some("member task started".into()),
            Utc::now(),
        )?;
        persist(store, &convoy)?;
        tracing::info!(convoy_id = %convoy_id, "convoy promoted to in-progress");
        Ok(())
    })
}
