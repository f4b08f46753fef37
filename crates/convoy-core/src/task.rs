use crate::convoy::ConvoyId;
use crate::error::{EngineError, EngineResult, EntityKind};
use crate::history::StatusTransition;
use crate::id::{format_sequence, parse_sequence};
use crate::iteration::IterationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of every task id (`task-001`).
pub const TASK_PREFIX: &str = "task";

/// Unique task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn from_seq(n: u64) -> Self {
        Self(format_sequence(TASK_PREFIX, n))
    }

    /// Numeric suffix, if the id is sequential.
    pub fn seq(&self) -> Option<u64> {
        parse_sequence(&self.0, TASK_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TaskId(s.to_string()))
    }
}

/// Task status as a state machine.
///
/// Transitions:
///   Pending -> Assigned | Blocked | Cancelled
///   Blocked -> Pending | Cancelled
///   Assigned -> InProgress | Pending | Cancelled
///   InProgress -> Completed | Failed | Cancelled
///   Failed -> Pending (retry)
///   Completed, Cancelled are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Blocked,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Blocked,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Short label for display and filtering.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }

    /// Statuses reachable in one step.
    pub fn allowed_next(&self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Pending => &[Assigned, Blocked, Cancelled],
            Blocked => &[Pending, Cancelled],
            Assigned => &[InProgress, Pending, Cancelled],
            InProgress => &[Completed, Failed, Cancelled],
            Failed => &[Pending],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Caller-supplied description of a task to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub name: String,
    pub description: String,
    /// Iteration tag used to group work (e.g. a sprint or milestone).
    pub iteration: Option<String>,
    pub convoy_id: Option<ConvoyId>,
    pub dependencies: Vec<TaskId>,
    /// Higher is more urgent.
    pub priority: i32,
    pub deliverable: Option<String>,
    pub success_criteria: Vec<String>,
    /// Free-form specification; opaque to the engine.
    pub specification: BTreeMap<String, serde_json::Value>,
    pub estimated_minutes: Option<u32>,
    /// Overrides the configured per-task attempt ceiling.
    pub max_iterations: Option<u32>,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_iteration(mut self, iteration: impl Into<String>) -> Self {
        self.iteration = Some(iteration.into());
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

/// A single unit of work with one owning agent and a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub iteration: Option<String>,
    #[serde(default)]
    pub convoy_id: Option<ConvoyId>,
    pub status: TaskStatus,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub deliverable: Option<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub specification: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    /// Execution attempts against the per-task ceiling.
    #[serde(default)]
    pub attempts: IterationRecord,
    #[serde(default)]
    pub assigned_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub history: Vec<StatusTransition<TaskStatus>>,
}

impl Task {
    /// Build a task from its config with the given initial status.
    pub fn new(
        id: TaskId,
        config: TaskConfig,
        initial: TaskStatus,
        default_max_iterations: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let ceiling = config.max_iterations.unwrap_or(default_max_iterations);
        Self {
            id,
            name: config.name.trim().to_string(),
            description: config.description,
            iteration: config.iteration,
            convoy_id: config.convoy_id,
            status: initial,
            dependencies: config.dependencies,
            priority: config.priority,
            deliverable: config.deliverable,
            success_criteria: config.success_criteria,
            specification: config.specification,
            estimated_minutes: config.estimated_minutes,
            attempts: IterationRecord::new(ceiling),
            assigned_agent: None,
            created_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            history: vec![StatusTransition::new(None, initial, now, Some("created".into()))],
        }
    }

    pub fn depends_on(&self, id: &TaskId) -> bool {
        self.dependencies.contains(id)
    }

    /// Validate and apply a status change, appending to history.
    ///
    /// On an invalid transition the task is left untouched.
    pub fn transition(
        &mut self,
        to: TaskStatus,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::invalid_transition(
                EntityKind::Task,
                &self.id,
                self.status,
                to,
            ));
        }
        self.history
            .push(StatusTransition::new(Some(self.status), to, now, note));
        self.status = to;
        Ok(())
    }

    pub fn assign(&mut self, agent_type: &str, now: DateTime<Utc>) -> EngineResult<()> {
        self.transition(
            TaskStatus::Assigned,
            Some(format!("assigned to {agent_type}")),
            now,
        )?;
        self.assigned_agent = Some(agent_type.to_string());
        self.assigned_at = Some(now);
        Ok(())
    }

    /// Return an assigned task to the pending pool.
    pub fn unassign(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.transition(TaskStatus::Pending, Some("unassigned".into()), now)?;
        self.assigned_agent = None;
        self.assigned_at = None;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.transition(TaskStatus::InProgress, None, now)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, result: Option<String>, now: DateTime<Utc>) -> EngineResult<()> {
        self.transition(TaskStatus::Completed, None, now)?;
        self.completed_at = Some(now);
        self.result = result;
        self.error = None;
        Ok(())
    }

    /// Mark the task failed and count the attempt.
    ///
    /// Returns `true` when the attempt ceiling has been reached.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> EngineResult<bool> {
        self.transition(TaskStatus::Failed, Some(reason.to_string()), now)?;
        self.completed_at = Some(now);
        self.error = Some(reason.to_string());
        Ok(self.attempts.record(now))
    }

    pub fn cancel(&mut self, reason: Option<String>, now: DateTime<Utc>) -> EngineResult<()> {
        self.transition(TaskStatus::Cancelled, reason.clone(), now)?;
        self.completed_at = Some(now);
        if reason.is_some() {
            self.error = reason;
        }
        Ok(())
    }

    /// Put a failed task back into the pending pool, keeping its attempt count.
    pub fn retry(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.transition(TaskStatus::Pending, Some("retry".into()), now)?;
        self.assigned_agent = None;
        self.assigned_at = None;
        self.started_at = None;
        self.completed_at = None;
        self.result = None;
        self.error = None;
        Ok(())
    }

    pub fn block(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.transition(
            TaskStatus::Blocked,
            Some("waiting on dependencies".into()),
            now,
        )
    }

    pub fn unblock(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.transition(
            TaskStatus::Pending,
            Some("dependencies satisfied".into()),
            now,
        )
    }
}
