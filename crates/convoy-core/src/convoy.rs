use crate::error::{EngineError, EngineResult, EntityKind};
use crate::history::StatusTransition;
use crate::id::{format_sequence, parse_sequence};
use crate::task::{TaskConfig, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every convoy id (`convoy-001`).
pub const CONVOY_PREFIX: &str = "convoy";

/// Unique convoy identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConvoyId(pub String);

impl ConvoyId {
    pub fn from_seq(n: u64) -> Self {
        Self(format_sequence(CONVOY_PREFIX, n))
    }

    pub fn seq(&self) -> Option<u64> {
        parse_sequence(&self.0, CONVOY_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConvoyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConvoyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::str::FromStr for ConvoyId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ConvoyId(s.to_string()))
    }
}

/// Convoy status.
///
/// Transitions:
///   Pending -> InProgress | Blocked | Cancelled
///   Blocked -> Pending | InProgress | Cancelled
///   InProgress -> Completed | Failed | Cancelled
///   Failed -> Pending (retry)
///   Completed, Cancelled are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConvoyStatus {
    Pending,
    Blocked,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ConvoyStatus {
    pub const ALL: [ConvoyStatus; 6] = [
        ConvoyStatus::Pending,
        ConvoyStatus::Blocked,
        ConvoyStatus::InProgress,
        ConvoyStatus::Completed,
        ConvoyStatus::Failed,
        ConvoyStatus::Cancelled,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ConvoyStatus::Pending => "pending",
            ConvoyStatus::Blocked => "blocked",
            ConvoyStatus::InProgress => "in-progress",
            ConvoyStatus::Completed => "completed",
            ConvoyStatus::Failed => "failed",
            ConvoyStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }

    pub fn allowed_next(&self) -> &'static [ConvoyStatus] {
        use ConvoyStatus::*;
        match self {
            Pending => &[InProgress, Blocked, Cancelled],
            Blocked => &[Pending, InProgress, Cancelled],
            InProgress => &[Completed, Failed, Cancelled],
            Failed => &[Pending],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: ConvoyStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl fmt::Display for ConvoyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Aggregate view of member-task state.
///
/// Always recomputed from the member tasks; the copy written to disk is a
/// convenience for readers and is never deserialized back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvoyProgress {
    pub total: usize,
    pub pending: usize,
    pub blocked: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Member ids that no longer resolve to a task record.
    pub missing: usize,
    pub all_tasks_complete: bool,
}

impl ConvoyProgress {
    /// Tally member statuses. `None` marks a member whose record is missing.
    pub fn from_statuses(statuses: impl IntoIterator<Item = Option<TaskStatus>>) -> Self {
        let mut p = ConvoyProgress::default();
        for status in statuses {
            p.total += 1;
            match status {
                Some(TaskStatus::Pending) => p.pending += 1,
                Some(TaskStatus::Blocked) => p.blocked += 1,
                Some(TaskStatus::Assigned) => p.assigned += 1,
                Some(TaskStatus::InProgress) => p.in_progress += 1,
                Some(TaskStatus::Completed) => p.completed += 1,
                Some(TaskStatus::Failed) => p.failed += 1,
                Some(TaskStatus::Cancelled) => p.cancelled += 1,
                None => p.missing += 1,
            }
        }
        p.all_tasks_complete = p.total > 0 && p.completed == p.total;
        p
    }

    /// Whether any member task is currently being worked on.
    pub fn has_running(&self) -> bool {
        self.in_progress > 0
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 * 100.0 / self.total as f64
    }
}

/// Caller-supplied description of a convoy to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvoyConfig {
    pub name: String,
    pub description: String,
    pub iteration: Option<String>,
    pub dependencies: Vec<ConvoyId>,
    /// Existing tasks to adopt as members.
    pub task_ids: Vec<TaskId>,
    /// Tasks to create as members, stamped with the new convoy id.
    pub tasks: Vec<TaskConfig>,
    pub priority: i32,
    pub agent_type: Option<String>,
    pub deliverables: Vec<String>,
    pub completion_criteria: Vec<String>,
}

impl ConvoyConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = ConvoyId>) -> Self {
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
}

/// A named group of tasks with its own dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Convoy {
    pub id: ConvoyId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub iteration: Option<String>,
    pub status: ConvoyStatus,
    #[serde(default)]
    pub dependencies: Vec<ConvoyId>,
    #[serde(default)]
    pub tasks: Vec<TaskId>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub completion_criteria: Vec<String>,
    #[serde(default, skip_deserializing)]
    pub progress: ConvoyProgress,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub history: Vec<StatusTransition<ConvoyStatus>>,
}

impl Convoy {
    pub fn new(
        id: ConvoyId,
        config: ConvoyConfig,
        tasks: Vec<TaskId>,
        initial: ConvoyStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: config.name.trim().to_string(),
            description: config.description,
            iteration: config.iteration,
            status: initial,
            dependencies: config.dependencies,
            tasks,
            priority: config.priority,
            agent_type: config.agent_type,
            deliverables: config.deliverables,
            completion_criteria: config.completion_criteria,
            progress: ConvoyProgress::default(),
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            history: vec![StatusTransition::new(None, initial, now, Some("created".into()))],
        }
    }

    pub fn depends_on(&self, id: &ConvoyId) -> bool {
        self.dependencies.contains(id)
    }

    pub fn has_member(&self, id: &TaskId) -> bool {
        self.tasks.contains(id)
    }

    /// Validate and apply a status change, appending to history.
    pub fn transition(
        &mut self,
        to: ConvoyStatus,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::invalid_transition(
                EntityKind::Convoy,
                &self.id,
                self.status,
                to,
            ));
        }
        self.history
            .push(StatusTransition::new(Some(self.status), to, now, note));
        self.status = to;
        match to {
            ConvoyStatus::InProgress => {
                self.started_at.get_or_insert(now);
            }
            ConvoyStatus::Completed | ConvoyStatus::Cancelled | ConvoyStatus::Failed => {
                self.completed_at = Some(now);
            }
            ConvoyStatus::Pending | ConvoyStatus::Blocked => {}
        }
        Ok(())
    }

    /// Put a failed convoy back to pending.
    pub fn retry(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.transition(ConvoyStatus::Pending, Some("retry".into()), now)?;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
        Ok(())
    }
}
