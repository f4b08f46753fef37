//! Human-approval requests gating paused operations.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default lifetime of an unresolved approval request.
pub const DEFAULT_APPROVAL_TTL_HOURS: i64 = 24;

/// Context key carrying the task an iteration approval refers to.
pub const TASK_ID_CONTEXT_KEY: &str = "task_id";

/// What an approval request is about. Drives the side effect of approving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalCategory {
    Budget,
    Iteration,
    Rollback,
    Other,
}

impl ApprovalCategory {
    /// Fallback classification from free-form reason text.
    pub fn infer(reason: &str) -> Self {
        let reason = reason.to_lowercase();
        if reason.contains("budget") {
            ApprovalCategory::Budget
        } else if reason.contains("iteration") {
            ApprovalCategory::Iteration
        } else if reason.contains("rollback") {
            ApprovalCategory::Rollback
        } else {
            ApprovalCategory::Other
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApprovalCategory::Budget => "budget",
            ApprovalCategory::Iteration => "iteration",
            ApprovalCategory::Rollback => "rollback",
            ApprovalCategory::Other => "other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            ApprovalCategory::Budget,
            ApprovalCategory::Iteration,
            ApprovalCategory::Rollback,
            ApprovalCategory::Other,
        ]
        .into_iter()
        .find(|c| c.label() == label)
    }
}

impl fmt::Display for ApprovalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Expired,
        ]
        .into_iter()
        .find(|s| s.label() == label)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub reason: String,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    pub category: ApprovalCategory,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewer_notes: Option<String>,
    /// Lifetime of the request while pending.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,
}

fn default_ttl_secs() -> i64 {
    DEFAULT_APPROVAL_TTL_HOURS * 3600
}

impl ApprovalRequest {
    pub fn new(
        reason: impl Into<String>,
        context: BTreeMap<String, serde_json::Value>,
        category: Option<ApprovalCategory>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let reason = reason.into();
        let category = category.unwrap_or_else(|| ApprovalCategory::infer(&reason));
        Self {
            id: format!("approval-{}", uuid::Uuid::now_v7().simple()),
            reason,
            context,
            category,
            status: ApprovalStatus::Pending,
            created_at: now,
            resolved_at: None,
            reviewer_notes: None,
            ttl_secs: ttl.num_seconds(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.ttl_secs)
    }

    /// Mark a pending request expired once its TTL has passed.
    /// Returns `true` if the status changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ApprovalStatus::Pending && now >= self.expires_at() {
            self.status = ApprovalStatus::Expired;
            self.resolved_at = Some(now);
            return true;
        }
        false
    }

    pub fn resolve(
        &mut self,
        approved: bool,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if self.status != ApprovalStatus::Pending {
            return Err(EngineError::Precondition(format!(
                "approval {} is already {}",
                self.id, self.status
            )));
        }
        self.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.resolved_at = Some(now);
        self.reviewer_notes = notes;
        Ok(())
    }

    /// Task id carried in the context, for iteration approvals.
    pub fn task_id(&self) -> Option<&str> {
        self.context
            .get(TASK_ID_CONTEXT_KEY)
            .or_else(|| self.context.get("taskId"))
            .and_then(|v| v.as_str())
    }
}

/// On-disk shape of `pending-approval.json`: an array of requests, or a
/// single request object written by older versions.
#[derive(Deserialize)]
#[serde(untagged)]
enum ApprovalFile {
    Many(Vec<ApprovalRequest>),
    Single(Box<ApprovalRequest>),
}

/// All approval requests, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ApprovalFile", into = "Vec<ApprovalRequest>")]
pub struct ApprovalQueue {
    pub requests: Vec<ApprovalRequest>,
}

impl From<ApprovalFile> for ApprovalQueue {
    fn from(file: ApprovalFile) -> Self {
        let requests = match file {
            ApprovalFile::Many(requests) => requests,
            ApprovalFile::Single(request) => vec![*request],
        };
        Self { requests }
    }
}

impl From<ApprovalQueue> for Vec<ApprovalRequest> {
    fn from(queue: ApprovalQueue) -> Self {
        queue.requests
    }
}

impl ApprovalQueue {
    pub fn get(&self, id: &str) -> Option<&ApprovalRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ApprovalRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }

    pub fn push(&mut self, request: ApprovalRequest) {
        self.requests.push(request);
    }

    /// Expire every overdue pending request. Returns how many changed.
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for request in &mut self.requests {
            if request.expire_if_due(now) {
                expired += 1;
            }
        }
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .count()
    }
}
