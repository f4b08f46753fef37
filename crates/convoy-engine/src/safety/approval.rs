use super::SafetyControl;
use chrono::Utc;
use convoy_core::approval::{ApprovalCategory, ApprovalRequest, ApprovalStatus};
use convoy_core::task::TaskId;
use convoy_core::{EngineError, EngineResult, EntityKind};
use std::collections::BTreeMap;

impl SafetyControl {
    /// Queue a request for human sign-off. Without an explicit category it
    /// is inferred from the reason text.
    pub fn request_human_approval(
        &self,
        reason: &str,
        context: BTreeMap<String, serde_json::Value>,
        category: Option<ApprovalCategory>,
    ) -> EngineResult<ApprovalRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::InvalidArgument("approval reason is required".into()));
        }
        let request = ApprovalRequest::new(
            reason,
            context,
            category,
            self.limits.approval_ttl(),
            Utc::now(),
        );
        let created = request.clone();
        self.store.approvals.update(|queue| {
            queue.push(request);
            Ok::<_, EngineError>(())
        })?;
        tracing::warn!(
            approval_id = %created.id,
            category = %created.category,
            reason,
            "human approval requested"
        );
        Ok(created)
    }

    /// Current state of a request. Overdue pending requests expire here.
    pub fn get_approval_status(&self, id: &str) -> EngineResult<ApprovalRequest> {
        let now = Utc::now();
        let queue = self.store.approvals.read()?;
        let request = queue
            .get(id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Approval, id))?;
        if request.status != ApprovalStatus::Pending || now < request.expires_at() {
            return Ok(request.clone());
        }

        let expired = self.store.approvals.update(|queue| {
            queue.expire_due(now);
            queue
                .get(id)
                .cloned()
                .ok_or_else(|| EngineError::not_found(EntityKind::Approval, id))
        })?;
        tracing::info!(approval_id = id, "approval request expired");
        Ok(expired)
    }

    /// All requests, optionally restricted to one status, oldest first.
    pub fn list_approvals(&self, status: Option<ApprovalStatus>) -> EngineResult<Vec<ApprovalRequest>> {
        let now = Utc::now();
        let queue = self.store.approvals.read()?;
        let queue = if queue.requests.iter().any(|r| {
            r.status == ApprovalStatus::Pending && now >= r.expires_at()
        }) {
            self.store.approvals.update(|queue| {
                let expired = queue.expire_due(now);
                tracing::info!(expired, "expired overdue approval requests");
                Ok::<_, EngineError>(queue.clone())
            })?
        } else {
            queue
        };
        Ok(queue
            .requests
            .into_iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .collect())
    }

    /// Approve or reject a pending request. Approval lifts whatever the
    /// request was gating: a budget pause, or a task's iteration count.
    pub fn resolve_approval(
        &self,
        id: &str,
        approved: bool,
        notes: Option<String>,
    ) -> EngineResult<ApprovalRequest> {
        let now = Utc::now();
        let resolved = self.store.approvals.update(|queue| {
            queue.expire_due(now);
            let request = queue
                .get_mut(id)
                .ok_or_else(|| EngineError::not_found(EntityKind::Approval, id))?;
            request.resolve(approved, notes, now)?;
            Ok::<_, EngineError>(request.clone())
        })?;
        tracing::info!(
            approval_id = id,
            approved,
            category = %resolved.category,
            "approval resolved"
        );

        if approved {
            self.apply_approval(&resolved);
        }
        Ok(resolved)
    }

    fn apply_approval(&self, request: &ApprovalRequest) {
        match request.category {
            ApprovalCategory::Budget => {
                if let Err(e) = self.resume_operations() {
                    tracing::error!(approval_id = %request.id, error = %e, "failed to lift budget pause");
                }
            }
            ApprovalCategory::Iteration => match request.task_id() {
                Some(task_id) => {
                    if let Err(e) = self.reset_iterations(&TaskId::from(task_id)) {
                        tracing::error!(approval_id = %request.id, task_id, error = %e, "failed to reset iterations");
                    }
                }
                None => {
                    tracing::warn!(approval_id = %request.id, "iteration approval carries no task id");
                }
            },
            ApprovalCategory::Rollback | ApprovalCategory::Other => {}
        }
    }
}
