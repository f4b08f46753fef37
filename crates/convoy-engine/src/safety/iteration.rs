use super::SafetyControl;
use convoy_core::EngineResult;
use convoy_core::iteration::IterationRecord;
use convoy_core::task::TaskId;

// The task record owns the attempt counter; these read and advance it
// through the task engine.
impl SafetyControl {
    /// Whether the task may run again without exceeding its ceiling.
    pub fn check_iteration_limit(&self, task_id: &TaskId) -> EngineResult<bool> {
        let attempts = self.iteration_info(task_id)?;
        if !attempts.is_under_ceiling() {
            tracing::debug!(
                task_id = %task_id,
                count = attempts.count,
                ceiling = attempts.ceiling,
                "iteration ceiling reached"
            );
        }
        Ok(attempts.is_under_ceiling())
    }

    pub fn iteration_info(&self, task_id: &TaskId) -> EngineResult<IterationRecord> {
        Ok(self.tasks.get_task(task_id)?.attempts)
    }

    /// Count one iteration. Reaching the ceiling is logged, not enforced.
    pub fn increment_iteration(&self, task_id: &TaskId) -> EngineResult<IterationRecord> {
        let attempts = self.tasks.record_attempt(task_id)?;
        if attempts.count >= attempts.ceiling {
            tracing::warn!(
                task_id = %task_id,
                count = attempts.count,
                ceiling = attempts.ceiling,
                "task has reached its iteration ceiling"
            );
        } else {
            tracing::debug!(task_id = %task_id, count = attempts.count, "iteration recorded");
        }
        Ok(attempts)
    }

    pub fn reset_iterations(&self, task_id: &TaskId) -> EngineResult<IterationRecord> {
        self.tasks.reset_attempts(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::safety;
    use convoy_core::task::{TaskConfig, TaskId, TaskStatus};

    #[test]
    fn ceiling_is_advisory_and_shared_with_task_failures() {
        let (_dir, safety) = safety();
        let task = safety
            .tasks
            .create_task(TaskConfig::new("flaky").with_max_iterations(2))
            .unwrap();

        assert!(safety.check_iteration_limit(&task.id).unwrap());
        safety.increment_iteration(&task.id).unwrap();
        assert!(safety.check_iteration_limit(&task.id).unwrap());

        // A task failure advances the same counter.
        safety.tasks.assign_task(&task.id, "builder").unwrap();
        safety.tasks.start_task(&task.id).unwrap();
        safety.tasks.fail_task(&task.id, "tests failed").unwrap();
        assert!(!safety.check_iteration_limit(&task.id).unwrap());

        // Advisory: incrementing past the ceiling still succeeds.
        let info = safety.increment_iteration(&task.id).unwrap();
        assert_eq!(info.count, 3);

        let info = safety.reset_iterations(&task.id).unwrap();
        assert_eq!(info.count, 0);
        assert!(safety.check_iteration_limit(&task.id).unwrap());
        assert_eq!(safety.tasks.get_task(&task.id).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let (_dir, safety) = safety();
        assert!(safety
            .check_iteration_limit(&TaskId::from_seq(3))
            .unwrap_err()
            .is_not_found());
    }
}
