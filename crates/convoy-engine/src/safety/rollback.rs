use super::SafetyControl;
use chrono::Utc;
use convoy_core::rollback::RollbackRecord;
use convoy_core::{EngineError, EngineResult};

impl SafetyControl {
    /// Reset the working tree by one revision and log the outcome.
    ///
    /// A failing version-control command yields a record with
    /// `success == false`; only storage failures are returned as errors.
    pub fn rollback(&self, reason: &str) -> EngineResult<RollbackRecord> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::InvalidArgument("rollback reason is required".into()));
        }
        tracing::warn!(reason, "rollback requested");

        let mut record = RollbackRecord {
            timestamp: Utc::now(),
            reason: reason.to_string(),
            success: false,
            before_revision: None,
            after_revision: None,
            changed_files: Vec::new(),
            message: String::new(),
        };
        match self.reset_one_revision(&mut record) {
            Ok(()) => {
                record.success = true;
                record.message = format!("rolled back {} file(s)", record.changed_files.len());
                tracing::info!(
                    before = record.before_revision.as_deref().unwrap_or(""),
                    after = record.after_revision.as_deref().unwrap_or(""),
                    files = record.changed_files.len(),
                    "rollback complete"
                );
            }
            Err(e) => {
                record.message = e.to_string();
                tracing::error!(error = %e, "rollback failed");
            }
        }

        let cap = self.limits.rollback_log_cap;
        let logged = record.clone();
        self.store.rollbacks.update(|log| {
            log.push(logged, cap);
            Ok::<_, EngineError>(())
        })?;
        Ok(record)
    }

    fn reset_one_revision(&self, record: &mut RollbackRecord) -> EngineResult<()> {
        let before = self.vcs.head_revision()?;
        record.before_revision = Some(before.clone());
        self.vcs.reset_previous()?;
        let after = self.vcs.head_revision()?;
        record.after_revision = Some(after.clone());
        record.changed_files = self.vcs.changed_files(&after, &before)?;
        Ok(())
    }

    /// Logged rollbacks, newest last.
    pub fn rollback_log(&self) -> EngineResult<Vec<RollbackRecord>> {
        Ok(self.store.rollbacks.read()?.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{FakeVcs, safety, safety_with};
    use crate::vcs::GitCli;
    use convoy_core::config::SafetyLimits;

    #[test]
    fn successful_rollback_is_logged() {
        let (_dir, safety) = safety();
        let record = safety.rollback("bad merge").unwrap();
        assert!(record.success);
        assert_eq!(record.before_revision.as_deref(), Some("b2"));
        assert_eq!(record.after_revision.as_deref(), Some("a1"));
        assert_eq!(record.changed_files, vec!["a1..b2.txt".to_string()]);

        let log = safety.rollback_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].reason, "bad merge");
    }

    #[test]
    fn failing_command_is_reported_not_raised() {
        let mut vcs = FakeVcs::new(&["a1", "b2"]);
        vcs.fail_reset = true;
        let (_dir, safety) = safety_with(SafetyLimits::default(), Box::new(vcs));
        let record = safety.rollback("broken build").unwrap();
        assert!(!record.success);
        assert_eq!(record.before_revision.as_deref(), Some("b2"));
        assert!(record.after_revision.is_none());
        assert!(record.message.contains("reset refused"));
        assert_eq!(safety.rollback_log().unwrap().len(), 1);
    }

    #[test]
    fn missing_binary_is_a_failed_record() {
        let (_dir, safety) = safety_with(
            SafetyLimits::default(),
            Box::new(GitCli::new("no-such-vcs-binary", ".")),
        );
        let record = safety.rollback("try it").unwrap();
        assert!(!record.success);
        assert!(record.before_revision.is_none());
    }

    #[test]
    fn log_is_capped() {
        let limits = SafetyLimits {
            rollback_log_cap: 3,
            ..SafetyLimits::default()
        };
        let (_dir, safety) = safety_with(limits, Box::new(FakeVcs::new(&["only"])));
        for i in 0..5 {
            safety.rollback(&format!("attempt {i}")).unwrap();
        }
        let log = safety.rollback_log().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].reason, "attempt 2");
        assert_eq!(log[2].reason, "attempt 4");
    }
}
