use super::SafetyControl;
use chrono::{DateTime, Duration, Utc};
use convoy_core::budget::{BUDGET_WINDOW_SECS, BudgetLedger, PauseCause};
use convoy_core::{EngineError, EngineResult};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub spent_this_hour: f64,
    pub hourly_limit_usd: f64,
    pub remaining: f64,
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub window_start: DateTime<Utc>,
    pub window_resets_at: DateTime<Utc>,
    pub entries_in_log: usize,
    pub spent_in_log: f64,
}

impl From<&BudgetLedger> for BudgetStatus {
    fn from(ledger: &BudgetLedger) -> Self {
        Self {
            spent_this_hour: ledger.spent_this_hour,
            hourly_limit_usd: ledger.hourly_limit_usd,
            remaining: ledger.remaining(),
            paused: ledger.paused,
            pause_reason: ledger.pause_reason.clone(),
            window_start: ledger.window_start,
            window_resets_at: ledger.window_start + Duration::seconds(BUDGET_WINDOW_SECS),
            entries_in_log: ledger.entries.len(),
            spent_in_log: ledger.spent_in_log(),
        }
    }
}

fn validate_amount(what: &str, amount: f64) -> EngineResult<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(EngineError::InvalidArgument(format!(
            "{what} must be a non-negative amount, got {amount}"
        )));
    }
    Ok(())
}

impl SafetyControl {
    /// Whether `estimated_cost` fits in the current hourly window.
    pub fn check_budget(&self, estimated_cost: f64) -> EngineResult<bool> {
        validate_amount("estimated cost", estimated_cost)?;
        self.with_ledger(|ledger, _| Ok(ledger.can_afford(estimated_cost)))
    }

    /// Commit spend. Crossing the hourly limit pauses operations.
    pub fn record_cost(&self, amount: f64, description: &str) -> EngineResult<BudgetStatus> {
        validate_amount("cost", amount)?;
        let retention = self.limits.cost_retention();
        let (status, paused_now) = self.with_ledger(|ledger, now| {
            let paused_now = ledger.record(amount, description, now, retention);
            Ok((BudgetStatus::from(&*ledger), paused_now))
        })?;
        tracing::info!(
            amount,
            description,
            spent = status.spent_this_hour,
            limit = status.hourly_limit_usd,
            "cost recorded"
        );
        if paused_now {
            tracing::warn!(
                spent = status.spent_this_hour,
                limit = status.hourly_limit_usd,
                "hourly budget exceeded, operations paused"
            );
        }
        Ok(status)
    }

    /// Snapshot after rolling an elapsed window. Nothing is written.
    pub fn budget_status(&self) -> EngineResult<BudgetStatus> {
        let mut ledger = self.store.budget.read()?;
        ledger.hourly_limit_usd = self.limits.hourly_budget_usd;
        ledger.roll_window(Utc::now());
        Ok(BudgetStatus::from(&ledger))
    }

    /// Manual pause. Only an approval or [`Self::resume_operations`] lifts it.
    pub fn pause_operations(&self, reason: &str) -> EngineResult<BudgetStatus> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::InvalidArgument("pause reason is required".into()));
        }
        let status = self.with_ledger(|ledger, _| {
            ledger.pause(PauseCause::Manual, reason);
            Ok(BudgetStatus::from(&*ledger))
        })?;
        tracing::warn!(reason, "operations paused");
        Ok(status)
    }

    pub fn resume_operations(&self) -> EngineResult<BudgetStatus> {
        let status = self.with_ledger(|ledger, _| {
            ledger.resume();
            Ok(BudgetStatus::from(&*ledger))
        })?;
        tracing::info!("operations resumed");
        Ok(status)
    }

    /// Read-modify-write the ledger under its lock, after syncing the
    /// configured limit and rolling an elapsed window.
    fn with_ledger<U>(
        &self,
        f: impl FnOnce(&mut BudgetLedger, DateTime<Utc>) -> EngineResult<U>,
    ) -> EngineResult<U> {
        let limit = self.limits.hourly_budget_usd;
        self.store.budget.update(|ledger| {
            let now = Utc::now();
            ledger.hourly_limit_usd = limit;
            if ledger.roll_window(now) {
                tracing::info!(window_start = %now, "budget window rolled over");
            }
            f(ledger, now)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::safety;
    use convoy_core::EngineError;

    #[test]
    fn crossing_the_limit_pauses() {
        let (_dir, safety) = safety();
        let status = safety.record_cost(6.0, "x").unwrap();
        assert!(!status.paused);
        assert!(safety.check_budget(4.0).unwrap());

        let status = safety.record_cost(5.0, "y").unwrap();
        assert!(status.paused);
        assert!(status.pause_reason.unwrap().contains("budget"));
        assert!(!safety.check_budget(0.01).unwrap());
        assert_eq!(safety.budget_status().unwrap().spent_this_hour, 11.0);
    }

    #[test]
    fn manual_pause_and_resume() {
        let (_dir, safety) = safety();
        safety.pause_operations("deploy freeze").unwrap();
        assert!(!safety.check_budget(0.0).unwrap());
        let status = safety.resume_operations().unwrap();
        assert!(!status.paused);
        assert!(safety.check_budget(1.0).unwrap());
    }

    #[test]
    fn negative_or_nan_amounts_are_rejected() {
        let (_dir, safety) = safety();
        assert!(matches!(
            safety.record_cost(-1.0, "refund").unwrap_err(),
            EngineError::InvalidArgument(_)
        ));
        assert!(matches!(
            safety.check_budget(f64::NAN).unwrap_err(),
            EngineError::InvalidArgument(_)
        ));
        assert!(matches!(
            safety.pause_operations(" ").unwrap_err(),
            EngineError::InvalidArgument(_)
        ));
    }
}
