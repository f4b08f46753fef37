use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Length of one budget accounting window.
pub const BUDGET_WINDOW_SECS: i64 = 3600;

/// Default retention for individual cost entries.
pub const DEFAULT_COST_RETENTION_HOURS: i64 = 24;

/// Why spending is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseCause {
    /// The hourly limit was crossed. Lifted by approval or a new window.
    Budget,
    /// An operator paused spending. Lifted only by approval or resume.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub amount_usd: f64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Rolling hourly spend ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLedger {
    pub window_start: DateTime<Utc>,
    pub spent_this_hour: f64,
    pub hourly_limit_usd: f64,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub pause_reason: Option<String>,
    #[serde(default)]
    pub pause_cause: Option<PauseCause>,
    /// Trailing log of individual costs, pruned to the retention period.
    #[serde(default)]
    pub entries: Vec<CostEntry>,
}

impl BudgetLedger {
    pub fn new(hourly_limit_usd: f64, now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            spent_this_hour: 0.0,
            hourly_limit_usd,
            paused: false,
            pause_reason: None,
            pause_cause: None,
            entries: Vec::new(),
        }
    }

    pub fn window_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.window_start >= Duration::seconds(BUDGET_WINDOW_SECS)
    }

    /// Start a fresh window if the current one has elapsed.
    ///
    /// Resets spend to zero and lifts a budget-caused pause. Returns `true`
    /// if the window rolled.
    pub fn roll_window(&mut self, now: DateTime<Utc>) -> bool {
        if !self.window_expired(now) {
            return false;
        }
        self.window_start = now;
        self.spent_this_hour = 0.0;
        if self.pause_cause == Some(PauseCause::Budget) {
            self.resume();
        }
        true
    }

    pub fn remaining(&self) -> f64 {
        (self.hourly_limit_usd - self.spent_this_hour).max(0.0)
    }

    /// Whether `estimate` fits in the current window. Always `false` while paused.
    pub fn can_afford(&self, estimate: f64) -> bool {
        !self.paused && self.spent_this_hour + estimate <= self.hourly_limit_usd
    }

    /// Commit a cost. Returns `true` if this entry crossed the limit and
    /// paused spending.
    pub fn record(
        &mut self,
        amount_usd: f64,
        description: impl Into<String>,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> bool {
        self.entries.push(CostEntry {
            amount_usd,
            description: description.into(),
            timestamp: now,
        });
        self.spent_this_hour += amount_usd;
        self.prune(now, retention);

        if self.spent_this_hour > self.hourly_limit_usd && !self.paused {
            let reason = format!(
                "Hourly budget exceeded: ${:.2} spent of ${:.2} limit",
                self.spent_this_hour, self.hourly_limit_usd
            );
            self.pause(PauseCause::Budget, reason);
            return true;
        }
        false
    }

    /// Drop cost entries older than `retention`.
    pub fn prune(&mut self, now: DateTime<Utc>, retention: Duration) {
        let cutoff = now - retention;
        self.entries.retain(|e| e.timestamp >= cutoff);
    }

    pub fn pause(&mut self, cause: PauseCause, reason: impl Into<String>) {
        self.paused = true;
        self.pause_cause = Some(cause);
        self.pause_reason = Some(reason.into());
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.pause_cause = None;
        self.pause_reason = None;
    }

    /// Total spend across the retained cost log.
    pub fn spent_in_log(&self) -> f64 {
        self.entries.iter().map(|e| e.amount_usd).sum()
    }
}
