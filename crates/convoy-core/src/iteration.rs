use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default ceiling on execution attempts per task.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Per-task counter of execution attempts against a fixed ceiling.
///
/// This is the single authoritative attempt counter: it lives on the task
/// record, is advanced by task failures and by the safety iteration guard,
/// and is reset only by an approved iteration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub count: u32,
    pub ceiling: u32,
    #[serde(default)]
    pub first_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_at: Option<DateTime<Utc>>,
}

impl Default for IterationRecord {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl IterationRecord {
    pub fn new(ceiling: u32) -> Self {
        Self {
            count: 0,
            ceiling,
            first_at: None,
            last_at: None,
        }
    }

    /// Whether another attempt is still allowed.
    pub fn is_under_ceiling(&self) -> bool {
        self.count < self.ceiling
    }

    pub fn remaining(&self) -> u32 {
        self.ceiling.saturating_sub(self.count)
    }

    /// Advance the counter. Returns `true` once the ceiling has been reached.
    ///
    /// Recording past the ceiling is allowed; enforcement is up to callers
    /// that check [`is_under_ceiling`](Self::is_under_ceiling) first.
    pub fn record(&mut self, now: DateTime<Utc>) -> bool {
        self.count = self.count.saturating_add(1);
        self.first_at.get_or_insert(now);
        self.last_at = Some(now);
        !self.is_under_ceiling()
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.first_at = None;
        self.last_at = None;
    }
}
