use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of rollback records kept in the log.
pub const DEFAULT_ROLLBACK_LOG_CAP: usize = 50;

/// Outcome of one rollback attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub success: bool,
    #[serde(default)]
    pub before_revision: Option<String>,
    #[serde(default)]
    pub after_revision: Option<String>,
    #[serde(default)]
    pub changed_files: Vec<String>,
    pub message: String,
}

/// Bounded rollback history, newest last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RollbackLog {
    pub entries: Vec<RollbackRecord>,
}

impl RollbackLog {
    /// Append a record and prune the oldest entries past `cap`.
    pub fn push(&mut self, record: RollbackRecord, cap: usize) {
        self.entries.push(record);
        if self.entries.len() > cap {
            let excess = self.entries.len() - cap;
            self.entries.drain(..excess);
        }
    }

    pub fn last(&self) -> Option<&RollbackRecord> {
        self.entries.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> RollbackRecord {
        RollbackRecord {
            timestamp: Utc::now(),
            reason: format!("r{n}"),
            success: true,
            before_revision: None,
            after_revision: None,
            changed_files: vec![],
            message: String::new(),
        }
    }

    #[test]
    fn oldest_entries_pruned_past_cap() {
        let mut log = RollbackLog::default();
        for n in 0..5 {
            log.push(record(n), 3);
        }
        let reasons: Vec<_> = log.entries.iter().map(|r| r.reason.as_str()).collect();
        assert_eq!(reasons, vec!["r2", "r3", "r4"]);
        assert_eq!(log.last().unwrap().reason, "r4");
    }

    #[test]
    fn serializes_as_plain_array() {
        let mut log = RollbackLog::default();
        log.push(record(0), 10);
        let value = serde_json::to_value(&log).unwrap();
        assert!(value.is_array());
    }
}
