use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in an entity's append-only status history.
///
/// `from` is `None` only for the entry written at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition<S> {
    pub from: Option<S>,
    pub to: S,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl<S> StatusTransition<S> {
    pub fn new(from: Option<S>, to: S, at: DateTime<Utc>, note: Option<String>) -> Self {
        Self { from, to, at, note }
    }
}
