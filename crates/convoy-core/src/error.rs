//! Error taxonomy shared by every engine.
//!
//! Misuse (bad arguments, unknown ids) and invalid state transitions are
//! distinct variants so callers can tell "you asked for something
//! impossible" apart from "the entity is not in a state that allows this".

use std::fmt;
use thiserror::Error;

/// Kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Task,
    Convoy,
    Approval,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Task => write!(f, "task"),
            EntityKind::Convoy => write!(f, "convoy"),
            EntityKind::Approval => write!(f, "approval"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// A required field was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An id-based lookup referenced an entity that does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    /// The requested status change is not in the transition table.
    /// The entity is left unchanged.
    #[error("{kind} {id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        kind: EntityKind,
        id: String,
        from: String,
        to: String,
    },

    /// The transition is allowed in principle but a guard refused it.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Reading or writing the record store failed.
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    /// An external command (version control) failed.
    #[error("external command failed: {0}")]
    External(String),
}

impl EngineError {
    pub fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        kind: EntityKind,
        id: impl fmt::Display,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        EngineError::InvalidTransition {
            kind,
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, EngineError::InvalidTransition { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
