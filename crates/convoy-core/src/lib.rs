//! Domain types for durable task and convoy orchestration.
//!
//! Pure data and state machines; persistence lives in `convoy-db` and the
//! engines that drive these types live in `convoy-engine`.

pub mod agent;
pub mod approval;
pub mod budget;
pub mod config;
pub mod convoy;
pub mod error;
pub mod history;
pub mod id;
pub mod iteration;
pub mod rollback;
pub mod task;
pub mod telemetry;

pub use error::{EngineError, EngineResult, EntityKind};
