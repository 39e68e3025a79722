//! # Pipeline Model
//!
//! Cases, their parameters and the stage templates a run manager turns into jobs.

pub mod case;
pub mod level;
pub mod stage;

pub use case::{CaseParameter, RunCase, NUMERIC_TOLERANCE};
pub use level::DependencyLevel;
pub use stage::{GenericStage, ScriptContext, StageTemplate};
