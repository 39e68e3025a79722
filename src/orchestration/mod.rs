//! # Orchestration
//!
//! The run manager and the pieces it is built from: cross-case dependencies,
//! progress counters and the checkpoint layout.

pub mod dependencies;
pub mod run_manager;
pub mod snapshot;
pub mod statistics;

pub use dependencies::{Dependency, DependencyKind, DependencyStatus};
pub use run_manager::{CaseId, RunManager, RunOutcome};
pub use snapshot::{CaseEntry, RunManagerSnapshot};
pub use statistics::JobCounters;
