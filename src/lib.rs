#![allow(clippy::doc_markdown)] // Allow technical terms like LSF, TMPDIR in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Basin Runner
//!
//! Job scheduling and pipeline orchestration for basin simulation scenarios.
//!
//! ## Overview
//!
//! A scenario is a set of cases, each a parameterized simulation that runs as an
//! ordered pipeline of stages. The run manager turns every stage into a job on a
//! scheduler backend, walks the jobs to completion, and avoids recomputing a
//! stage when an earlier case with the same parameters already produced it.
//!
//! ## Module Organization
//!
//! - [`scheduler`] - The `JobScheduler` contract with local and cluster backends
//! - [`orchestration`] - `RunManager`: scheduling, dependencies, polling loop, checkpoints
//! - [`pipeline`] - Cases, parameters, dependency levels and stage templates
//! - [`state_machine`] - Job lifecycle states and transitions
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use basin_runner::config::RunnerConfig;
//! use basin_runner::orchestration::{RunManager, RunOutcome};
//! use basin_runner::pipeline::{DependencyLevel, GenericStage, RunCase, StageTemplate};
//!
//! # tokio_test::block_on(async {
//! basin_runner::logging::init_structured_logging();
//!
//! let stages: Vec<Arc<dyn StageTemplate>> = vec![
//!     Arc::new(GenericStage::new("pt", "fastcauldron -project {project} -itcoupled", DependencyLevel::PtSolver)),
//!     Arc::new(GenericStage::new("genex", "fastcauldron -project {project} -genex", DependencyLevel::Genex)),
//! ];
//! let mut manager = RunManager::new(RunnerConfig::default(), stages)?;
//!
//! manager.schedule_case(
//!     RunCase::new("/scenario/Case_1/Project.project3d")
//!         .with_parameter("top_crust_hf", DependencyLevel::PtSolver, 60.0),
//! )?;
//!
//! let outcome = manager.run_scheduled_cases(Duration::from_secs(1)).await?;
//! assert_eq!(outcome, RunOutcome::Completed);
//! # Ok::<(), basin_runner::RunnerError>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod orchestration;
pub mod pipeline;
pub mod scheduler;
pub mod state_machine;

pub use config::{ConfigManager, RunnerConfig};
pub use error::{Result, RunnerError};
pub use orchestration::{RunManager, RunOutcome};
pub use pipeline::{CaseParameter, DependencyLevel, GenericStage, RunCase, StageTemplate};
pub use scheduler::{create_scheduler, JobId, JobScheduler};
pub use state_machine::{JobState, RunStatus};
