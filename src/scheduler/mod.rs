//! # Job Scheduler
//!
//! The contract every execution backend implements, plus the factory that picks
//! one from configuration.
//!
//! A backend owns its jobs in an arena and hands out [`JobId`]s, which are
//! plain indices that are never reused. All lifecycle changes go through the
//! shared [`JobStateMachine`](crate::state_machine::JobStateMachine), so the
//! success latch and the absorbing terminal states behave the same on every
//! backend.
//!
//! Two backends exist:
//! - [`LocalScheduler`] spawns processes on this host under a CPU budget
//! - [`ClusterScheduler`] drives an LSF-like workload manager through its CLI

pub mod cluster;
pub mod job;
pub mod local;
pub mod process;

pub use cluster::{ClusterJobSnapshot, ClusterScheduler, ClusterSnapshot, ClusterStatus};
pub use job::{JobId, JobRecord};
pub use local::{LocalScheduler, LocalSnapshot};
pub use process::{Process, SpawnSpec};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::error::{Result, RunnerError};
use crate::state_machine::JobState;

#[async_trait]
pub trait JobScheduler: Send {
    /// Register a job in state `NotSubmittedYet`. Stale markers of the script are removed.
    fn add_job(
        &mut self,
        cwd: &Path,
        command: &str,
        job_name: &str,
        cpus: usize,
        run_time_limit: Option<Duration>,
    ) -> Result<JobId>;

    /// Submit the job if it was not submitted yet, otherwise return its current state.
    ///
    /// Retry-worthy submission problems come back as `NotSubmittedYet`; an error
    /// means the submission was permanently rejected.
    async fn run(&mut self, job: JobId) -> Result<JobState>;

    /// Terminate a pending or running job; a no-op for jobs that are not in flight
    async fn stop(&mut self, job: JobId) -> Result<JobState>;

    /// Refresh and return the job state. A `JobSucceeded` answer is given once,
    /// the next poll reports `JobFinished`.
    async fn poll(&mut self, job: JobId) -> Result<JobState>;

    /// Last known state, without refreshing it
    fn state(&self, job: JobId) -> Result<JobState>;

    /// State implied by the markers on disk, without touching any process or cluster
    fn restore_job_state(&self, cwd: &Path, script_name: &str, job_name: &str) -> JobState {
        let state = job::state_from_markers(&cwd.join(script_name));
        tracing::debug!(job_name, script_name, state = %state, "Restored job state from markers");
        state
    }

    /// Pause between two polling rounds
    async fn sleep(&mut self, interval: Duration);

    /// True when the backend assigns CPUs itself and scripts must not request them
    fn cpus_number_by_scheduler(&self) -> bool;

    /// Backend handle as text (pid or external id), `"-1"` before submission
    fn scheduler_job_id(&self, job: JobId) -> Result<String>;

    fn job_name(&self, job: JobId) -> Result<String>;

    fn job_count(&self) -> usize;

    fn cluster_name(&self) -> &str;

    /// Whether a failed job may be submitted again from scratch
    fn has_runs_left(&self, _job: JobId) -> bool {
        false
    }

    /// Start a new attempt of a failed job
    async fn resubmit(&mut self, job: JobId) -> Result<JobState> {
        Err(RunnerError::InvalidJob(format!(
            "job {job} has no runs left on {}",
            self.cluster_name()
        )))
    }

    /// Serializable backend state for checkpoints
    fn snapshot(&self) -> SchedulerSnapshot;

    /// Terminate every live job; called on every exit path of the polling loop
    async fn shutdown(&mut self);
}

/// Checkpointed state of whichever backend was active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum SchedulerSnapshot {
    Local(LocalSnapshot),
    Cluster(ClusterSnapshot),
}

impl SchedulerSnapshot {
    /// Rebuild the backend described by this snapshot.
    ///
    /// The configured backend must match the one that wrote the snapshot.
    pub fn into_scheduler(self, config: &SchedulerConfig) -> Result<Box<dyn JobScheduler>> {
        match self {
            SchedulerSnapshot::Local(snapshot) => {
                if !config.is_local() {
                    return Err(RunnerError::Checkpoint(format!(
                        "checkpoint was written by the local backend, configuration selects '{}'",
                        config.cluster_name
                    )));
                }
                Ok(Box::new(LocalScheduler::from_snapshot(config, snapshot)))
            }
            SchedulerSnapshot::Cluster(snapshot) => {
                if config.is_local() || snapshot.cluster_name != config.cluster_name {
                    return Err(RunnerError::Checkpoint(format!(
                        "checkpoint was written for cluster '{}', configuration selects '{}'",
                        snapshot.cluster_name, config.cluster_name
                    )));
                }
                Ok(Box::new(ClusterScheduler::from_snapshot(config, snapshot)))
            }
        }
    }
}

/// Create the backend selected by `config.cluster_name`
pub fn create_scheduler(config: &SchedulerConfig) -> Result<Box<dyn JobScheduler>> {
    let scheduler: Box<dyn JobScheduler> = if config.is_local() {
        Box::new(LocalScheduler::new(config))
    } else {
        Box::new(ClusterScheduler::new(config))
    };
    info!(
        cluster_name = scheduler.cluster_name(),
        cpus_by_scheduler = scheduler.cpus_number_by_scheduler(),
        "Job scheduler created"
    );
    Ok(scheduler)
}
