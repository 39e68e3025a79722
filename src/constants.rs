//! # System Constants
//!
//! File names, marker suffixes and retry bounds shared by the scheduler backends
//! and the run manager.

// Re-export state types for convenience
pub use crate::state_machine::{JobState, RunStatus};

/// Files the run manager and the generated stage scripts agree on
pub mod files {
    /// Presence of this file in the working directory aborts scenario execution
    pub const STOP_EXEC_FILE_NAME: &str = "stop_exec_scenario";

    /// Every accepted submission appends its backend handle (pid or external id) here
    pub const JOBS_ID_LIST_FILE_NAME: &str = "casa_jobs_list.txt";

    /// Written next to the stage script when the simulator returned 0
    pub const SUCCESS_MARKER_SUFFIX: &str = ".success";

    /// Written next to the stage script when the simulator returned non-zero
    pub const FAILED_MARKER_SUFFIX: &str = ".failed";

    /// Stage scripts are named `Stage_<index><suffix>`
    pub const STAGE_SCRIPT_PREFIX: &str = "Stage_";

    pub const STDOUT_SUFFIX: &str = ".out";
    pub const STDERR_SUFFIX: &str = ".err";
}

/// Bounds used by the backends
pub mod limits {
    /// Submission attempts before a transient infrastructure error becomes fatal
    pub const MAX_SUBMIT_ATTEMPTS: u32 = 30;

    /// Full runs of a failed cluster job before its case is failed
    pub const MAX_RUN_ATTEMPTS: u32 = 3;

    /// Cluster status polls in a row without a usable answer before it is a fatal error
    pub const MAX_UNKNOWN_POLLS: u32 = 10;

    /// Pause between polling rounds on a cluster, seconds
    pub const CLUSTER_POLL_INTERVAL_SECS: u64 = 10;

    /// Time a process group gets between SIGTERM and SIGKILL, milliseconds
    pub const KILL_GRACE_PERIOD_MS: u64 = 1000;

    /// Handle reported for jobs that have no backend handle yet
    pub const NO_HANDLE: &str = "-1";
}

/// Cluster name selecting the local process backend
pub const LOCAL_CLUSTER_NAME: &str = "LOCAL";

/// Current version of the checkpoint layout written by `RunManager::save`
pub const CHECKPOINT_VERSION: u32 = 1;

/// Groupings of job states used by the polling loop
pub mod status_groups {
    use super::JobState;

    /// States in which a job occupies the backend and must be stopped on abort
    pub const IN_FLIGHT_STATES: &[JobState] = &[JobState::JobPending, JobState::JobRunning];

    /// States after which a job never runs again within the same attempt
    pub const TERMINAL_STATES: &[JobState] = &[JobState::JobFinished, JobState::JobFailed];
}
