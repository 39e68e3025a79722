use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::status_groups;

/// Lifecycle of a single job as tracked by a scheduler backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Registered with the backend, never handed to the OS or cluster
    NotSubmittedYet,
    /// Accepted by the backend, waiting for CPUs or a cluster slot
    JobPending,
    /// Executing
    JobRunning,
    /// Just completed successfully; reads as `JobFinished` from the next poll on
    JobSucceeded,
    /// Completed successfully and already reported once
    JobFinished,
    /// Ended unsuccessfully, was stopped, or could not be started
    JobFailed,
    /// The backend could not determine the state
    Unknown,
}

impl JobState {
    /// Check if this is a terminal state (no further transitions within an attempt)
    pub fn is_terminal(&self) -> bool {
        status_groups::TERMINAL_STATES.contains(self)
    }

    /// Check if the job currently occupies the backend
    pub fn is_in_flight(&self) -> bool {
        status_groups::IN_FLIGHT_STATES.contains(self)
    }

    /// Check if this job satisfies dependencies of other jobs
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::JobSucceeded | Self::JobFinished)
    }

    /// Check if the job reached any end of its run, successful or not
    pub fn has_ended(&self) -> bool {
        matches!(self, Self::JobSucceeded | Self::JobFinished | Self::JobFailed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSubmittedYet => write!(f, "not_submitted_yet"),
            Self::JobPending => write!(f, "pending"),
            Self::JobRunning => write!(f, "running"),
            Self::JobSucceeded => write!(f, "succeeded"),
            Self::JobFinished => write!(f, "finished"),
            Self::JobFailed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_submitted_yet" => Ok(Self::NotSubmittedYet),
            "pending" => Ok(Self::JobPending),
            "running" => Ok(Self::JobRunning),
            "succeeded" => Ok(Self::JobSucceeded),
            "finished" => Ok(Self::JobFinished),
            "failed" => Ok(Self::JobFailed),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::NotSubmittedYet
    }
}

/// Status of a whole case (one pipeline of jobs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotSubmitted,
    Scheduled,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSubmitted => write!(f, "not_submitted"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_submitted" => Ok(Self::NotSubmitted),
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {s}")),
        }
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::NotSubmitted
    }
}
