//! # Error Types
//!
//! One error enum for the whole run manager. Only non-recoverable conditions live here:
//! a transient submission problem is reported as `JobState::NotSubmittedYet`, and a job
//! that ends unsuccessfully is recorded on its case, neither is an error.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::state_machine::StateMachineError;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Submitting job {job_name} failed: {reason}")]
    Submission { job_name: String, reason: String },

    #[error("Querying state of job {job_name} failed: {reason}")]
    StatusQuery { job_name: String, reason: String },

    #[error("Stopping job {job_name} failed: {reason}")]
    Stop { job_name: String, reason: String },

    #[error("Process error for {command}: {reason}")]
    Process { command: String, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Wrong path: {0}")]
    WrongPath(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl RunnerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn submission(job_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Submission {
            job_name: job_name.into(),
            reason: reason.into(),
        }
    }

    pub fn status_query(job_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StatusQuery {
            job_name: job_name.into(),
            reason: reason.into(),
        }
    }

    pub fn stop(job_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Stop {
            job_name: job_name.into(),
            reason: reason.into(),
        }
    }

    pub fn process(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Process {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Errors that must abort the polling loop (after stopping every in-flight job).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::StateTransition(_)
                | Self::InvalidJob(_)
                | Self::Submission { .. }
                | Self::StatusQuery { .. }
                | Self::Process { .. }
                | Self::Io { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
