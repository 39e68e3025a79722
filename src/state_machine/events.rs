use serde::{Deserialize, Serialize};

/// Events that move a job through its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    /// Hand the job to the backend
    Submit,
    /// The backend started executing the job
    Dispatch,
    /// The cluster put a started job back into a waiting state (suspended, requeued)
    Requeue,
    /// The job completed successfully
    Succeed,
    /// The job ended unsuccessfully
    Fail(String),
    /// Termination was requested
    Stop,
    /// A just-succeeded job was reported to the caller
    Acknowledge,
    /// A status query produced nothing usable
    Lose,
    /// Start a new attempt of a failed job from scratch
    Reset,
}

impl JobEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Dispatch => "dispatch",
            Self::Requeue => "requeue",
            Self::Succeed => "succeed",
            Self::Fail(_) => "fail",
            Self::Stop => "stop",
            Self::Acknowledge => "acknowledge",
            Self::Lose => "lose",
            Self::Reset => "reset",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }
}
