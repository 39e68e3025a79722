use serde::{Deserialize, Serialize};

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::JobEvent,
    states::JobState,
};

/// Per-job state holder that only allows the legal lifecycle transitions.
///
/// Both backends keep one of these in every job record, so the lifecycle rules
/// (absorbing terminal states, the success latch, no shortcut from
/// `NotSubmittedYet` to a finished state) are enforced in one place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStateMachine {
    state: JobState,
}

impl JobStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a machine from a persisted state
    pub fn from_state(state: JobState) -> Self {
        Self { state }
    }

    pub fn current_state(&self) -> JobState {
        self.state
    }

    /// Attempt to transition the job state
    pub fn transition(&mut self, event: JobEvent) -> StateMachineResult<JobState> {
        let target = Self::determine_target_state(self.state, &event)?;
        if target != self.state {
            tracing::trace!(
                from = %self.state,
                to = %target,
                event = event.event_type(),
                "Job state transition"
            );
        }
        self.state = target;
        Ok(target)
    }

    /// Report the state to a caller, consuming the success latch.
    ///
    /// A job that just succeeded is reported as `JobSucceeded` exactly once; the
    /// machine moves to `JobFinished` so every later observation reads finished.
    pub fn observe(&mut self) -> JobState {
        let observed = self.state;
        if observed == JobState::JobSucceeded {
            self.state = JobState::JobFinished;
        }
        observed
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: JobState,
        event: &JobEvent,
    ) -> StateMachineResult<JobState> {
        use JobState::*;

        let target = match (current_state, event) {
            (NotSubmittedYet, JobEvent::Submit) => JobPending,

            (JobPending | JobRunning | Unknown, JobEvent::Dispatch) => JobRunning,
            (JobPending | JobRunning | Unknown, JobEvent::Requeue) => JobPending,

            (JobPending | JobRunning | Unknown, JobEvent::Succeed) => JobSucceeded,
            (JobPending | JobRunning | Unknown, JobEvent::Fail(_)) => JobFailed,

            // Stop is idempotent for jobs that are not in flight
            (JobPending | JobRunning | Unknown, JobEvent::Stop) => JobFailed,
            (state @ (NotSubmittedYet | JobSucceeded | JobFinished | JobFailed), JobEvent::Stop) => {
                state
            }

            (JobSucceeded | JobFinished, JobEvent::Acknowledge) => JobFinished,

            (JobPending | JobRunning | Unknown, JobEvent::Lose) => Unknown,

            (JobFailed, JobEvent::Reset) => NotSubmittedYet,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                });
            }
        };

        Ok(target)
    }
}
