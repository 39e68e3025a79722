use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state_machine::JobState;

/// Aggregate job counts over every scheduled case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: usize,
    pub not_submitted: usize,
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
    pub failed: usize,
}

impl JobCounters {
    pub fn record(&mut self, state: JobState) {
        self.total += 1;
        match state {
            JobState::NotSubmittedYet => self.not_submitted += 1,
            JobState::JobPending => self.pending += 1,
            // A job the backend lost track of is still considered in flight
            JobState::JobRunning | JobState::Unknown => self.running += 1,
            JobState::JobSucceeded | JobState::JobFinished => self.finished += 1,
            JobState::JobFailed => self.failed += 1,
        }
    }

    pub fn submitted(&self) -> usize {
        self.total - self.not_submitted
    }

    pub(crate) fn log(&self) {
        info!(
            total = self.total,
            submitted = self.submitted(),
            not_submitted = self.not_submitted,
            pending = self.pending,
            running = self.running,
            finished = self.finished,
            failed = self.failed,
            timestamp = %Utc::now().to_rfc3339(),
            "📊 Job progress"
        );
    }
}

impl FromIterator<JobState> for JobCounters {
    fn from_iter<I: IntoIterator<Item = JobState>>(states: I) -> Self {
        let mut counters = Self::default();
        for state in states {
            counters.record(state);
        }
        counters
    }
}
