//! Cross-case job dependencies created by copy-reuse.

use serde::{Deserialize, Serialize};

use crate::scheduler::JobId;
use crate::state_machine::JobState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// The dependent job reads the output of the job it waits on; failure propagates
    Input,
    /// The job waited on reads this job's inputs; it only has to be done, successfully or not
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub job: JobId,
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn input(job: JobId) -> Self {
        Self {
            job,
            kind: DependencyKind::Input,
        }
    }

    pub fn release(job: JobId) -> Self {
        Self {
            job,
            kind: DependencyKind::Release,
        }
    }
}

/// What a not-yet-submitted job's dependencies allow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    Ready,
    Waiting,
    /// An input dependency failed for good, the dependent can never run
    Failed(JobId),
}

/// Observed condition of one job a dependency points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upstream {
    /// Removed from its case when the case failed
    Dropped,
    /// Failed but the backend will give it another run
    Retrying,
    Live(JobState),
}

impl Dependency {
    /// Evaluate a single edge
    pub(crate) fn status(&self, upstream: Upstream) -> DependencyStatus {
        match (self.kind, upstream) {
            (_, Upstream::Retrying) => DependencyStatus::Waiting,
            (DependencyKind::Input, Upstream::Dropped) => DependencyStatus::Failed(self.job),
            (DependencyKind::Input, Upstream::Live(JobState::JobFailed)) => {
                DependencyStatus::Failed(self.job)
            }
            (DependencyKind::Input, Upstream::Live(state)) if state.satisfies_dependencies() => {
                DependencyStatus::Ready
            }
            (DependencyKind::Release, Upstream::Dropped) => DependencyStatus::Ready,
            (DependencyKind::Release, Upstream::Live(state)) if state.has_ended() => {
                DependencyStatus::Ready
            }
            _ => DependencyStatus::Waiting,
        }
    }
}

/// Combine edge results: any failure wins, then any wait
pub(crate) fn combine(statuses: impl IntoIterator<Item = DependencyStatus>) -> DependencyStatus {
    let mut combined = DependencyStatus::Ready;
    for status in statuses {
        match status {
            DependencyStatus::Failed(_) => return status,
            DependencyStatus::Waiting => combined = DependencyStatus::Waiting,
            DependencyStatus::Ready => {}
        }
    }
    combined
}
