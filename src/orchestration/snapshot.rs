//! Checkpoint layout of a run manager.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::dependencies::Dependency;
use crate::constants::CHECKPOINT_VERSION;
use crate::error::{Result, RunnerError};
use crate::pipeline::RunCase;
use crate::scheduler::{JobId, SchedulerSnapshot};

/// A case together with the jobs of its remaining stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseEntry {
    pub case: RunCase,
    /// One job per stage, starting at `first_stage`
    pub jobs: Vec<JobId>,
    /// Stages before this one were already finished when the case was restored
    pub first_stage: usize,
}

impl CaseEntry {
    pub fn job_for_stage(&self, stage: usize) -> Option<JobId> {
        stage
            .checked_sub(self.first_stage)
            .and_then(|index| self.jobs.get(index).copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManagerSnapshot {
    pub version: u32,
    pub stage_count: usize,
    pub max_pending_jobs: usize,
    pub cases: Vec<CaseEntry>,
    pub dependencies: BTreeMap<JobId, Vec<Dependency>>,
    pub dropped_jobs: BTreeSet<JobId>,
    pub scheduler: SchedulerSnapshot,
}

impl RunManagerSnapshot {
    /// Write as JSON through a temporary file so a crash never leaves half a checkpoint
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, json).map_err(|e| RunnerError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| RunnerError::io(path, e))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| RunnerError::io(path, e))?;
        let snapshot: Self = serde_json::from_str(&json)?;
        if snapshot.version > CHECKPOINT_VERSION {
            return Err(RunnerError::Checkpoint(format!(
                "checkpoint version {} is newer than supported version {CHECKPOINT_VERSION}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Every job id must exist in the restored backend
    pub fn check_job_ids(&self, job_count: usize) -> Result<()> {
        let referenced = self
            .cases
            .iter()
            .flat_map(|entry| entry.jobs.iter().copied())
            .chain(self.dependencies.keys().copied())
            .chain(
                self.dependencies
                    .values()
                    .flat_map(|deps| deps.iter().map(|dep| dep.job)),
            )
            .chain(self.dropped_jobs.iter().copied());

        for job in referenced {
            if job >= job_count {
                return Err(RunnerError::Checkpoint(format!(
                    "checkpoint references job {job} but the scheduler only has {job_count}"
                )));
            }
        }
        Ok(())
    }
}
