//! Backend-independent part of a tracked job and the marker-file protocol.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::files;
use crate::error::{Result, RunnerError};
use crate::state_machine::{JobEvent, JobState, JobStateMachine};

/// Stable handle of a job inside one backend, an index into its job arena
pub type JobId = usize;

/// Everything a backend needs to know about a job besides its private handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub cwd: PathBuf,
    pub command: String,
    pub name: String,
    pub cpus: usize,
    pub run_time_limit: Option<Duration>,
    pub submit_attempts: u32,
    machine: JobStateMachine,
}

impl JobRecord {
    pub fn new(
        cwd: &Path,
        command: &str,
        name: &str,
        cpus: usize,
        run_time_limit: Option<Duration>,
    ) -> Result<Self> {
        if command.split_whitespace().next().is_none() {
            return Err(RunnerError::InvalidJob(format!(
                "job '{name}' has an empty command"
            )));
        }
        if name.trim().is_empty() {
            return Err(RunnerError::InvalidJob(format!(
                "job for command '{command}' has an empty name"
            )));
        }

        Ok(Self {
            cwd: cwd.to_path_buf(),
            command: command.to_string(),
            name: name.to_string(),
            cpus,
            run_time_limit,
            submit_attempts: 0,
            machine: JobStateMachine::new(),
        })
    }

    pub fn state(&self) -> JobState {
        self.machine.current_state()
    }

    pub fn transition(&mut self, event: JobEvent) -> Result<JobState> {
        Ok(self.machine.transition(event)?)
    }

    /// Current state with the success latch consumed
    pub fn observe(&mut self) -> JobState {
        self.machine.observe()
    }

    /// Overwrite the state, only used when rebuilding a backend from a snapshot
    pub(crate) fn restore_state(&mut self, state: JobState) {
        self.machine = JobStateMachine::from_state(state);
    }

    /// Script the command executes; marker files are written next to it
    pub fn script_path(&self) -> PathBuf {
        let program = self.command.split_whitespace().next().unwrap_or_default();
        self.cwd.join(program)
    }

    pub fn command_tokens(&self) -> impl Iterator<Item = &str> {
        self.command.split_whitespace()
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.cwd.join(format!("{}{}", self.name, files::STDOUT_SUFFIX))
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.cwd.join(format!("{}{}", self.name, files::STDERR_SUFFIX))
    }
}

/// `<script>.success` / `<script>.failed`
pub fn marker_path(script: &Path, suffix: &str) -> PathBuf {
    let mut name = script.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Outcome recorded by a stage script, `None` while no marker has been written
pub fn read_marker(script: &Path) -> Option<bool> {
    if marker_path(script, files::SUCCESS_MARKER_SUFFIX).exists() {
        Some(true)
    } else if marker_path(script, files::FAILED_MARKER_SUFFIX).exists() {
        Some(false)
    } else {
        None
    }
}

/// Terminal state implied by the markers next to `script`
pub fn state_from_markers(script: &Path) -> JobState {
    match read_marker(script) {
        Some(true) => JobState::JobFinished,
        Some(false) => JobState::JobFailed,
        None => JobState::NotSubmittedYet,
    }
}

pub fn remove_markers(script: &Path) -> Result<()> {
    for suffix in [files::SUCCESS_MARKER_SUFFIX, files::FAILED_MARKER_SUFFIX] {
        let marker = marker_path(script, suffix);
        match std::fs::remove_file(&marker) {
            Ok(()) => debug!(marker = %marker.display(), "Removed stale marker"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RunnerError::io(marker, e)),
        }
    }
    Ok(())
}

/// Append a backend handle to the jobs-list file, if one is configured
pub fn record_submission(jobs_list_file: Option<&Path>, handle: &str) {
    let Some(path) = jobs_list_file else {
        return;
    };
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{handle}"));
    if let Err(e) = written {
        // The list is informational, a write failure must not fail the submission
        warn!(path = %path.display(), error = %e, "Could not record job handle");
    }
}
