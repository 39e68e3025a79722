//! # Process
//!
//! A spawned stage script running in its own process group.
//!
//! The whole group is signalled on termination so simulators started by the
//! script go down with it. A private scratch directory is created under
//! `TMPDIR` (when set) and removed by [`Process::cleanup`].

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, RunnerError};

/// What to launch and where its output goes
#[derive(Debug, Clone)]
pub struct SpawnSpec<'a> {
    pub cwd: &'a Path,
    pub command: &'a str,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

#[derive(Debug)]
pub struct Process {
    child: Child,
    pid: u32,
    command: String,
    scratch_dir: Option<PathBuf>,
    exit_status: Option<ExitStatus>,
}

impl Process {
    pub fn spawn(spec: &SpawnSpec<'_>) -> Result<Self> {
        let mut tokens = spec.command.split_whitespace();
        let program = tokens
            .next()
            .ok_or_else(|| RunnerError::process(spec.command, "empty command line"))?;

        let program_path = spec.cwd.join(program);
        let program = if program_path.exists() {
            program_path
        } else {
            PathBuf::from(program)
        };

        let stdout = open_append(&spec.stdout)?;
        let stderr = open_append(&spec.stderr)?;

        let mut command = Command::new(&program);
        command
            .args(tokens)
            .current_dir(spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(true);

        let scratch_dir = match std::env::var_os("TMPDIR") {
            Some(tmp) if !tmp.is_empty() => {
                let dir = PathBuf::from(tmp).join(format!("basin_runner_{}", Uuid::new_v4()));
                std::fs::create_dir_all(&dir).map_err(|e| RunnerError::io(&dir, e))?;
                command.env("TMPDIR", &dir);
                Some(dir)
            }
            _ => None,
        };

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                if let Some(dir) = &scratch_dir {
                    let _ = std::fs::remove_dir_all(dir);
                }
                return Err(RunnerError::process(spec.command, e.to_string()));
            }
        };
        let pid = child
            .id()
            .ok_or_else(|| RunnerError::process(spec.command, "process exited before it got a pid"))?;

        debug!(pid, command = %spec.command, cwd = %spec.cwd.display(), "Spawned process group");

        Ok(Self {
            child,
            pid,
            command: spec.command.to_string(),
            scratch_dir,
            exit_status: None,
        })
    }

    /// Process id, which is also the process group id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Non-blocking check whether the group leader is still running
    pub fn is_alive(&mut self) -> Result<bool> {
        if self.exit_status.is_some() {
            return Ok(false);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                Ok(false)
            }
            Ok(None) => Ok(true),
            Err(e) => Err(RunnerError::process(&self.command, e.to_string())),
        }
    }

    /// Wait for exit at most `timeout`; `None` when the process is still running
    pub async fn wait(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit_status = Some(status);
                Ok(Some(status))
            }
            Ok(Err(e)) => Err(RunnerError::process(&self.command, e.to_string())),
            Err(_) => Ok(None),
        }
    }

    /// SIGTERM the whole group, then SIGKILL whatever survives the grace period
    pub async fn kill_group(&mut self, grace: Duration) -> Result<()> {
        let group = Pid::from_raw(self.pid as i32);

        if !self.signal_group(group, Signal::SIGTERM)? {
            self.reap().await;
            return Ok(());
        }

        if self.wait(grace).await?.is_none() {
            warn!(pid = self.pid, command = %self.command, "Process group ignored SIGTERM, killing");
        }
        // Children of the script may outlive the group leader
        self.signal_group(group, Signal::SIGKILL)?;
        self.reap().await;
        Ok(())
    }

    /// Remove the scratch directory, safe to call more than once
    pub fn cleanup(&mut self) {
        if let Some(dir) = self.scratch_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %e, "Could not remove scratch directory");
                }
            }
        }
    }

    /// Returns false when the group no longer exists
    fn signal_group(&self, group: Pid, signal: Signal) -> Result<bool> {
        match killpg(group, signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(RunnerError::process(
                &self.command,
                format!("failed to send {signal:?} to group {group}: {e}"),
            )),
        }
    }

    async fn reap(&mut self) {
        if self.exit_status.is_none() {
            if let Ok(status) = self.child.wait().await {
                self.exit_status = Some(status);
            }
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.exit_status.is_none() {
            let _ = killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL);
        }
        self.cleanup();
    }
}

fn open_append(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RunnerError::io(path, e))
}
