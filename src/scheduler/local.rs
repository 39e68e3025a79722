//! # Local Scheduler
//!
//! Runs every job as a process group on this host.
//!
//! Jobs are admitted against a CPU budget: a submitted job waits in
//! `JobPending` until the CPUs charged to running jobs leave room for it.
//! Completion is read from the marker files the stage script writes once the
//! simulator returns. A process that exits without writing a marker counts as
//! failed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::System;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::job::{self, JobId, JobRecord};
use super::process::{Process, SpawnSpec};
use super::{JobScheduler, SchedulerSnapshot};
use crate::config::SchedulerConfig;
use crate::constants::{limits, LOCAL_CLUSTER_NAME};
use crate::error::{Result, RunnerError};
use crate::logging::log_job_operation;
use crate::state_machine::{JobEvent, JobState};

#[derive(Debug)]
struct LocalJob {
    record: JobRecord,
    process: Option<Process>,
    pid: Option<u32>,
    started_at: Option<Instant>,
}

impl LocalJob {
    fn new(record: JobRecord) -> Self {
        Self {
            record,
            process: None,
            pid: None,
            started_at: None,
        }
    }
}

/// Checkpointed local backend: job records only, processes do not survive a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub jobs: Vec<JobRecord>,
}

pub struct LocalScheduler {
    jobs: Vec<LocalJob>,
    max_cpus: usize,
    kill_grace_period: Duration,
    jobs_list_file: Option<PathBuf>,
}

impl LocalScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        let max_cpus = config.local.max_cpus.unwrap_or_else(detect_cpu_count).max(1);
        debug!(max_cpus, "Local scheduler CPU budget");
        Self {
            jobs: Vec::new(),
            max_cpus,
            kill_grace_period: config.local.kill_grace_period(),
            jobs_list_file: config.jobs_list_file.clone(),
        }
    }

    /// Rebuild from a checkpoint. Jobs that were in flight lost their process,
    /// their state is taken from the markers and unfinished ones run again.
    pub fn from_snapshot(config: &SchedulerConfig, snapshot: LocalSnapshot) -> Self {
        let mut scheduler = Self::new(config);
        scheduler.jobs = snapshot
            .jobs
            .into_iter()
            .map(|mut record| {
                if matches!(
                    record.state(),
                    JobState::JobPending | JobState::JobRunning | JobState::Unknown
                ) {
                    let restored = job::state_from_markers(&record.script_path());
                    debug!(
                        job_name = %record.name,
                        from = %record.state(),
                        to = %restored,
                        "Resolved in-flight job from markers"
                    );
                    record.restore_state(restored);
                } else if record.state() == JobState::JobSucceeded {
                    record.restore_state(JobState::JobFinished);
                }
                LocalJob::new(record)
            })
            .collect();
        scheduler
    }

    pub fn max_cpus(&self) -> usize {
        self.max_cpus
    }

    /// CPUs currently charged to running jobs
    pub fn running_cpus(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.record.state() == JobState::JobRunning)
            .map(|job| self.charged_cpus(&job.record))
            .sum()
    }

    fn charged_cpus(&self, record: &JobRecord) -> usize {
        record.cpus.clamp(1, self.max_cpus)
    }

    fn job(&self, id: JobId) -> Result<&LocalJob> {
        self.jobs
            .get(id)
            .ok_or_else(|| RunnerError::InvalidJob(format!("no local job with id {id}")))
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut LocalJob> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| RunnerError::InvalidJob(format!("no local job with id {id}")))
    }

    /// Spawn a pending job if the CPU budget allows it
    fn try_start(&mut self, id: JobId) -> Result<JobState> {
        let charge = self.charged_cpus(&self.job(id)?.record);
        let running = self.running_cpus();
        if running + charge > self.max_cpus {
            debug!(job_id = id, running, charge, max_cpus = self.max_cpus, "Waiting for CPUs");
            return Ok(JobState::JobPending);
        }

        let jobs_list_file = self.jobs_list_file.clone();
        let job = self.job_mut(id)?;
        job.record.submit_attempts += 1;
        let spec = SpawnSpec {
            cwd: &job.record.cwd,
            command: &job.record.command,
            stdout: job.record.stdout_path(),
            stderr: job.record.stderr_path(),
        };

        match Process::spawn(&spec) {
            Ok(process) => {
                let pid = process.pid();
                job.pid = Some(pid);
                job.process = Some(process);
                job.started_at = Some(Instant::now());
                let state = job.record.transition(JobEvent::Dispatch)?;
                job::record_submission(jobs_list_file.as_deref(), &pid.to_string());
                log_job_operation(
                    "start",
                    id,
                    &job.record.name,
                    Some(&pid.to_string()),
                    &state.to_string(),
                    None,
                );
                Ok(state)
            }
            Err(e) => {
                job.record
                    .transition(JobEvent::Fail(format!("failed to start: {e}")))?;
                Err(e)
            }
        }
    }

    /// Check a running job for exit and for an exceeded run time limit
    async fn refresh_running(&mut self, id: JobId) -> Result<()> {
        let grace = self.kill_grace_period;
        let job = self.job_mut(id)?;
        let Some(process) = job.process.as_mut() else {
            // Running without a process only happens after a restart
            let restored = job::state_from_markers(&job.record.script_path());
            let event = match restored {
                JobState::JobFinished => JobEvent::Succeed,
                _ => JobEvent::Fail("process lost".to_string()),
            };
            job.record.transition(event)?;
            return Ok(());
        };

        if !process.is_alive()? {
            let exit_status = process.exit_status();
            process.cleanup();
            job.process = None;

            let event = match job::read_marker(&job.record.script_path()) {
                Some(true) => JobEvent::Succeed,
                Some(false) => JobEvent::Fail("script reported failure".to_string()),
                None => {
                    warn!(
                        job_id = id,
                        job_name = %job.record.name,
                        exit_status = ?exit_status,
                        "Process exited without writing a marker, treating as failed"
                    );
                    JobEvent::Fail("no marker file after exit".to_string())
                }
            };
            let state = job.record.transition(event)?;
            log_job_operation(
                "complete",
                id,
                &job.record.name,
                job.pid.map(|pid| pid.to_string()).as_deref(),
                &state.to_string(),
                None,
            );
            return Ok(());
        }

        if let (Some(limit), Some(started_at)) = (job.record.run_time_limit, job.started_at) {
            if started_at.elapsed() > limit {
                warn!(
                    job_id = id,
                    job_name = %job.record.name,
                    limit_secs = limit.as_secs(),
                    "Run time limit exceeded, stopping job"
                );
                process.kill_group(grace).await?;
                process.cleanup();
                job.process = None;
                job.record.transition(JobEvent::Stop)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobScheduler for LocalScheduler {
    fn add_job(
        &mut self,
        cwd: &Path,
        command: &str,
        job_name: &str,
        cpus: usize,
        run_time_limit: Option<Duration>,
    ) -> Result<JobId> {
        let record = JobRecord::new(cwd, command, job_name, cpus, run_time_limit)?;
        if cpus > self.max_cpus {
            warn!(
                job_name,
                cpus,
                max_cpus = self.max_cpus,
                "Job requests more CPUs than available, it will run alone"
            );
        }
        job::remove_markers(&record.script_path())?;

        let id = self.jobs.len();
        self.jobs.push(LocalJob::new(record));
        debug!(job_id = id, job_name, cpus, "Added local job");
        Ok(id)
    }

    async fn run(&mut self, id: JobId) -> Result<JobState> {
        match self.job(id)?.record.state() {
            JobState::NotSubmittedYet => {
                self.job_mut(id)?.record.transition(JobEvent::Submit)?;
                self.try_start(id)
            }
            JobState::JobPending => self.try_start(id),
            state => Ok(state),
        }
    }

    async fn stop(&mut self, id: JobId) -> Result<JobState> {
        let grace = self.kill_grace_period;
        let job = self.job_mut(id)?;
        if !job.record.state().is_in_flight() && job.record.state() != JobState::Unknown {
            return Ok(job.record.state());
        }

        if let Some(mut process) = job.process.take() {
            let killed = process.kill_group(grace).await;
            process.cleanup();
            killed?;
        }
        let state = job.record.transition(JobEvent::Stop)?;
        log_job_operation(
            "stop",
            id,
            &job.record.name,
            job.pid.map(|pid| pid.to_string()).as_deref(),
            &state.to_string(),
            None,
        );
        Ok(state)
    }

    async fn poll(&mut self, id: JobId) -> Result<JobState> {
        match self.job(id)?.record.state() {
            JobState::JobPending => {
                self.try_start(id)?;
            }
            JobState::JobRunning | JobState::Unknown => {
                self.refresh_running(id).await?;
            }
            _ => {}
        }
        Ok(self.job_mut(id)?.record.observe())
    }

    fn state(&self, id: JobId) -> Result<JobState> {
        Ok(self.job(id)?.record.state())
    }

    async fn sleep(&mut self, interval: Duration) {
        if interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(interval).await;
        }
    }

    fn cpus_number_by_scheduler(&self) -> bool {
        false
    }

    fn scheduler_job_id(&self, id: JobId) -> Result<String> {
        Ok(self
            .job(id)?
            .pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| limits::NO_HANDLE.to_string()))
    }

    fn job_name(&self, id: JobId) -> Result<String> {
        Ok(self.job(id)?.record.name.clone())
    }

    fn job_count(&self) -> usize {
        self.jobs.len()
    }

    fn cluster_name(&self) -> &str {
        LOCAL_CLUSTER_NAME
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot::Local(LocalSnapshot {
            jobs: self.jobs.iter().map(|job| job.record.clone()).collect(),
        })
    }

    async fn shutdown(&mut self) {
        for id in 0..self.jobs.len() {
            if self.jobs[id].process.is_some() {
                if let Err(e) = self.stop(id).await {
                    warn!(job_id = id, error = %e, "Failed to stop job during shutdown");
                }
            }
        }
        info!(cluster_name = LOCAL_CLUSTER_NAME, "Local scheduler shut down");
    }
}

fn detect_cpu_count() -> usize {
    let sys = System::new_all();
    sys.cpus().len().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn scheduler(max_cpus: usize) -> LocalScheduler {
        let mut config = SchedulerConfig::default();
        config.local.max_cpus = Some(max_cpus);
        config.local.kill_grace_period_ms = 100;
        LocalScheduler::new(&config)
    }

    /// Script that optionally waits for a release file, then writes a marker
    fn write_stage(dir: &Path, name: &str, outcome: &str) {
        let path = dir.join(name);
        let body = match outcome {
            "success" => format!("touch {name}.success\n"),
            "failed" => format!("touch {name}.failed\nexit 1\n"),
            "hold" => format!("while [ ! -f release ]; do sleep 0.05; done\ntouch {name}.success\n"),
            "silent" => "exit 3\n".to_string(),
            _ => "sleep 30\n".to_string(),
        };
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    async fn poll_until_settled(scheduler: &mut LocalScheduler, id: JobId) -> JobState {
        for _ in 0..400 {
            let state = scheduler.poll(id).await.unwrap();
            if matches!(state, JobState::JobSucceeded | JobState::JobFinished | JobState::JobFailed) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {id} did not settle");
    }

    #[tokio::test]
    async fn test_success_latch() {
        let dir = tempfile::tempdir().unwrap();
        write_stage(dir.path(), "Stage_0.sh", "success");
        let mut scheduler = scheduler(2);

        let id = scheduler
            .add_job(dir.path(), "Stage_0.sh", "case_stage_0", 1, None)
            .unwrap();
        assert_eq!(scheduler.state(id).unwrap(), JobState::NotSubmittedYet);
        assert_eq!(scheduler.run(id).await.unwrap(), JobState::JobRunning);
        assert_ne!(scheduler.scheduler_job_id(id).unwrap(), "-1");

        assert_eq!(poll_until_settled(&mut scheduler, id).await, JobState::JobSucceeded);
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobFinished);
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobFinished);
    }

    #[tokio::test]
    async fn test_failed_marker() {
        let dir = tempfile::tempdir().unwrap();
        write_stage(dir.path(), "Stage_0.sh", "failed");
        let mut scheduler = scheduler(1);

        let id = scheduler
            .add_job(dir.path(), "Stage_0.sh", "case_stage_0", 1, None)
            .unwrap();
        scheduler.run(id).await.unwrap();
        assert_eq!(poll_until_settled(&mut scheduler, id).await, JobState::JobFailed);
    }

    #[tokio::test]
    async fn test_exit_without_marker_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_stage(dir.path(), "Stage_0.sh", "silent");
        let mut scheduler = scheduler(1);

        let id = scheduler
            .add_job(dir.path(), "Stage_0.sh", "case_stage_0", 1, None)
            .unwrap();
        scheduler.run(id).await.unwrap();
        assert_eq!(poll_until_settled(&mut scheduler, id).await, JobState::JobFailed);
    }

    #[tokio::test]
    async fn test_admission_respects_cpu_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(2);
        let mut ids = Vec::new();
        for i in 0..3 {
            let name = format!("Stage_{i}.sh");
            write_stage(dir.path(), &name, "hold");
            ids.push(
                scheduler
                    .add_job(dir.path(), &name, &format!("job_{i}"), 1, None)
                    .unwrap(),
            );
        }

        assert_eq!(scheduler.run(ids[0]).await.unwrap(), JobState::JobRunning);
        assert_eq!(scheduler.run(ids[1]).await.unwrap(), JobState::JobRunning);
        assert_eq!(scheduler.run(ids[2]).await.unwrap(), JobState::JobPending);
        assert_eq!(scheduler.running_cpus(), 2);
        assert_eq!(scheduler.poll(ids[2]).await.unwrap(), JobState::JobPending);

        std::fs::write(dir.path().join("release"), "").unwrap();
        poll_until_settled(&mut scheduler, ids[0]).await;
        poll_until_settled(&mut scheduler, ids[1]).await;
        assert!(scheduler.running_cpus() <= 2);
        assert_eq!(poll_until_settled(&mut scheduler, ids[2]).await, JobState::JobSucceeded);
    }

    #[tokio::test]
    async fn test_oversized_job_runs_alone() {
        let dir = tempfile::tempdir().unwrap();
        write_stage(dir.path(), "Stage_0.sh", "hold");
        write_stage(dir.path(), "Stage_1.sh", "hold");
        let mut scheduler = scheduler(2);

        let big = scheduler.add_job(dir.path(), "Stage_0.sh", "big", 16, None).unwrap();
        let small = scheduler.add_job(dir.path(), "Stage_1.sh", "small", 0, None).unwrap();

        assert_eq!(scheduler.run(big).await.unwrap(), JobState::JobRunning);
        assert_eq!(scheduler.run(small).await.unwrap(), JobState::JobPending);

        scheduler.shutdown().await;
        assert_eq!(scheduler.state(big).unwrap(), JobState::JobFailed);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_stage(dir.path(), "Stage_0.sh", "forever");
        let mut scheduler = scheduler(1);

        let id = scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();
        assert_eq!(scheduler.stop(id).await.unwrap(), JobState::NotSubmittedYet);

        scheduler.run(id).await.unwrap();
        assert_eq!(scheduler.stop(id).await.unwrap(), JobState::JobFailed);
        assert_eq!(scheduler.stop(id).await.unwrap(), JobState::JobFailed);
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobFailed);
    }

    #[tokio::test]
    async fn test_run_time_limit_stops_job() {
        let dir = tempfile::tempdir().unwrap();
        write_stage(dir.path(), "Stage_0.sh", "forever");
        let mut scheduler = scheduler(1);

        let id = scheduler
            .add_job(dir.path(), "Stage_0.sh", "job", 1, Some(Duration::from_millis(100)))
            .unwrap();
        scheduler.run(id).await.unwrap();
        assert_eq!(poll_until_settled(&mut scheduler, id).await, JobState::JobFailed);
    }

    #[tokio::test]
    async fn test_missing_executable_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(1);
        let id = scheduler
            .add_job(dir.path(), "no-such-stage-script-91c2", "job", 1, None)
            .unwrap();

        let err = scheduler.run(id).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(scheduler.state(id).unwrap(), JobState::JobFailed);
    }

    #[tokio::test]
    async fn test_add_job_clears_stale_markers() {
        let dir = tempfile::tempdir().unwrap();
        write_stage(dir.path(), "Stage_0.sh", "success");
        std::fs::write(dir.path().join("Stage_0.sh.success"), "").unwrap();
        std::fs::write(dir.path().join("Stage_0.sh.failed"), "").unwrap();

        let mut scheduler = scheduler(1);
        scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();
        assert!(!dir.path().join("Stage_0.sh.success").exists());
        assert!(!dir.path().join("Stage_0.sh.failed").exists());
    }

    #[tokio::test]
    async fn test_unknown_job_is_invalid() {
        let mut scheduler = scheduler(1);
        assert!(matches!(scheduler.poll(5).await, Err(RunnerError::InvalidJob(_))));
        assert!(matches!(scheduler.state(0), Err(RunnerError::InvalidJob(_))));
    }

    #[tokio::test]
    async fn test_snapshot_resolves_in_flight_jobs() {
        let dir = tempfile::tempdir().unwrap();
        write_stage(dir.path(), "Stage_0.sh", "hold");
        write_stage(dir.path(), "Stage_1.sh", "hold");
        let mut scheduler = scheduler(2);
        let done = scheduler.add_job(dir.path(), "Stage_0.sh", "done", 1, None).unwrap();
        let lost = scheduler.add_job(dir.path(), "Stage_1.sh", "lost", 1, None).unwrap();
        scheduler.run(done).await.unwrap();
        scheduler.run(lost).await.unwrap();

        let snapshot = scheduler.snapshot();
        scheduler.shutdown().await;
        std::fs::write(dir.path().join("Stage_0.sh.success"), "").unwrap();
        let _ = std::fs::remove_file(dir.path().join("Stage_1.sh.success"));

        let mut config = SchedulerConfig::default();
        config.local.max_cpus = Some(2);
        let restored = snapshot.into_scheduler(&config).unwrap();
        assert_eq!(restored.state(done).unwrap(), JobState::JobFinished);
        assert_eq!(restored.state(lost).unwrap(), JobState::NotSubmittedYet);
    }
}
