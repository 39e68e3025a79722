//! # Cluster Scheduler
//!
//! Drives an LSF-like workload manager through its command line tools.
//!
//! Submission, status queries and kills each run one external command; the
//! textual status is mapped onto [`JobState`]. Transient infrastructure errors
//! during submission are answered with `NotSubmittedYet` so the polling loop
//! retries on its next tick, until the configured attempt cap is reached.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::job::{self, JobId, JobRecord};
use super::{JobScheduler, SchedulerSnapshot};
use crate::config::{ClusterConfig, SchedulerConfig};
use crate::constants::limits;
use crate::error::{Result, RunnerError};
use crate::logging::log_job_operation;
use crate::state_machine::{JobEvent, JobState};

/// Job status as reported by the workload manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Done,
    Running,
    Pending,
    Exited,
    Unknown,
}

impl ClusterStatus {
    /// Parse `bjobs -noheader -o stat` output
    pub fn parse(text: &str) -> Self {
        let status = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or_default()
            .to_ascii_uppercase();

        match status.as_str() {
            "DONE" => Self::Done,
            "RUN" => Self::Running,
            "PEND" | "PSUSP" | "USUSP" | "SSUSP" | "WAIT" | "PROV" => Self::Pending,
            "EXIT" => Self::Exited,
            _ => Self::Unknown,
        }
    }

    fn event(self) -> JobEvent {
        match self {
            Self::Done => JobEvent::Succeed,
            Self::Running => JobEvent::Dispatch,
            Self::Pending => JobEvent::Requeue,
            Self::Exited => JobEvent::Fail("workload manager reported EXIT".to_string()),
            Self::Unknown => JobEvent::Lose,
        }
    }
}

/// Extract the job id from submission output such as
/// `Job <1234> is submitted to queue <normal>.`
pub fn parse_submission_id(stdout: &str) -> Option<String> {
    stdout.split('<').skip(1).find_map(|chunk| {
        let (candidate, _) = chunk.split_once('>')?;
        (!candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()))
            .then(|| candidate.to_string())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterJobSnapshot {
    pub record: JobRecord,
    pub external_id: Option<String>,
    pub runs_left: u32,
    /// Consecutive polls without a usable status
    #[serde(default)]
    pub unknown_polls: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub cluster_name: String,
    pub jobs: Vec<ClusterJobSnapshot>,
}

pub struct ClusterScheduler {
    cluster_name: String,
    config: ClusterConfig,
    jobs: Vec<ClusterJobSnapshot>,
    jobs_list_file: Option<PathBuf>,
}

impl ClusterScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            cluster_name: config.cluster_name.clone(),
            config: config.cluster.clone(),
            jobs: Vec::new(),
            jobs_list_file: config.jobs_list_file.clone(),
        }
    }

    /// Rebuild from a checkpoint; submitted jobs keep their external ids and
    /// are polled again, since cluster jobs outlive this process.
    pub fn from_snapshot(config: &SchedulerConfig, snapshot: ClusterSnapshot) -> Self {
        let mut scheduler = Self::new(config);
        scheduler.jobs = snapshot
            .jobs
            .into_iter()
            .map(|mut job| {
                if job.record.state() == JobState::JobSucceeded {
                    job.record.restore_state(JobState::JobFinished);
                }
                job
            })
            .collect();
        scheduler
    }

    fn job(&self, id: JobId) -> Result<&ClusterJobSnapshot> {
        self.jobs.get(id).ok_or_else(|| {
            RunnerError::InvalidJob(format!("no job with id {id} on {}", self.cluster_name))
        })
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut ClusterJobSnapshot> {
        let cluster_name = &self.cluster_name;
        self.jobs.get_mut(id).ok_or_else(|| {
            RunnerError::InvalidJob(format!("no job with id {id} on {cluster_name}"))
        })
    }

    fn submit_args(&self, record: &JobRecord) -> Vec<String> {
        let mut args = vec![
            "-P".to_string(),
            self.config.project_name.clone(),
            "-J".to_string(),
            record.name.clone(),
            "-o".to_string(),
            record.stdout_path().display().to_string(),
            "-e".to_string(),
            record.stderr_path().display().to_string(),
            "-n".to_string(),
            record.cpus.max(1).to_string(),
            "-cwd".to_string(),
            record.cwd.display().to_string(),
        ];
        if let Some(request) = &self.config.resource_request {
            args.push("-R".to_string());
            args.push(request.clone());
        }
        if let Some(limit) = record.run_time_limit {
            // -W takes whole minutes
            let minutes = limit.as_secs().div_ceil(60).max(1);
            args.push("-W".to_string());
            args.push(minutes.to_string());
        }
        args.extend(record.command_tokens().map(str::to_string));
        args
    }

    fn is_transient(&self, text: &str) -> bool {
        self.config
            .transient_error_patterns
            .iter()
            .any(|pattern| text.contains(pattern.as_str()))
    }

    async fn submit(&mut self, id: JobId) -> Result<JobState> {
        let max_attempts = self.config.max_submit_attempts;
        let job = self.job_mut(id)?;
        job.record.submit_attempts += 1;
        let attempt = job.record.submit_attempts;
        let record = job.record.clone();

        if attempt > max_attempts {
            return Err(RunnerError::submission(
                &record.name,
                format!("no successful submission after {max_attempts} attempts"),
            ));
        }

        let args = self.submit_args(&record);
        debug!(job_id = id, job_name = %record.name, attempt, ?args, "Submitting job");
        let output = run_command(&self.config.submit_command, &args, Some(&record.cwd))
            .await
            .map_err(|e| RunnerError::submission(&record.name, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            if let Some(external_id) = parse_submission_id(&stdout) {
                job::record_submission(self.jobs_list_file.as_deref(), &external_id);
                let job = self.job_mut(id)?;
                job.external_id = Some(external_id.clone());
                let state = job.record.transition(JobEvent::Submit)?;
                log_job_operation(
                    "submit",
                    id,
                    &record.name,
                    Some(&external_id),
                    &state.to_string(),
                    None,
                );
                return Ok(state);
            }
        }

        let message = format!("{} {}", stdout.trim(), stderr.trim());
        let message = message.trim();
        if self.is_transient(message) {
            warn!(
                job_id = id,
                job_name = %record.name,
                attempt,
                max_attempts,
                output = %message,
                "Transient submission failure, will retry"
            );
            return Ok(JobState::NotSubmittedYet);
        }

        Err(RunnerError::submission(
            &record.name,
            if message.is_empty() {
                format!("{} exited with {}", self.config.submit_command, output.status)
            } else {
                message.to_string()
            },
        ))
    }

    async fn query(&mut self, id: JobId, external_id: &str) -> Result<()> {
        let max_unknown_polls = self.config.max_unknown_polls;
        let (name, script) = {
            let record = &self.job(id)?.record;
            (record.name.clone(), record.script_path())
        };
        let args = ["-noheader", "-o", "stat", external_id].map(str::to_string);
        let output = run_command(&self.config.status_command, &args, None)
            .await
            .map_err(|e| RunnerError::status_query(&name, e))?;

        let status = if output.status.success() {
            ClusterStatus::parse(&String::from_utf8_lossy(&output.stdout))
        } else {
            ClusterStatus::Unknown
        };

        let event = if status == ClusterStatus::Unknown {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Jobs drop out of the manager's history; the markers still tell the outcome
            match job::read_marker(&script) {
                Some(true) => {
                    debug!(job_id = id, job_name = %name, external_id, "Status unavailable, success marker found");
                    JobEvent::Succeed
                }
                Some(false) => JobEvent::Fail(format!(
                    "status unavailable ({}), failure marker found",
                    stderr.trim()
                )),
                None => {
                    let job = self.job_mut(id)?;
                    job.unknown_polls += 1;
                    let unknown_polls = job.unknown_polls;
                    warn!(
                        job_id = id,
                        job_name = %name,
                        external_id,
                        unknown_polls,
                        max_unknown_polls,
                        stderr = %stderr.trim(),
                        "Could not determine job status"
                    );
                    if unknown_polls >= max_unknown_polls {
                        return Err(RunnerError::status_query(
                            &name,
                            format!(
                                "status of job {external_id} unknown for {unknown_polls} consecutive polls"
                            ),
                        ));
                    }
                    JobEvent::Lose
                }
            }
        } else {
            status.event()
        };

        let job = self.job_mut(id)?;
        if !matches!(event, JobEvent::Lose) {
            job.unknown_polls = 0;
        }
        let before = job.record.state();
        let after = job.record.transition(event)?;
        if before != after && after.has_ended() {
            log_job_operation(
                "complete",
                id,
                &name,
                Some(external_id),
                &after.to_string(),
                None,
            );
        }
        Ok(())
    }
}

#[async_trait]
impl JobScheduler for ClusterScheduler {
    fn add_job(
        &mut self,
        cwd: &Path,
        command: &str,
        job_name: &str,
        cpus: usize,
        run_time_limit: Option<Duration>,
    ) -> Result<JobId> {
        let record = JobRecord::new(cwd, command, job_name, cpus, run_time_limit)?;
        job::remove_markers(&record.script_path())?;

        let id = self.jobs.len();
        self.jobs.push(ClusterJobSnapshot {
            record,
            external_id: None,
            runs_left: self.config.max_run_attempts.saturating_sub(1),
            unknown_polls: 0,
        });
        debug!(job_id = id, job_name, cpus, cluster = %self.cluster_name, "Added cluster job");
        Ok(id)
    }

    async fn run(&mut self, id: JobId) -> Result<JobState> {
        match self.job(id)?.record.state() {
            JobState::NotSubmittedYet => self.submit(id).await,
            state => Ok(state),
        }
    }

    async fn stop(&mut self, id: JobId) -> Result<JobState> {
        let job = self.job(id)?;
        let state = job.record.state();
        if !state.is_in_flight() && state != JobState::Unknown {
            return Ok(state);
        }
        let name = job.record.name.clone();

        if let Some(external_id) = job.external_id.clone() {
            let args = [external_id.clone()];
            let output = run_command(&self.config.kill_command, &args, None)
                .await
                .map_err(|e| RunnerError::stop(&name, e))?;
            if !output.status.success() {
                // Usually the job ended between the last poll and the kill
                warn!(
                    job_id = id,
                    job_name = %name,
                    external_id = %external_id,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Kill command reported an error"
                );
            }
        }

        let job = self.job_mut(id)?;
        let state = job.record.transition(JobEvent::Stop)?;
        log_job_operation(
            "stop",
            id,
            &name,
            job.external_id.as_deref(),
            &state.to_string(),
            None,
        );
        Ok(state)
    }

    async fn poll(&mut self, id: JobId) -> Result<JobState> {
        let job = self.job(id)?;
        // Finished and failed jobs are not queried again
        if matches!(
            job.record.state(),
            JobState::JobPending | JobState::JobRunning | JobState::Unknown
        ) {
            if let Some(external_id) = job.external_id.clone() {
                self.query(id, &external_id).await?;
            }
        }
        Ok(self.job_mut(id)?.record.observe())
    }

    fn state(&self, id: JobId) -> Result<JobState> {
        Ok(self.job(id)?.record.state())
    }

    async fn sleep(&mut self, interval: Duration) {
        tokio::time::sleep(interval.max(self.config.poll_interval())).await;
    }

    fn cpus_number_by_scheduler(&self) -> bool {
        true
    }

    fn scheduler_job_id(&self, id: JobId) -> Result<String> {
        Ok(self
            .job(id)?
            .external_id
            .clone()
            .unwrap_or_else(|| limits::NO_HANDLE.to_string()))
    }

    fn job_name(&self, id: JobId) -> Result<String> {
        Ok(self.job(id)?.record.name.clone())
    }

    fn job_count(&self) -> usize {
        self.jobs.len()
    }

    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn has_runs_left(&self, id: JobId) -> bool {
        self.jobs.get(id).is_some_and(|job| job.runs_left > 0)
    }

    async fn resubmit(&mut self, id: JobId) -> Result<JobState> {
        let job = self.job_mut(id)?;
        if job.runs_left == 0 {
            return Err(RunnerError::InvalidJob(format!(
                "job {} has no runs left",
                job.record.name
            )));
        }
        job.record.transition(JobEvent::Reset)?;
        job.runs_left -= 1;
        job.external_id = None;
        job.record.submit_attempts = 0;
        job.unknown_polls = 0;
        job::remove_markers(&job.record.script_path())?;
        info!(
            job_id = id,
            job_name = %job.record.name,
            runs_left = job.runs_left,
            "Resubmitting failed job"
        );
        self.submit(id).await
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot::Cluster(ClusterSnapshot {
            cluster_name: self.cluster_name.clone(),
            jobs: self.jobs.clone(),
        })
    }

    async fn shutdown(&mut self) {
        for id in 0..self.jobs.len() {
            if self.jobs[id].record.state().is_in_flight() {
                if let Err(e) = self.stop(id).await {
                    warn!(job_id = id, error = %e, "Failed to stop job during shutdown");
                }
            }
        }
        info!(cluster_name = %self.cluster_name, "Cluster scheduler shut down");
    }
}

async fn run_command(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
) -> std::result::Result<Output, String> {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command
        .output()
        .await
        .map_err(|e| format!("cannot run {program}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ClusterStatus::parse("DONE\n"), ClusterStatus::Done);
        assert_eq!(ClusterStatus::parse("  RUN  "), ClusterStatus::Running);
        for pending in ["PEND", "PSUSP", "USUSP", "SSUSP", "WAIT", "PROV"] {
            assert_eq!(ClusterStatus::parse(pending), ClusterStatus::Pending);
        }
        assert_eq!(ClusterStatus::parse("EXIT"), ClusterStatus::Exited);
        assert_eq!(ClusterStatus::parse("UNKWN"), ClusterStatus::Unknown);
        assert_eq!(ClusterStatus::parse("ZOMBI"), ClusterStatus::Unknown);
        assert_eq!(ClusterStatus::parse(""), ClusterStatus::Unknown);
        assert_eq!(ClusterStatus::parse("\n\nexit\n"), ClusterStatus::Exited);
    }

    #[test]
    fn test_submission_id_parsing() {
        assert_eq!(
            parse_submission_id("Job <1234> is submitted to queue <normal>."),
            Some("1234".to_string())
        );
        assert_eq!(
            parse_submission_id("Job <abc> is submitted to queue <42>."),
            Some("42".to_string())
        );
        assert_eq!(parse_submission_id("Request aborted by esub."), None);
        assert_eq!(parse_submission_id("Job <> queued"), None);
    }

    fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn scheduler(dir: &Path, bsub_body: &str) -> ClusterScheduler {
        let mut config = SchedulerConfig {
            cluster_name: "LSF".to_string(),
            ..SchedulerConfig::default()
        };
        config.cluster.submit_command = fake_tool(dir, "bsub", bsub_body);
        config.cluster.status_command = fake_tool(dir, "bjobs", &format!("cat {}/status", dir.display()));
        config.cluster.kill_command = fake_tool(dir, "bkill", &format!("echo killed $1 >> {}/killed", dir.display()));
        config.cluster.max_submit_attempts = 2;
        config.cluster.poll_interval_secs = 0;
        ClusterScheduler::new(&config)
    }

    #[test]
    fn test_submit_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "exit 0");
        scheduler.config.resource_request = Some("select[mem>4000]".to_string());
        let id = scheduler
            .add_job(dir.path(), "Stage_0.sh", "a_stage_0", 4, Some(Duration::from_secs(90)))
            .unwrap();

        let args = scheduler.submit_args(&scheduler.job(id).unwrap().record);
        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[position("-J") + 1], "a_stage_0");
        assert_eq!(args[position("-n") + 1], "4");
        assert_eq!(args[position("-R") + 1], "select[mem>4000]");
        assert_eq!(args[position("-W") + 1], "2");
        assert_eq!(args.last().unwrap(), "Stage_0.sh");
    }

    #[tokio::test]
    async fn test_submit_poll_and_latch() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "echo 'Job <777> is submitted to queue <normal>.'");
        let id = scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();

        assert_eq!(scheduler.run(id).await.unwrap(), JobState::JobPending);
        assert_eq!(scheduler.scheduler_job_id(id).unwrap(), "777");

        std::fs::write(dir.path().join("status"), "RUN\n").unwrap();
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobRunning);

        std::fs::write(dir.path().join("status"), "DONE\n").unwrap();
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobSucceeded);

        // Finished jobs are not queried again, a bogus status changes nothing
        std::fs::write(dir.path().join("status"), "EXIT\n").unwrap();
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobFinished);
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobFinished);
    }

    #[tokio::test]
    async fn test_unknown_status_holds_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "echo 'Job <5> is submitted to queue <normal>.'");
        let id = scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();
        scheduler.run(id).await.unwrap();

        std::fs::write(dir.path().join("status"), "UNKWN\n").unwrap();
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::Unknown);
        std::fs::write(dir.path().join("status"), "RUN\n").unwrap();
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobRunning);
    }

    fn forget_jobs(scheduler: &mut ClusterScheduler, dir: &Path) {
        scheduler.config.status_command = fake_tool(
            dir,
            "bjobs_gone",
            "echo \"Job <$4> is not found\" >&2\nexit 255",
        );
    }

    #[tokio::test]
    async fn test_vanished_job_resolves_from_markers() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "echo 'Job <42> is submitted to queue <normal>.'");
        forget_jobs(&mut scheduler, dir.path());
        let done = scheduler.add_job(dir.path(), "Stage_0.sh", "done", 1, None).unwrap();
        let failed = scheduler.add_job(dir.path(), "Stage_1.sh", "failed", 1, None).unwrap();
        scheduler.run(done).await.unwrap();
        scheduler.run(failed).await.unwrap();

        std::fs::write(dir.path().join("Stage_0.sh.success"), "").unwrap();
        std::fs::write(dir.path().join("Stage_1.sh.failed"), "").unwrap();

        assert_eq!(scheduler.poll(done).await.unwrap(), JobState::JobSucceeded);
        assert_eq!(scheduler.poll(done).await.unwrap(), JobState::JobFinished);
        assert_eq!(scheduler.poll(failed).await.unwrap(), JobState::JobFailed);
    }

    #[tokio::test]
    async fn test_unknown_status_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "echo 'Job <42> is submitted to queue <normal>.'");
        forget_jobs(&mut scheduler, dir.path());
        scheduler.config.max_unknown_polls = 3;
        let id = scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();
        scheduler.run(id).await.unwrap();

        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::Unknown);
        assert_eq!(scheduler.poll(id).await.unwrap(), JobState::Unknown);
        let err = scheduler.poll(id).await.unwrap_err();
        assert!(matches!(err, RunnerError::StatusQuery { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_known_status_resets_unknown_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "echo 'Job <7> is submitted to queue <normal>.'");
        scheduler.config.max_unknown_polls = 2;
        let id = scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();
        scheduler.run(id).await.unwrap();

        for _ in 0..3 {
            std::fs::write(dir.path().join("status"), "UNKWN\n").unwrap();
            assert_eq!(scheduler.poll(id).await.unwrap(), JobState::Unknown);
            std::fs::write(dir.path().join("status"), "RUN\n").unwrap();
            assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobRunning);
        }
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "echo 'Cannot connect to LIM' >&2\nexit 255");
        let id = scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();

        assert_eq!(scheduler.run(id).await.unwrap(), JobState::NotSubmittedYet);
        assert_eq!(scheduler.run(id).await.unwrap(), JobState::NotSubmittedYet);
        let err = scheduler.run(id).await.unwrap_err();
        assert!(matches!(err, RunnerError::Submission { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "echo 'Bad project name' >&2\nexit 255");
        let id = scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();

        let err = scheduler.run(id).await.unwrap_err();
        assert!(err.to_string().contains("Bad project name"));
    }

    #[tokio::test]
    async fn test_runs_left_and_resubmit() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "echo 'Job <9> is submitted to queue <normal>.'");
        let id = scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();

        for expected_runs_left in [true, true, false] {
            scheduler.run(id).await.unwrap();
            std::fs::write(dir.path().join("status"), "EXIT\n").unwrap();
            assert_eq!(scheduler.poll(id).await.unwrap(), JobState::JobFailed);
            assert_eq!(scheduler.has_runs_left(id), expected_runs_left);
            if expected_runs_left {
                assert_eq!(scheduler.resubmit(id).await.unwrap(), JobState::JobPending);
            }
        }
        assert!(scheduler.resubmit(id).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_calls_kill_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(dir.path(), "echo 'Job <31> is submitted to queue <normal>.'");
        let id = scheduler.add_job(dir.path(), "Stage_0.sh", "job", 1, None).unwrap();
        assert_eq!(scheduler.stop(id).await.unwrap(), JobState::NotSubmittedYet);

        scheduler.run(id).await.unwrap();
        assert_eq!(scheduler.stop(id).await.unwrap(), JobState::JobFailed);
        assert_eq!(scheduler.stop(id).await.unwrap(), JobState::JobFailed);

        let killed = std::fs::read_to_string(dir.path().join("killed")).unwrap();
        assert_eq!(killed.trim(), "killed 31");
    }
}
