//! # Run Manager
//!
//! Turns cases into per-stage jobs on the configured backend and drives them to
//! completion.
//!
//! ## Scheduling
//!
//! Every stage of a case becomes one job. When an earlier case has the same
//! parameters up to the stage's dependency level, the stage is satisfied by a
//! copy job instead of a fresh computation. The copy job waits on the earlier
//! case's job for that stage, and the earlier case's next stage waits for the
//! copy so it cannot change the files being copied.
//!
//! ## Polling loop
//!
//! One pass per tick over all cases, each walked in stage order: finished stages
//! are skipped, the first unfinished one is either left alone (in flight),
//! submitted (dependencies met, throttle allows) or ends the case (failed). The
//! loop ends when every case is completed or failed, or when the stop file
//! appears in the working directory.

use std::collections::{BTreeMap, BTreeSet};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::dependencies::{combine, Dependency, DependencyStatus, Upstream};
use super::snapshot::{CaseEntry, RunManagerSnapshot};
use super::statistics::JobCounters;
use crate::config::RunnerConfig;
use crate::constants::{files, CHECKPOINT_VERSION};
use crate::error::{Result, RunnerError};
use crate::logging::{log_case_operation, log_job_operation};
use crate::pipeline::{RunCase, ScriptContext, StageTemplate};
use crate::scheduler::{create_scheduler, JobId, JobScheduler};
use crate::state_machine::{JobState, RunStatus};

/// Index of a case inside its run manager
pub type CaseId = usize;

/// How `run_scheduled_cases` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every case reached `Completed` or `Failed`
    Completed,
    /// Execution was stopped through the stop file
    Aborted,
}

pub struct RunManager {
    config: RunnerConfig,
    scheduler: Box<dyn JobScheduler>,
    stages: Vec<Arc<dyn StageTemplate>>,
    cases: Vec<CaseEntry>,
    dependencies: BTreeMap<JobId, Vec<Dependency>>,
    dropped_jobs: BTreeSet<JobId>,
    max_pending_jobs: usize,
    last_counters: Option<JobCounters>,
}

impl std::fmt::Debug for RunManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunManager")
            .field("cluster_name", &self.scheduler.cluster_name())
            .field("stages", &self.stages.len())
            .field("cases", &self.cases.len())
            .field("max_pending_jobs", &self.max_pending_jobs)
            .finish()
    }
}

impl RunManager {
    /// Create a run manager and its backend. A jobs-list file left over from an
    /// earlier run is deleted.
    pub fn new(config: RunnerConfig, stages: Vec<Arc<dyn StageTemplate>>) -> Result<Self> {
        let config = prepare_config(config)?;
        let scheduler = create_backend(&config)?;
        Ok(Self {
            max_pending_jobs: config.orchestration.max_pending_jobs,
            config,
            scheduler,
            stages,
            cases: Vec::new(),
            dependencies: BTreeMap::new(),
            dropped_jobs: BTreeSet::new(),
            last_counters: None,
        })
    }

    /// Rebuild a run manager from a checkpoint written by [`RunManager::save`]
    pub fn load(
        path: &Path,
        config: RunnerConfig,
        stages: Vec<Arc<dyn StageTemplate>>,
    ) -> Result<Self> {
        let config = prepare_config(config)?;
        let snapshot = RunManagerSnapshot::read(path)?;
        if snapshot.stage_count != stages.len() {
            return Err(RunnerError::Checkpoint(format!(
                "checkpoint has {} pipeline stages, {} given",
                snapshot.stage_count,
                stages.len()
            )));
        }

        let scheduler = snapshot.scheduler.clone().into_scheduler(&config.scheduler)?;
        snapshot.check_job_ids(scheduler.job_count())?;

        info!(
            path = %path.display(),
            cases = snapshot.cases.len(),
            jobs = scheduler.job_count(),
            "Run manager restored from checkpoint"
        );

        Ok(Self {
            config,
            scheduler,
            stages,
            cases: snapshot.cases,
            dependencies: snapshot.dependencies,
            dropped_jobs: snapshot.dropped_jobs,
            max_pending_jobs: snapshot.max_pending_jobs,
            last_counters: None,
        })
    }

    /// Append a stage to the pipeline; only possible before any case is scheduled
    pub fn add_stage(&mut self, stage: Arc<dyn StageTemplate>) -> Result<()> {
        if !self.cases.is_empty() {
            return Err(RunnerError::Validation(format!(
                "cannot add stage '{}' after cases were scheduled",
                stage.name()
            )));
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Limit the number of jobs waiting in the backend queue, 0 for no limit
    pub fn set_max_pending_jobs(&mut self, max_pending_jobs: usize) {
        self.max_pending_jobs = max_pending_jobs;
    }

    pub fn max_pending_jobs(&self) -> usize {
        self.max_pending_jobs
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &dyn JobScheduler {
        self.scheduler.as_ref()
    }

    pub fn stages(&self) -> &[Arc<dyn StageTemplate>] {
        &self.stages
    }

    pub fn case(&self, case_id: CaseId) -> Option<&RunCase> {
        self.cases.get(case_id).map(|entry| &entry.case)
    }

    pub fn cases(&self) -> impl Iterator<Item = &RunCase> {
        self.cases.iter().map(|entry| &entry.case)
    }

    pub fn case_count(&self) -> usize {
        self.cases.len()
    }

    /// Jobs of the case's remaining stages, in stage order
    pub fn jobs_for_case(&self, case_id: CaseId) -> Option<&[JobId]> {
        self.cases.get(case_id).map(|entry| entry.jobs.as_slice())
    }

    /// Job running `stage` of the case, `None` if that stage has no job
    pub fn job_for_stage(&self, case_id: CaseId, stage: usize) -> Option<JobId> {
        self.cases.get(case_id)?.job_for_stage(stage)
    }

    pub fn dependencies_of(&self, job: JobId) -> &[Dependency] {
        self.dependencies
            .get(&job)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Jobs removed from failed cases before they were submitted
    pub fn dropped_jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.dropped_jobs.iter().copied()
    }

    /// Create the jobs of a case, reusing results of equivalent earlier cases
    pub fn schedule_case(&mut self, case: RunCase) -> Result<CaseId> {
        if let Some(existing) = self.find_case(&case) {
            debug!(case_id = existing, case = %case.name(), "Case already scheduled");
            return Ok(existing);
        }
        check_project_path(&case)?;
        if self.stages.is_empty() {
            return Err(RunnerError::Validation(
                "no pipeline stages defined".to_string(),
            ));
        }

        let case_id = self.cases.len();
        let mut case = case;
        if case.name().is_empty() {
            case.set_name(format!("Case_{}", case_id + 1));
        }
        let mut jobs = Vec::with_capacity(self.stages.len());
        let mut edges = Vec::new();
        if let Err(e) = self.create_stage_jobs(&case, &mut jobs, &mut edges) {
            // Jobs already registered belong to no case and are never submitted
            warn!(
                case = %case.name(),
                registered_jobs = jobs.len(),
                error = %e,
                "Scheduling case failed, dropping its jobs"
            );
            self.dropped_jobs.extend(jobs);
            return Err(e);
        }
        for (job, dependency) in edges {
            self.dependencies.entry(job).or_default().push(dependency);
        }

        case.set_status(RunStatus::Scheduled);
        log_case_operation(
            "schedule",
            case_id,
            case.name(),
            &case.status().to_string(),
            Some(&format!("{} stages", jobs.len())),
        );
        self.cases.push(CaseEntry {
            case,
            jobs,
            first_stage: 0,
        });
        Ok(case_id)
    }

    /// Register one job per stage of `case`. Edges are returned in `edges`, not
    /// recorded, so a failure part way leaves the dependency graph untouched.
    fn create_stage_jobs(
        &mut self,
        case: &RunCase,
        jobs: &mut Vec<JobId>,
        edges: &mut Vec<(JobId, Dependency)>,
    ) -> Result<()> {
        let case_dir = case.working_directory();
        let cpus_by_scheduler = self.scheduler.cpus_number_by_scheduler();
        let stages = self.stages.clone();

        for (index, stage) in stages.iter().enumerate() {
            let level = stage.dependency_level();
            let script_name = stage_script_name(index, stage.as_ref());
            let context = ScriptContext {
                case,
                stage_index: index,
                script_name: script_name.clone(),
                cpus: if cpus_by_scheduler { 0 } else { stage.cpus() },
            };

            let source = if level.allows_copy_reuse() {
                self.find_copy_source(case, index)
            } else {
                None
            };

            let script = match source {
                Some((source_case, _)) => {
                    stage.generate_copy_script(&self.cases[source_case].case, case, &context)?
                }
                None => stage.generate_script(&context)?,
            };
            write_script(&case_dir.join(&script_name), &script)?;

            let cpus = if source.is_some() { 1 } else { stage.cpus() };
            let job = self.scheduler.add_job(
                &case_dir,
                &script_name,
                &stage_job_name(case.name(), index),
                cpus,
                stage.run_time_limit(),
            )?;
            jobs.push(job);

            if let Some((source_case, source_job)) = source {
                edges.push((job, Dependency::input(source_job)));

                // The source case must not move on before the copy is done
                if let Some(next) = self.cases[source_case].job_for_stage(index + 1) {
                    if self.scheduler.state(next)? == JobState::NotSubmittedYet {
                        edges.push((next, Dependency::release(job)));
                    }
                }
                debug!(
                    job_id = job,
                    stage = %stage.name(),
                    source_case = %self.cases[source_case].case.name(),
                    source_job,
                    "Stage reuses results of an earlier case"
                );
            }
        }
        Ok(())
    }

    /// Re-register a case from its stage scripts and markers on disk.
    ///
    /// Leading stages with a success marker are skipped; the rest get new jobs.
    pub fn restore_case(&mut self, case: RunCase) -> Result<CaseId> {
        if let Some(existing) = self.find_case(&case) {
            return Ok(existing);
        }
        check_project_path(&case)?;

        let case_id = self.cases.len();
        let mut case = case;
        if case.name().is_empty() {
            case.set_name(format!("Case_{}", case_id + 1));
        }
        let case_dir = case.working_directory();
        let stages = self.stages.clone();

        let script_names: Vec<String> = stages
            .iter()
            .enumerate()
            .map(|(index, stage)| stage_script_name(index, stage.as_ref()))
            .collect();
        if let Some(missing) = script_names
            .iter()
            .map(|name| case_dir.join(name))
            .find(|path| !path.exists())
        {
            return Err(RunnerError::WrongPath(format!(
                "stage script {} does not exist",
                missing.display()
            )));
        }

        let first_stage = script_names
            .iter()
            .enumerate()
            .take_while(|(index, name)| {
                self.scheduler.restore_job_state(
                    &case_dir,
                    name,
                    &stage_job_name(case.name(), *index),
                ) == JobState::JobFinished
            })
            .count();

        let mut jobs = Vec::with_capacity(stages.len() - first_stage);
        for (index, stage) in stages.iter().enumerate().skip(first_stage) {
            jobs.push(self.scheduler.add_job(
                &case_dir,
                &script_names[index],
                &stage_job_name(case.name(), index),
                stage.cpus(),
                stage.run_time_limit(),
            )?);
        }

        let status = if jobs.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::Scheduled
        };
        case.set_status(status);
        log_case_operation(
            "restore",
            case_id,
            case.name(),
            &status.to_string(),
            Some(&format!("{first_stage} of {} stages already finished", stages.len())),
        );
        self.cases.push(CaseEntry {
            case,
            jobs,
            first_stage,
        });
        Ok(case_id)
    }

    /// Poll and submit until every case is done or the stop file appears.
    ///
    /// On an error every in-flight job is stopped before the error is returned.
    pub async fn run_scheduled_cases(&mut self, interval: Duration) -> Result<RunOutcome> {
        info!(
            cases = self.cases.len(),
            cluster_name = self.scheduler.cluster_name(),
            max_pending_jobs = self.max_pending_jobs,
            "Running scheduled cases"
        );

        match self.polling_loop(interval).await {
            Ok(outcome) => {
                info!(outcome = ?outcome, "Scenario execution finished");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, fatal = e.is_fatal(), "Scenario execution failed, stopping submitted jobs");
                self.stop_all_submitted_jobs().await;
                Err(e)
            }
        }
    }

    /// [`RunManager::run_scheduled_cases`] with the configured update interval
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let interval = self.config.orchestration.update_interval();
        self.run_scheduled_cases(interval).await
    }

    async fn polling_loop(&mut self, interval: Duration) -> Result<RunOutcome> {
        let stop_file = self.config.orchestration.stop_file_path();
        loop {
            if stop_file.exists() {
                warn!(stop_file = %stop_file.display(), "Stop file found, aborting scenario execution");
                return Ok(self.stop_all_submitted_jobs().await);
            }

            self.tick().await?;

            let counters = self.collect_statistics();
            if self.last_counters != Some(counters) {
                counters.log();
                self.last_counters = Some(counters);
            }

            if self.all_cases_done() {
                return Ok(RunOutcome::Completed);
            }
            self.scheduler.sleep(interval).await;
        }
    }

    /// One pass over all cases
    async fn tick(&mut self) -> Result<()> {
        let mut pending = self.count_pending();
        for case_id in 0..self.cases.len() {
            if self.cases[case_id].case.status() != RunStatus::Scheduled {
                continue;
            }
            self.advance_case(case_id, &mut pending).await?;
        }
        Ok(())
    }

    async fn advance_case(&mut self, case_id: CaseId, pending: &mut usize) -> Result<()> {
        let mut index = 0;
        while let Some(&job) = self.cases[case_id].jobs.get(index) {
            match self.scheduler.poll(job).await? {
                JobState::NotSubmittedYet => {
                    return self.try_submit(case_id, index, job, pending).await;
                }
                JobState::JobPending | JobState::JobRunning | JobState::Unknown => return Ok(()),
                JobState::JobSucceeded => {
                    log_job_operation(
                        "finish",
                        job,
                        &self.scheduler.job_name(job)?,
                        Some(&self.scheduler.scheduler_job_id(job)?),
                        &JobState::JobSucceeded.to_string(),
                        Some(self.cases[case_id].case.name()),
                    );
                    index += 1;
                }
                JobState::JobFinished => index += 1,
                JobState::JobFailed => {
                    if self.scheduler.has_runs_left(job) {
                        if self.scheduler.resubmit(job).await? == JobState::JobPending {
                            *pending += 1;
                        }
                        return Ok(());
                    }
                    let reason = format!("job {} failed", self.scheduler.job_name(job)?);
                    self.fail_case(case_id, index + 1, &reason);
                    return Ok(());
                }
            }
        }

        let entry = &mut self.cases[case_id];
        entry.case.set_status(RunStatus::Completed);
        log_case_operation(
            "complete",
            case_id,
            entry.case.name(),
            &RunStatus::Completed.to_string(),
            None,
        );
        Ok(())
    }

    async fn try_submit(
        &mut self,
        case_id: CaseId,
        index: usize,
        job: JobId,
        pending: &mut usize,
    ) -> Result<()> {
        match self.dependency_status(job)? {
            DependencyStatus::Waiting => Ok(()),
            DependencyStatus::Failed(upstream) => {
                let reason = format!(
                    "input job {} failed",
                    self.scheduler.job_name(upstream)?
                );
                self.fail_case(case_id, index, &reason);
                Ok(())
            }
            DependencyStatus::Ready => {
                if self.max_pending_jobs > 0 && *pending >= self.max_pending_jobs {
                    debug!(job_id = job, pending = *pending, "Pending job limit reached");
                    return Ok(());
                }
                let state = self.scheduler.run(job).await?;
                if state == JobState::JobPending {
                    *pending += 1;
                }
                debug!(job_id = job, state = %state, "Job submitted");
                Ok(())
            }
        }
    }

    fn dependency_status(&self, job: JobId) -> Result<DependencyStatus> {
        let mut statuses = Vec::new();
        for dependency in self.dependencies_of(job) {
            let upstream = if self.dropped_jobs.contains(&dependency.job) {
                Upstream::Dropped
            } else {
                let state = self.scheduler.state(dependency.job)?;
                if state == JobState::JobFailed && self.scheduler.has_runs_left(dependency.job) {
                    Upstream::Retrying
                } else {
                    Upstream::Live(state)
                }
            };
            statuses.push(dependency.status(upstream));
        }
        Ok(combine(statuses))
    }

    /// Mark a case failed and drop its jobs from `keep` on
    fn fail_case(&mut self, case_id: CaseId, keep: usize, reason: &str) {
        let entry = &mut self.cases[case_id];
        let keep = keep.min(entry.jobs.len());
        let dropped = entry.jobs.split_off(keep);
        entry.case.set_status(RunStatus::Failed);
        log_case_operation(
            "fail",
            case_id,
            entry.case.name(),
            &RunStatus::Failed.to_string(),
            Some(reason),
        );
        self.dropped_jobs.extend(dropped);
    }

    /// Stop every pending or running job and fail its case
    pub async fn stop_all_submitted_jobs(&mut self) -> RunOutcome {
        for case_id in 0..self.cases.len() {
            let jobs = self.cases[case_id].jobs.clone();
            let mut stopped_any = false;
            for job in jobs {
                let state = match self.scheduler.state(job) {
                    Ok(state) => state,
                    Err(e) => {
                        debug!(job_id = job, error = %e, "Skipping job while stopping");
                        continue;
                    }
                };
                if !state.is_in_flight() && state != JobState::Unknown {
                    continue;
                }
                stopped_any = true;
                if let Err(e) = self.scheduler.stop(job).await {
                    debug!(job_id = job, error = %e, "Failed to stop job");
                }
            }

            if stopped_any {
                let entry = &mut self.cases[case_id];
                entry.case.set_status(RunStatus::Failed);
                log_case_operation(
                    "abort",
                    case_id,
                    entry.case.name(),
                    &RunStatus::Failed.to_string(),
                    None,
                );
            }
        }
        RunOutcome::Aborted
    }

    /// Job counts over the remaining jobs of every case
    pub fn collect_statistics(&self) -> JobCounters {
        self.cases
            .iter()
            .flat_map(|entry| entry.jobs.iter())
            .filter_map(|&job| self.scheduler.state(job).ok())
            .collect()
    }

    fn count_pending(&self) -> usize {
        self.collect_statistics().pending
    }

    fn all_cases_done(&self) -> bool {
        self.cases
            .iter()
            .all(|entry| entry.case.status().is_terminal())
    }

    fn find_case(&self, case: &RunCase) -> Option<CaseId> {
        self.cases
            .iter()
            .position(|entry| entry.case.project_path() == case.project_path())
    }

    /// First earlier case equivalent up to the stage's level that still has a job for it
    fn find_copy_source(&self, case: &RunCase, stage: usize) -> Option<(CaseId, JobId)> {
        let level = self.stages.get(stage)?.dependency_level();
        self.cases.iter().enumerate().find_map(|(case_id, entry)| {
            if entry.case.status() == RunStatus::Failed {
                return None;
            }
            let job = entry.job_for_stage(stage)?;
            if self.dropped_jobs.contains(&job) {
                return None;
            }
            entry
                .case
                .is_equal_up_to(case, level)
                .then_some((case_id, job))
        })
    }

    /// Stop all jobs, recreate the backend and forget every case
    pub async fn reset_state(&mut self, clean_stages: bool) -> Result<()> {
        self.scheduler.shutdown().await;
        self.scheduler = create_backend(&self.config)?;
        self.cases.clear();
        self.dependencies.clear();
        self.dropped_jobs.clear();
        self.last_counters = None;
        if clean_stages {
            self.stages.clear();
        }
        debug!(clean_stages, "Run manager state reset");
        Ok(())
    }

    pub fn snapshot(&self) -> RunManagerSnapshot {
        RunManagerSnapshot {
            version: CHECKPOINT_VERSION,
            stage_count: self.stages.len(),
            max_pending_jobs: self.max_pending_jobs,
            cases: self.cases.clone(),
            dependencies: self.dependencies.clone(),
            dropped_jobs: self.dropped_jobs.clone(),
            scheduler: self.scheduler.snapshot(),
        }
    }

    /// Write a checkpoint that [`RunManager::load`] can resume from
    pub fn save(&self, path: &Path) -> Result<()> {
        self.snapshot().write(path)?;
        info!(path = %path.display(), cases = self.cases.len(), "Run manager checkpoint saved");
        Ok(())
    }
}

fn prepare_config(mut config: RunnerConfig) -> Result<RunnerConfig> {
    config.validate()?;
    if config.scheduler.jobs_list_file.is_none() {
        config.scheduler.jobs_list_file = Some(
            config
                .orchestration
                .working_directory
                .join(files::JOBS_ID_LIST_FILE_NAME),
        );
    }
    Ok(config)
}

fn create_backend(config: &RunnerConfig) -> Result<Box<dyn JobScheduler>> {
    if let Some(list) = &config.scheduler.jobs_list_file {
        match std::fs::remove_file(list) {
            Ok(()) => debug!(path = %list.display(), "Removed old jobs list"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RunnerError::io(list, e)),
        }
    }
    create_scheduler(&config.scheduler)
}

fn check_project_path(case: &RunCase) -> Result<()> {
    let path = case.project_path();
    if path.as_os_str().is_empty() {
        return Err(RunnerError::WrongPath(format!(
            "case '{}' has an empty project path",
            case.name()
        )));
    }
    if !path.exists() {
        return Err(RunnerError::WrongPath(format!(
            "project file {} does not exist",
            path.display()
        )));
    }
    Ok(())
}

fn stage_script_name(index: usize, stage: &dyn StageTemplate) -> String {
    format!(
        "{}{index}{}",
        files::STAGE_SCRIPT_PREFIX,
        stage.script_file_suffix()
    )
}

fn stage_job_name(case_name: &str, index: usize) -> String {
    format!("{case_name}_stage_{index}")
}

fn write_script(path: &Path, script: &str) -> Result<()> {
    std::fs::write(path, script).map_err(|e| RunnerError::io(path, e))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| RunnerError::io(path, e))
}
