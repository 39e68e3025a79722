//! # Configuration
//!
//! Typed configuration for the run manager and both scheduler backends.
//!
//! Values come from three layers, applied in order by [`ConfigManager`]:
//! built-in defaults, an optional configuration file, then `BASIN_RUNNER__*`
//! environment variables. Tool locations for the workload manager are part of
//! [`ClusterConfig`], so nothing about the external environment is global.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{files, limits, LOCAL_CLUSTER_NAME};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub scheduler: SchedulerConfig,
    pub orchestration: OrchestrationConfig,
}

/// Backend selection and per-backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// `"LOCAL"` selects the local process backend, any other name the cluster backend
    pub cluster_name: String,
    pub local: LocalConfig,
    pub cluster: ClusterConfig,
    /// File receiving the backend handle of every accepted submission
    pub jobs_list_file: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cluster_name: LOCAL_CLUSTER_NAME.to_string(),
            local: LocalConfig::default(),
            cluster: ClusterConfig::default(),
            jobs_list_file: None,
        }
    }
}

impl SchedulerConfig {
    pub fn is_local(&self) -> bool {
        self.cluster_name.eq_ignore_ascii_case(LOCAL_CLUSTER_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// CPU budget; `None` uses the number of CPUs on the host
    pub max_cpus: Option<usize>,
    pub kill_grace_period_ms: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_cpus: None,
            kill_grace_period_ms: limits::KILL_GRACE_PERIOD_MS,
        }
    }
}

impl LocalConfig {
    pub fn kill_grace_period(&self) -> Duration {
        Duration::from_millis(self.kill_grace_period_ms)
    }
}

/// Workload-manager command line settings (LSF-like)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub submit_command: String,
    pub status_command: String,
    pub kill_command: String,
    pub project_name: String,
    /// Passed through verbatim as the resource requirement string
    pub resource_request: Option<String>,
    pub poll_interval_secs: u64,
    pub max_submit_attempts: u32,
    pub max_run_attempts: u32,
    /// Consecutive status polls without an answer or marker before the job is given up
    pub max_unknown_polls: u32,
    /// Substrings of submission output that mark a failure as retry-worthy
    pub transient_error_patterns: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            submit_command: "bsub".to_string(),
            status_command: "bjobs".to_string(),
            kill_command: "bkill".to_string(),
            project_name: "basin".to_string(),
            resource_request: None,
            poll_interval_secs: limits::CLUSTER_POLL_INTERVAL_SECS,
            max_submit_attempts: limits::MAX_SUBMIT_ATTEMPTS,
            max_run_attempts: limits::MAX_RUN_ATTEMPTS,
            max_unknown_polls: limits::MAX_UNKNOWN_POLLS,
            transient_error_patterns: vec![
                "External authentication failed".to_string(),
                "Cannot connect".to_string(),
                "Batch system not responding".to_string(),
            ],
        }
    }
}

impl ClusterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Maximum number of jobs waiting in a queue, 0 means unlimited
    pub max_pending_jobs: usize,
    pub update_interval_secs: u64,
    /// Name of the abort sentinel looked up in `working_directory`
    pub stop_file_name: String,
    pub working_directory: PathBuf,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_pending_jobs: 0,
            update_interval_secs: 1,
            stop_file_name: files::STOP_EXEC_FILE_NAME.to_string(),
            working_directory: PathBuf::from("."),
        }
    }
}

impl OrchestrationConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn stop_file_path(&self) -> PathBuf {
        self.working_directory.join(&self.stop_file_name)
    }
}

impl RunnerConfig {
    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.cluster_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "cluster_name",
                "scheduler",
            ));
        }

        if self.scheduler.local.max_cpus == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "scheduler.local.max_cpus",
                0,
                "CPU budget must be at least 1",
            ));
        }

        if !self.scheduler.is_local() {
            let cluster = &self.scheduler.cluster;
            for (field, value) in [
                ("scheduler.cluster.submit_command", &cluster.submit_command),
                ("scheduler.cluster.status_command", &cluster.status_command),
                ("scheduler.cluster.kill_command", &cluster.kill_command),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigurationError::missing_required_field(
                        field,
                        "cluster backend",
                    ));
                }
            }
            if cluster.max_submit_attempts == 0 {
                return Err(ConfigurationError::invalid_value(
                    "scheduler.cluster.max_submit_attempts",
                    0,
                    "at least one submission attempt is required",
                ));
            }
            if cluster.max_run_attempts == 0 {
                return Err(ConfigurationError::invalid_value(
                    "scheduler.cluster.max_run_attempts",
                    0,
                    "at least one run attempt is required",
                ));
            }
            if cluster.max_unknown_polls == 0 {
                return Err(ConfigurationError::invalid_value(
                    "scheduler.cluster.max_unknown_polls",
                    0,
                    "at least one status poll is required",
                ));
            }
        }

        if self.orchestration.stop_file_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "stop_file_name",
                "orchestration",
            ));
        }

        Ok(())
    }
}
