//! Scenario fixtures: case directories, pipelines and a fake LSF installation.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use basin_runner::config::RunnerConfig;
use basin_runner::pipeline::{DependencyLevel, GenericStage, RunCase, StageTemplate};
use tempfile::TempDir;

pub const PROJECT_FILE: &str = "Project.project3d";

/// A scenario directory holding one sub-directory per case
pub struct Scenario {
    dir: TempDir,
}

impl Scenario {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create scenario dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create `<scenario>/<name>/Project.project3d` and return a case for it
    pub fn case(&self, name: &str) -> RunCase {
        let case_dir = self.case_dir(name);
        std::fs::create_dir_all(&case_dir).expect("create case dir");
        let project = case_dir.join(PROJECT_FILE);
        std::fs::write(&project, "").expect("create project file");
        RunCase::new(project)
    }

    pub fn case_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn read(&self, case: &str, file: &str) -> String {
        std::fs::read_to_string(self.case_dir(case).join(file))
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    pub fn stop_file(&self) -> PathBuf {
        self.dir.path().join("stop_exec_scenario")
    }

    pub fn jobs_list(&self) -> PathBuf {
        self.dir.path().join("casa_jobs_list.txt")
    }

    pub fn local_config(&self, max_cpus: usize) -> RunnerConfig {
        let mut config = RunnerConfig::default();
        config.scheduler.local.max_cpus = Some(max_cpus);
        config.scheduler.local.kill_grace_period_ms = 100;
        config.orchestration.working_directory = self.path().to_path_buf();
        config
    }

    /// Configuration pointing the cluster backend at the fake LSF tools
    pub fn cluster_config(&self, lsf: &FakeLsf) -> RunnerConfig {
        let mut config = RunnerConfig::default();
        config.scheduler.cluster_name = "LSF".to_string();
        config.scheduler.cluster.submit_command = lsf.bsub.display().to_string();
        config.scheduler.cluster.status_command = lsf.bjobs.display().to_string();
        config.scheduler.cluster.kill_command = lsf.bkill.display().to_string();
        config.scheduler.cluster.poll_interval_secs = 0;
        config.orchestration.working_directory = self.path().to_path_buf();
        config
    }
}

/// The P/G/M pipeline: each stage writes `<stage>.txt` with the case name.
/// P and G can be reused by copying their result file, M is per-case.
pub fn three_stage_pipeline() -> Vec<Arc<dyn StageTemplate>> {
    vec![
        Arc::new(
            GenericStage::new("pt", "echo {case} > pt.txt", DependencyLevel::PtSolver)
                .with_result_files(["pt.txt"]),
        ),
        Arc::new(
            GenericStage::new("genex", "echo {case} > genex.txt", DependencyLevel::Genex)
                .with_result_files(["genex.txt"]),
        ),
        Arc::new(
            GenericStage::new(
                "migration",
                "echo {case} > migration.txt",
                DependencyLevel::Migration,
            )
            .with_result_files(["migration.txt"]),
        ),
    ]
}

/// Case A of the reference scenario
pub fn case_a(scenario: &Scenario) -> RunCase {
    scenario
        .case("case_a")
        .with_parameter("x", DependencyLevel::PtSolver, 1)
        .with_parameter("x_genex", DependencyLevel::Genex, 1)
        .with_parameter("x_migration", DependencyLevel::Migration, 1)
}

/// Case B: equal to A up to Genex, different at Migration
pub fn case_b(scenario: &Scenario) -> RunCase {
    scenario
        .case("case_b")
        .with_parameter("x", DependencyLevel::PtSolver, 1)
        .with_parameter("x_genex", DependencyLevel::Genex, 1)
        .with_parameter("x_migration", DependencyLevel::Migration, 2)
}

pub const TICK: Duration = Duration::from_millis(20);

pub fn write_executable(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write executable");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("make executable");
}

/// bsub/bjobs/bkill stand-ins: bsub runs the script in the background and
/// bjobs reports its status from the marker files.
pub struct FakeLsf {
    dir: TempDir,
    pub bsub: PathBuf,
    pub bjobs: PathBuf,
    pub bkill: PathBuf,
}

impl FakeLsf {
    pub fn install() -> Self {
        Self::with_bsub_prologue("")
    }

    /// `prologue` runs before submission, e.g. to reject it
    pub fn with_bsub_prologue(prologue: &str) -> Self {
        let dir = tempfile::tempdir().expect("create fake lsf dir");
        let state = dir.path().display().to_string();
        let bsub = dir.path().join("bsub");
        let bjobs = dir.path().join("bjobs");
        let bkill = dir.path().join("bkill");

        write_executable(
            &bsub,
            &format!(
                r#"{prologue}
cwd=.
while [ $# -gt 1 ]; do
  case "$1" in
    -cwd) cwd="$2"; shift 2 ;;
    -P|-J|-o|-e|-n|-R|-W) shift 2 ;;
    *) break ;;
  esac
done
script="$1"
last=$(cat {state}/counter 2>/dev/null || echo 100)
id=$((last + 1))
echo $id > {state}/counter
echo "$cwd/$script" > {state}/job_$id
(cd "$cwd" && ./"$script") >/dev/null 2>&1 &
echo "Job <$id> is submitted to queue <normal>.""#
            ),
        );
        write_executable(
            &bjobs,
            &format!(
                r#"id="$4"
script=$(cat {state}/job_$id 2>/dev/null) || {{ echo "Job <$id> is not found" >&2; exit 255; }}
if [ -f "$script.success" ]; then echo DONE
elif [ -f "$script.failed" ]; then echo EXIT
else echo RUN
fi"#
            ),
        );
        write_executable(&bkill, &format!("echo \"$1\" >> {state}/killed"));

        Self {
            dir,
            bsub,
            bjobs,
            bkill,
        }
    }

    pub fn submissions(&self) -> usize {
        std::fs::read_dir(self.dir.path())
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_name().to_string_lossy().starts_with("job_"))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn killed(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("killed"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}
