//! Stage templates: how a pipeline stage turns into an executable script.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use super::{DependencyLevel, RunCase};
use crate::constants::files;
use crate::error::{Result, RunnerError};

/// Inputs for rendering one stage script of one case
#[derive(Debug, Clone)]
pub struct ScriptContext<'a> {
    pub case: &'a RunCase,
    pub stage_index: usize,
    /// File name of the script inside the case directory; markers are named after it
    pub script_name: String,
    /// CPUs to request in the script, 0 when the scheduler assigns them
    pub cpus: usize,
}

/// A pipeline stage: its resource needs and the scripts that run or copy it
pub trait StageTemplate: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn cpus(&self) -> usize;

    fn run_time_limit(&self) -> Option<Duration>;

    fn dependency_level(&self) -> DependencyLevel;

    /// Script computing the stage for `context.case`
    fn generate_script(&self, context: &ScriptContext<'_>) -> Result<String>;

    /// Script satisfying the stage for `to` with the results `from` already computed
    fn generate_copy_script(
        &self,
        from: &RunCase,
        to: &RunCase,
        context: &ScriptContext<'_>,
    ) -> Result<String>;

    fn script_file_suffix(&self) -> &str {
        ".sh"
    }
}

/// Stage that runs one shell command line.
///
/// The command may use the placeholders `{case}`, `{case_dir}`, `{project}` and
/// `{cpus}`; `{cpus}` renders empty when the scheduler assigns CPUs.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericStage {
    name: String,
    command: String,
    cpus: usize,
    run_time_limit: Option<Duration>,
    level: DependencyLevel,
    result_files: Vec<String>,
    suffix: String,
}

impl GenericStage {
    pub fn new(name: impl Into<String>, command: impl Into<String>, level: DependencyLevel) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            cpus: 1,
            run_time_limit: None,
            level,
            result_files: Vec::new(),
            suffix: ".sh".to_string(),
        }
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn with_run_time_limit(mut self, limit: Duration) -> Self {
        self.run_time_limit = Some(limit);
        self
    }

    /// Files (relative to the case directory) a copy script brings over from the source case
    pub fn with_result_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.result_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    fn render_command(&self, context: &ScriptContext<'_>) -> String {
        let cpus = if context.cpus == 0 {
            String::new()
        } else {
            context.cpus.to_string()
        };
        self.command
            .replace("{case}", context.case.name())
            .replace("{case_dir}", &shell_path(&context.case.working_directory()))
            .replace("{project}", &shell_path(context.case.project_path()))
            .replace("{cpus}", &cpus)
    }
}

impl StageTemplate for GenericStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn cpus(&self) -> usize {
        self.cpus
    }

    fn run_time_limit(&self) -> Option<Duration> {
        self.run_time_limit
    }

    fn dependency_level(&self) -> DependencyLevel {
        self.level
    }

    fn generate_script(&self, context: &ScriptContext<'_>) -> Result<String> {
        if self.command.trim().is_empty() {
            return Err(RunnerError::Validation(format!(
                "stage '{}' has no command",
                self.name
            )));
        }

        let mut script = header(&self.name, context);
        script.push_str(&self.render_command(context));
        script.push_str("\nstatus=$?\n");
        script.push_str(&marker_epilogue(&context.script_name));
        Ok(script)
    }

    fn generate_copy_script(
        &self,
        from: &RunCase,
        to: &RunCase,
        context: &ScriptContext<'_>,
    ) -> Result<String> {
        let source_dir = from.working_directory();
        let mut script = header(&self.name, context);
        script.push_str(&format!(
            "# results reused from case {} for case {}\nstatus=0\n",
            from.name(),
            to.name()
        ));
        for file in &self.result_files {
            script.push_str(&format!(
                "cp -rp {} . || status=1\n",
                shell_path(&source_dir.join(file))
            ));
        }
        script.push_str(&marker_epilogue(&context.script_name));
        Ok(script)
    }

    fn script_file_suffix(&self) -> &str {
        &self.suffix
    }
}

fn header(stage_name: &str, context: &ScriptContext<'_>) -> String {
    format!(
        "#!/bin/bash\n# stage {} ({}) of case {}\ncd {} || exit 1\n",
        context.stage_index,
        stage_name,
        context.case.name(),
        shell_path(&context.case.working_directory()),
    )
}

/// The marker protocol: the script records its own outcome next to itself
fn marker_epilogue(script_name: &str) -> String {
    format!(
        "if [ $status -eq 0 ]; then\n  touch '{script_name}{}'\nelse\n  touch '{script_name}{}'\nfi\nexit $status\n",
        files::SUCCESS_MARKER_SUFFIX,
        files::FAILED_MARKER_SUFFIX,
    )
}

fn shell_path(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}
