//! Run cases and the parameter comparison behind copy-reuse.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::DependencyLevel;
use crate::state_machine::RunStatus;

/// Relative tolerance used when comparing numeric parameter values
pub const NUMERIC_TOLERANCE: f64 = 1e-9;

/// One input of a case, tagged with the first pipeline level it influences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseParameter {
    pub name: String,
    pub level: DependencyLevel,
    pub value: Value,
}

impl CaseParameter {
    pub fn new(name: impl Into<String>, level: DependencyLevel, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            level,
            value: value.into(),
        }
    }
}

/// A parameterized simulation scenario, executed as one job per pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCase {
    name: String,
    project_path: PathBuf,
    parameters: Vec<CaseParameter>,
    status: RunStatus,
}

impl RunCase {
    /// Case whose project file is `project_path`; the case runs in the file's directory
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        let project_path = project_path.into();
        let name = project_path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            project_path,
            parameters: Vec::new(),
            status: RunStatus::NotSubmitted,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a parameter; a parameter with the same name is replaced
    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        level: DependencyLevel,
        value: impl Into<Value>,
    ) -> Self {
        let parameter = CaseParameter::new(name, level, value);
        match self.parameters.iter_mut().find(|p| p.name == parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.parameters.push(parameter),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn working_directory(&self) -> PathBuf {
        match self.project_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn parameters(&self) -> &[CaseParameter] {
        &self.parameters
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        self.status = status;
    }

    /// Two cases are equivalent up to `level` when, for every level not above
    /// it, they define the same parameters with equal values.
    pub fn is_equal_up_to(&self, other: &RunCase, level: DependencyLevel) -> bool {
        let mut mine = self.parameters_up_to(level);
        let mut theirs = other.parameters_up_to(level);
        if mine.len() != theirs.len() {
            return false;
        }
        mine.sort_by(|a, b| (a.level, &a.name).cmp(&(b.level, &b.name)));
        theirs.sort_by(|a, b| (a.level, &a.name).cmp(&(b.level, &b.name)));

        mine.iter().zip(theirs.iter()).all(|(a, b)| {
            a.level == b.level && a.name == b.name && values_equal(&a.value, &b.value)
        })
    }

    /// Highest level up to which both cases are equivalent, `None` if they
    /// already differ at the first level
    pub fn equal_up_to_level(&self, other: &RunCase) -> Option<DependencyLevel> {
        DependencyLevel::ALL
            .into_iter()
            .take_while(|level| self.is_equal_up_to(other, *level))
            .last()
    }

    fn parameters_up_to(&self, level: DependencyLevel) -> Vec<&CaseParameter> {
        self.parameters.iter().filter(|p| p.level <= level).collect()
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => numbers_close(x, y),
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn numbers_close(x: f64, y: f64) -> bool {
    if x == y {
        return true;
    }
    (x - y).abs() <= NUMERIC_TOLERANCE * x.abs().max(y.abs())
}
