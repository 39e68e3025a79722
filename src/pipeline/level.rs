use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Phase of the simulation pipeline a stage or a case parameter belongs to.
///
/// Ordered: a parameter at some level influences every stage at that level
/// and above.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DependencyLevel {
    #[default]
    PtSolver,
    HiResDecompaction,
    Genex,
    Migration,
    Postprocessing,
}

impl DependencyLevel {
    pub const ALL: [DependencyLevel; 5] = [
        Self::PtSolver,
        Self::HiResDecompaction,
        Self::Genex,
        Self::Migration,
        Self::Postprocessing,
    ];

    /// Stages at this level may be satisfied by copying another case's results
    pub fn allows_copy_reuse(&self) -> bool {
        *self < Self::Postprocessing
    }
}

impl fmt::Display for DependencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PtSolver => write!(f, "pt_solver"),
            Self::HiResDecompaction => write!(f, "hi_res_decompaction"),
            Self::Genex => write!(f, "genex"),
            Self::Migration => write!(f, "migration"),
            Self::Postprocessing => write!(f, "postprocessing"),
        }
    }
}

impl FromStr for DependencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pt_solver" => Ok(Self::PtSolver),
            "hi_res_decompaction" => Ok(Self::HiResDecompaction),
            "genex" => Ok(Self::Genex),
            "migration" => Ok(Self::Migration),
            "postprocessing" => Ok(Self::Postprocessing),
            _ => Err(format!("Invalid dependency level: {s}")),
        }
    }
}
