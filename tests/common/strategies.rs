#![allow(dead_code)]

use basin_runner::pipeline::DependencyLevel;
use proptest::prelude::*;

/// Strategy for a dependency level
pub fn level_strategy() -> impl Strategy<Value = DependencyLevel> {
    prop::sample::select(DependencyLevel::ALL.to_vec())
}

/// Parameter values per level drawn from a tiny domain so cases often coincide
pub fn case_parameters_strategy() -> impl Strategy<Value = Vec<(DependencyLevel, i64)>> {
    prop::collection::vec((level_strategy(), 0i64..2), 0..4)
}

/// A scenario of up to six cases
pub fn scenario_strategy() -> impl Strategy<Value = Vec<Vec<(DependencyLevel, i64)>>> {
    prop::collection::vec(case_parameters_strategy(), 1..6)
}

/// CPU requests for a batch of `add_job` calls
pub fn cpu_requests_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..64, 1..40)
}
