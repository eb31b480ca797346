//! territory-milp: per-pass MILP assembly, solver dispatch, and
//! post-processing (C5/C6).

pub mod dispatch;
pub mod metric;
pub mod problem;
pub mod postprocess;

pub use dispatch::{dispatch, RemoteSolver, SolveOutcome, SolverMode, MAX_ACCOUNTS_FOR_GLOBAL_LP};
pub use metric::{active_metrics, metric_value, metric_weight, per_rep_targets, Metric};
pub use postprocess::{build_assignments, compute_quality_metrics, rationale_for, PostProcessInput, QualityMetrics};
pub use problem::{solve, PassContext, VarMaps};
