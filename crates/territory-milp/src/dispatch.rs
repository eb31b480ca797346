//! Solver dispatch: mode selection, size guard, timeout, fallback chain
//! (§4.6, component C6).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use good_lp::Solution as _;
use tracing::{info, warn};

use territory_core::entities::{AccountId, RepId};
use territory_core::error::EngineError;

use crate::problem::{self, PassContext, VarMaps};

/// `|A| > this` in relaxed mode must be rejected before a global MILP is
/// attempted; the caller is expected to fall back to waterfall (§4.6).
pub const MAX_ACCOUNTS_FOR_GLOBAL_LP: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverMode {
    /// In-process solver chain, falling back to the remote solver on failure.
    Browser,
    /// Always dispatch to the remote solver.
    Cloud,
}

/// Result of one solved pass or waterfall level, independent of which
/// backend produced it.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub x_selected: HashSet<(AccountId, RepId)>,
    pub feasibility_slack: HashMap<RepId, f64>,
    pub solver_used: String,
    pub elapsed: Duration,
}

/// A pluggable exact-MILP oracle running outside this process. Never
/// implemented here — plugged in by the host application.
pub trait RemoteSolver: Send + Sync {
    fn solve_remote(&self, ctx: &PassContext) -> Result<SolveOutcome, EngineError>;
}

/// Entry point for one MILP solve (§4.6). `remote` is required for `Cloud`
/// mode and used as the last resort in `Browser` mode; its absence in either
/// case is an internal wiring error, not a solver failure.
pub fn dispatch(
    ctx: &PassContext,
    mode: SolverMode,
    remote: Option<&dyn RemoteSolver>,
    timeout: Duration,
) -> Result<SolveOutcome, EngineError> {
    if ctx.reps.is_empty() {
        return Err(EngineError::NoEligibleReps);
    }
    if !ctx.waterfall && ctx.accounts.len() > MAX_ACCOUNTS_FOR_GLOBAL_LP {
        return Err(EngineError::ScaleExceeded {
            accounts: ctx.accounts.len(),
            limit: MAX_ACCOUNTS_FOR_GLOBAL_LP,
        });
    }

    match mode {
        SolverMode::Cloud => {
            let remote = remote.ok_or_else(|| {
                EngineError::Internal("cloud mode requires a remote solver".into())
            })?;
            remote.solve_remote(ctx)
        }
        SolverMode::Browser => solve_browser(ctx, remote, timeout),
    }
}

fn solve_browser(
    ctx: &PassContext,
    remote: Option<&dyn RemoteSolver>,
    timeout: Duration,
) -> Result<SolveOutcome, EngineError> {
    #[cfg(feature = "solver-highs")]
    {
        match solve_local(ctx, true, "highs", good_lp::solvers::highs::highs, timeout) {
            Ok(outcome) => return Ok(outcome),
            Err(EngineError::NoEligibleReps) | Err(EngineError::ScaleExceeded { .. }) => {
                unreachable!("checked by caller before dispatch")
            }
            Err(err) => warn!(error = %err, "highs solve failed, falling back to clarabel"),
        }
    }

    #[cfg(feature = "solver-clarabel")]
    {
        match solve_local(ctx, false, "clarabel", good_lp::solvers::clarabel::clarabel, timeout) {
            Ok(outcome) => return Ok(outcome),
            Err(err) => warn!(error = %err, "clarabel solve failed, falling back to remote solver"),
        }
    }

    match remote {
        Some(remote) => {
            info!("local solvers exhausted, dispatching to remote solver");
            remote.solve_remote(ctx)
        }
        None => Err(EngineError::Internal(
            "all local solvers failed and no remote solver is configured".into(),
        )),
    }
}

fn solve_local<M: good_lp::SolverModel>(
    ctx: &PassContext,
    integral: bool,
    label: &'static str,
    using: impl FnMut(good_lp::variable::UnsolvedProblem) -> M,
    timeout: Duration,
) -> Result<SolveOutcome, EngineError> {
    let start = Instant::now();
    match problem::solve(ctx, integral, using) {
        Ok((solution, var_maps)) => Ok(decode(&solution, &var_maps, label, start.elapsed())),
        Err(err) => {
            if start.elapsed() >= timeout {
                Err(EngineError::SolverTimeout {
                    seconds: timeout.as_secs(),
                })
            } else {
                Err(err)
            }
        }
    }
}

/// Pick the winning rep for each account from the relaxed (or integral)
/// solution, one per account, rather than thresholding each pair variable
/// independently.
///
/// The assignment constraint (§4.5.3 item 1) forces every account's
/// candidate variables to sum to 1, so an exact MILP solution always has a
/// single variable at 1.0 and the rest at 0.0 — argmax reproduces that
/// exactly. A `highs` failure falling back to `clarabel`'s LP relaxation
/// (`integral=false`) can leave an account's mass spread across several
/// reps with none reaching any fixed threshold; argmax still picks exactly
/// one, preserving "every account gets exactly one rep" on both paths. Ties
/// break on rep id for determinism.
fn decode<S: good_lp::Solution>(
    solution: &S,
    var_maps: &VarMaps,
    label: &'static str,
    elapsed: Duration,
) -> SolveOutcome {
    let mut best_per_account: HashMap<AccountId, (RepId, f64)> = HashMap::new();
    for ((account_id, rep_id), &var) in &var_maps.x {
        let value = solution.value(var);
        best_per_account
            .entry(account_id.clone())
            .and_modify(|(best_rep, best_value)| {
                if value > *best_value
                    || (value == *best_value && rep_id.as_str() < best_rep.as_str())
                {
                    *best_rep = rep_id.clone();
                    *best_value = value;
                }
            })
            .or_insert_with(|| (rep_id.clone(), value));
    }
    let x_selected = best_per_account
        .into_iter()
        .map(|(account_id, (rep_id, _))| (account_id, rep_id))
        .collect();

    let feasibility_slack = var_maps
        .feasibility
        .iter()
        .map(|(rep_id, &var)| (rep_id.clone(), solution.value(var)))
        .collect();

    SolveOutcome {
        x_selected,
        feasibility_slack,
        solver_used: label.to_string(),
        elapsed,
    }
}
