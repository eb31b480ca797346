//! MILP problem assembly for one pass or waterfall level (§4.5, component C5).

use std::collections::HashMap;

use good_lp::variable::UnsolvedProblem;
use good_lp::{constraint, variable, variables, Expression, SolverModel, Variable};

use territory_core::calc::account_arr;
use territory_core::config::LPConfiguration;
use territory_core::entities::{Account, AccountId, Rep, RepId};
use territory_core::error::EngineError;

use crate::metric::{active_metrics, metric_value, metric_weight, per_rep_targets, Metric};

/// Everything the problem builder needs for one solve (one relaxed pass, or
/// one waterfall level within a pass).
pub struct PassContext<'a> {
    pub accounts: Vec<&'a Account>,
    pub reps: Vec<&'a Rep>,
    /// Locked accounts and their forced target rep (§4.5.3 item 2).
    pub locks: HashMap<AccountId, RepId>,
    /// `coeff_{a,r}` for every candidate pair; pairs absent here never get a
    /// decision variable (§4.5.3 item 6: segregation by omission).
    pub coefficients: HashMap<(AccountId, RepId), f64>,
    pub is_customer_pass: bool,
    pub waterfall: bool,
    pub config: &'a LPConfiguration,
    pub pipeline_map: &'a HashMap<AccountId, f64>,
    /// ARR already carried by each rep from a prior pass/level, folded into
    /// the capacity and ARR-balance constraints (§4.7 cross-pass augmentation).
    pub carried_arr: HashMap<RepId, f64>,
}

/// Six non-negative slacks decomposing one rep/metric's normalized load into
/// preferred/buffer/violation zones (§4.5.1).
#[derive(Debug, Clone, Copy)]
pub struct BalanceSlacks {
    pub alpha_over: Variable,
    pub alpha_under: Variable,
    pub beta_over: Variable,
    pub beta_under: Variable,
    pub m_over: Variable,
    pub m_under: Variable,
}

/// Every decision variable the solver produced, keyed for post-processing.
pub struct VarMaps {
    pub x: HashMap<(AccountId, RepId), Variable>,
    pub slacks: HashMap<(RepId, Metric), BalanceSlacks>,
    pub feasibility: HashMap<RepId, Variable>,
}

struct PenaltyConstants {
    alpha: f64,
    beta: f64,
    m: f64,
    feasibility: f64,
}

fn penalty_constants(config: &LPConfiguration) -> PenaltyConstants {
    let mult = config.balance_intensity.multiplier();
    PenaltyConstants {
        alpha: 0.01 * mult,
        beta: 0.10 * mult,
        m: 100.0 * mult,
        feasibility: config.solver.feasibility_penalty * mult,
    }
}

/// Build decision variables and the maximization objective. Solver-agnostic:
/// the result is handed to [`solve`] along with the backend constructor.
fn build_variables_and_objective(
    ctx: &PassContext,
    integral: bool,
) -> (good_lp::ProblemVariables, Expression, VarMaps) {
    let mut vars = variables!();
    let mut objective = Expression::from(0.0);

    let mut x = HashMap::new();
    for (&(ref account_id, ref rep_id), &coeff) in &ctx.coefficients {
        let x_var = if integral {
            variable().binary()
        } else {
            variable().min(0.0).max(1.0)
        };
        let var = vars.add(x_var);
        objective += coeff * var;
        x.insert((account_id.clone(), rep_id.clone()), var);
    }

    let metrics = active_metrics(ctx.is_customer_pass, ctx.waterfall, &ctx.config.balance);
    let penalties = penalty_constants(ctx.config);

    let mut slacks = HashMap::new();
    for rep in &ctx.reps {
        for &metric in &metrics {
            let alpha_bound = metric.alpha_variance();
            let alpha_over = vars.add(variable().min(0.0).max(alpha_bound));
            let alpha_under = vars.add(variable().min(0.0).max(alpha_bound));
            let beta_over = vars.add(variable().min(0.0).max(0.5));
            let beta_under = vars.add(variable().min(0.0).max(0.5));
            let m_over = vars.add(variable().min(0.0));
            let m_under = vars.add(variable().min(0.0));

            let weight = metric_weight(metric, ctx.is_customer_pass);
            objective -= penalties.alpha * weight * (alpha_over + alpha_under);
            objective -= penalties.beta * weight * (beta_over + beta_under);
            objective -= penalties.m * weight * (m_over + m_under);

            slacks.insert(
                (rep.id.clone(), metric),
                BalanceSlacks {
                    alpha_over,
                    alpha_under,
                    beta_over,
                    beta_under,
                    m_over,
                    m_under,
                },
            );
        }
    }

    let mut feasibility = HashMap::new();
    for rep in &ctx.reps {
        let s_r = vars.add(variable().min(0.0));
        objective -= penalties.feasibility * s_r;
        feasibility.insert(rep.id.clone(), s_r);
    }

    (vars, objective, VarMaps { x, slacks, feasibility })
}

/// Add every constraint in §4.5.3 to a solver-specific model.
fn add_constraints<M: SolverModel>(
    mut model: M,
    ctx: &PassContext,
    var_maps: &VarMaps,
) -> M {
    // 1. Assignment: every account gets exactly one rep among its candidates.
    for account in &ctx.accounts {
        let mut sum = Expression::from(0.0);
        let mut has_candidate = false;
        for rep in &ctx.reps {
            if let Some(&v) = var_maps.x.get(&(account.id.clone(), rep.id.clone())) {
                sum += v;
                has_candidate = true;
            }
        }
        if has_candidate {
            model = model.with(constraint!(sum == 1));
        }
    }

    // 2. Locks: the forced pair's variable is pinned to 1 (combined with (1),
    // this zeroes every other variable for that account).
    for (account_id, target_rep) in &ctx.locks {
        if let Some(&v) = var_maps.x.get(&(account_id.clone(), target_rep.clone())) {
            model = model.with(constraint!(v == 1));
        }
    }

    // 3. Capacity (soft hard cap).
    if ctx.config.capacity_hard_cap_enabled {
        for rep in &ctx.reps {
            let carried = ctx.carried_arr.get(&rep.id).copied().unwrap_or(0.0);
            let mut load = Expression::from(carried);
            for account in &ctx.accounts {
                if let Some(&v) = var_maps.x.get(&(account.id.clone(), rep.id.clone())) {
                    load += account_arr(account) * v;
                }
            }
            let s_r = var_maps.feasibility[&rep.id];
            model = model.with(constraint!(load - s_r <= ctx.config.hard_cap_arr));
        }
    }

    // 4 & 5. Balance decomposition and slack bounds (bounds are already
    // baked into the variable declarations in build_variables_and_objective).
    let metrics = active_metrics(ctx.is_customer_pass, ctx.waterfall, &ctx.config.balance);
    let targets = per_rep_targets(
        &ctx.accounts,
        &ctx.reps.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        &metrics,
        ctx.pipeline_map,
    );

    for rep in &ctx.reps {
        for &metric in &metrics {
            let target = targets.get(&metric).copied().unwrap_or(0.0);
            if target <= 1e-9 {
                continue;
            }
            let mut normalized_load = Expression::from(0.0);
            if metric == Metric::Arr {
                normalized_load += ctx.carried_arr.get(&rep.id).copied().unwrap_or(0.0) / target;
            }
            for account in &ctx.accounts {
                if let Some(&v) = var_maps.x.get(&(account.id.clone(), rep.id.clone())) {
                    let value = metric_value(metric, account, ctx.pipeline_map);
                    normalized_load += (value / target) * v;
                }
            }
            let slacks = &var_maps.slacks[&(rep.id.clone(), metric)];
            model = model.with(constraint!(
                normalized_load - slacks.alpha_over + slacks.alpha_under - slacks.beta_over
                    + slacks.beta_under - slacks.m_over + slacks.m_under
                    == 1
            ));
        }
    }

    model
}

/// Build and solve one MILP, generic over the solver backend function
/// (`good_lp::solvers::highs::highs` or `good_lp::solvers::clarabel::clarabel`).
pub fn solve<M: SolverModel>(
    ctx: &PassContext,
    integral: bool,
    using: impl FnMut(UnsolvedProblem) -> M,
) -> Result<(M::Solution, VarMaps), EngineError> {
    if ctx.reps.is_empty() {
        return Err(EngineError::NoEligibleReps);
    }

    let (vars, objective, var_maps) = build_variables_and_objective(ctx, integral);
    let model = vars.maximise(objective).using(using);
    let model = add_constraints(model, ctx, &var_maps);

    let solution = model
        .solve()
        .map_err(|e| EngineError::Internal(format!("solver failed: {e:?}")))?;

    Ok((solution, var_maps))
}
