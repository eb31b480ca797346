//! Orchestrator state machine (§4.7, component C7).
//!
//! One call to [`run`] drives one build through
//! `loading -> preprocessing -> customer_pass -> prospect_pass -> post -> done`,
//! with each pass independently falling to an error outcome per §7's
//! propagation policy ("NoEligibleReps ... fatal to that pass; other pass may
//! still proceed" takes precedence here over the simplified two-arrow ASCII
//! diagram in §4.7, which reads as if either pass failing aborts the whole
//! build - see `DESIGN.md`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, warn};

use territory_core::calc::{account_arr, is_customer_leaf};
use territory_core::config::{LPConfiguration, PriorityItem};
use territory_core::entities::{Account, AccountId, Assignment, Rep, RepId};
use territory_core::error::{EngineError, EngineWarning};
use territory_data::{eligible_rep_ids, load_build, LoadedBuildData, Repository};
use territory_score::scoring::{assemble_coefficient, derive_weights, rank_bonuses, score_pair};
use territory_score::stability::{check_backfill, check_stability, LockResult};
use territory_score::strategic::assign_strategic_accounts;
use territory_milp::dispatch::{dispatch, RemoteSolver, SolveOutcome, SolverMode};
use territory_milp::postprocess::{build_assignments, compute_quality_metrics, PostProcessInput, QualityMetrics};
use territory_milp::problem::PassContext;

/// Either `waterfall` (cascaded single-factor sub-solves) or
/// `relaxed_optimization` (one weighted MILP) model (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Waterfall,
    Relaxed,
}

/// Cooperative cancellation checked at step boundaries, never mid-solver
/// (§5 "Cancellation/timeouts").
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// §9 "Sales Tools bucket": the predicate and target rep are supplied by the
/// caller rather than hard-coded into `LPConfiguration`, since the exact
/// routing rule is a per-run operational decision, not a scoring parameter.
pub struct SalesToolsBucket<'a> {
    pub predicate: Box<dyn Fn(&Account) -> bool + Send + Sync + 'a>,
    pub target_rep_id: RepId,
}

pub struct EngineOptions<'a> {
    pub mode: RunMode,
    pub solver_mode_override: Option<SolverMode>,
    pub cancellation: Option<CancellationHandle>,
    pub remote_solver: Option<&'a dyn RemoteSolver>,
    pub sales_tools_bucket: Option<SalesToolsBucket<'a>>,
}

impl<'a> Default for EngineOptions<'a> {
    fn default() -> Self {
        Self {
            mode: RunMode::Relaxed,
            solver_mode_override: None,
            cancellation: None,
            remote_solver: None,
            sales_tools_bucket: None,
        }
    }
}

/// One pass's result, independent of whether the other pass succeeded
/// (§7: `NoEligibleReps` is fatal only to the pass it hits).
#[derive(Debug, Default)]
pub struct PassOutcome {
    pub assignments: Vec<Assignment>,
    pub quality: Option<QualityMetrics>,
    pub warnings: Vec<EngineWarning>,
    pub error: Option<EngineError>,
}

/// `EngineResult` (§6.1/§6.5).
#[derive(Debug)]
pub struct EngineOutcome {
    pub customer_assignments: Vec<Assignment>,
    pub prospect_assignments: Vec<Assignment>,
    pub warnings: Vec<String>,
    pub customer_metrics: Option<QualityMetrics>,
    pub prospect_metrics: Option<QualityMetrics>,
    pub customer_error: Option<EngineError>,
    pub prospect_error: Option<EngineError>,
    pub telemetry_id: String,
}

/// Public engine entry point (§6.1).
pub async fn run(
    repository: &dyn Repository,
    build_id: &str,
    options: EngineOptions<'_>,
) -> Result<EngineOutcome, EngineError> {
    let _span = info_span!("build", build_id).entered();

    let data = {
        let _span = info_span!("loading").entered();
        load_build(repository, build_id).await?
    };
    data.config.validate()?;

    if is_cancelled(&options) {
        return Err(EngineError::Cancelled);
    }

    let telemetry_id = uuid::Uuid::new_v4().to_string();
    let mut warnings: Vec<String> = data.warnings.iter().map(|w| w.to_string()).collect();

    let eligible_reps = eligible_rep_ids(&data);
    let reps_by_id: HashMap<RepId, &Rep> = data.all_reps().map(|r| (r.id.clone(), r)).collect();

    let _span = info_span!("preprocessing").entered();
    drop(_span);

    let mut carried_arr: HashMap<RepId, f64> = HashMap::new();

    let customer_outcome = {
        let _span = info_span!("customer_pass").entered();
        run_pass(
            &data,
            &reps_by_id,
            &eligible_reps,
            true,
            &options,
            &carried_arr,
        )
    };
    warnings.extend(customer_outcome.warnings.iter().map(|w| w.to_string()));
    for rep in &data.regular_reps {
        let total: f64 = customer_outcome
            .assignments
            .iter()
            .filter(|a| a.rep_id == rep.id)
            .filter_map(|a| data.accounts.get(&a.account_id))
            .map(account_arr)
            .sum();
        if total > 0.0 {
            *carried_arr.entry(rep.id.clone()).or_insert(0.0) += total;
        }
    }

    if is_cancelled(&options) {
        return Err(EngineError::Cancelled);
    }

    let prospect_outcome = {
        let _span = info_span!("prospect_pass").entered();
        run_pass(
            &data,
            &reps_by_id,
            &eligible_reps,
            false,
            &options,
            &carried_arr,
        )
    };
    warnings.extend(prospect_outcome.warnings.iter().map(|w| w.to_string()));

    let _span = info_span!("post").entered();
    if let Some(err) = &customer_outcome.error {
        warn!(error = %err, "customer pass did not complete");
    }
    if let Some(err) = &prospect_outcome.error {
        warn!(error = %err, "prospect pass did not complete");
    }

    let customer_warning_strings: Vec<String> =
        customer_outcome.warnings.iter().map(|w| w.to_string()).collect();
    let prospect_warning_strings: Vec<String> =
        prospect_outcome.warnings.iter().map(|w| w.to_string()).collect();
    crate::telemetry::record(
        repository,
        build_id,
        &telemetry_id,
        &data.config,
        &customer_outcome,
        &customer_warning_strings,
        &prospect_outcome,
        &prospect_warning_strings,
    )
    .await;

    let outcome = EngineOutcome {
        customer_assignments: customer_outcome.assignments,
        prospect_assignments: prospect_outcome.assignments,
        warnings,
        customer_metrics: customer_outcome.quality,
        prospect_metrics: prospect_outcome.quality,
        customer_error: customer_outcome.error,
        prospect_error: prospect_outcome.error,
        telemetry_id: telemetry_id.clone(),
    };

    info!("build complete");
    Ok(outcome)
}

fn is_cancelled(options: &EngineOptions) -> bool {
    options
        .cancellation
        .as_ref()
        .map(|c| c.is_cancelled())
        .unwrap_or(false)
}

/// Classify an account as in-scope for the customer or prospect pass.
/// A parent is a customer if it or any child is a customer leaf (§3.2
/// invariant 8's `has_customer_descendant` half, evaluated here since it
/// needs the account graph).
fn is_customer_pass_account(account: &Account, accounts: &HashMap<AccountId, Account>) -> bool {
    if is_customer_leaf(account) {
        return true;
    }
    account
        .child_ids
        .iter()
        .filter_map(|id| accounts.get(id))
        .any(is_customer_leaf)
}

/// Greedy least-loaded pick among `reps`, counting assignments already made
/// in this pass. Used only as a fallback for an account the solver somehow
/// left without a candidate pair — the same round-robin-by-current-load
/// rule `assign_strategic_accounts` uses for its own pool.
fn least_loaded_rep(reps: &[Rep], assignments: &[Assignment]) -> Option<RepId> {
    let mut load: HashMap<RepId, usize> = reps.iter().map(|r| (r.id.clone(), 0)).collect();
    for assignment in assignments {
        if let Some(count) = load.get_mut(&assignment.rep_id) {
            *count += 1;
        }
    }
    load.into_iter()
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
        .map(|(id, _)| id)
}

fn run_pass(
    data: &LoadedBuildData,
    reps_by_id: &HashMap<RepId, &Rep>,
    eligible_reps: &std::collections::HashSet<RepId>,
    is_customer_pass: bool,
    options: &EngineOptions,
    carried_arr: &HashMap<RepId, f64>,
) -> PassOutcome {
    let scope: Vec<&Account> = data
        .parent_ids
        .iter()
        .filter_map(|id| data.accounts.get(id))
        .filter(|a| is_customer_pass_account(a, &data.accounts) == is_customer_pass)
        .collect();

    let mut warnings = Vec::new();

    let strategic = assign_strategic_accounts(scope.iter().copied(), &data.strategic_reps);
    let strategic_ids: std::collections::HashSet<AccountId> =
        strategic.iter().map(|s| s.account_id.clone()).collect();

    let mut locks: HashMap<AccountId, LockResult> = HashMap::new();
    let today = chrono::Utc::now().date_naive();
    for account in scope.iter().copied().filter(|a| !strategic_ids.contains(&a.id)) {
        let backfill_lock = account.owner_id.as_ref().and_then(|owner_id| {
            let owner = reps_by_id.get(owner_id)?;
            match check_backfill(
                account,
                owner.is_backfill_source,
                owner.backfill_target_rep_id.clone(),
                eligible_reps,
                &data.config,
            ) {
                Ok(lock) => lock,
                Err(w) => {
                    warnings.push(w);
                    None
                }
            }
        });

        let lock = match backfill_lock {
            Some(lock) => Some(lock),
            None => match check_stability(account, eligible_reps, &data.config, today) {
                Ok(lock) => lock,
                Err(w) => {
                    warnings.push(w);
                    None
                }
            },
        };

        if let Some(lock) = lock {
            locks.insert(account.id.clone(), lock);
        }
    }

    let mut sales_tools_assignments: HashMap<AccountId, RepId> = HashMap::new();
    if let Some(bucket) = &options.sales_tools_bucket {
        for account in scope.iter().copied() {
            if strategic_ids.contains(&account.id) || locks.contains_key(&account.id) {
                continue;
            }
            if (bucket.predicate)(account) {
                sales_tools_assignments.insert(account.id.clone(), bucket.target_rep_id.clone());
            }
        }
    }

    let remaining: Vec<&Account> = scope
        .iter()
        .filter(|a| {
            !strategic_ids.contains(&a.id)
                && !locks.contains_key(&a.id)
                && !sales_tools_assignments.contains_key(&a.id)
        })
        .copied()
        .collect();

    let timeout = Duration::from_secs(data.config.solver.timeout_seconds);
    let solver_mode = options.solver_mode_override.unwrap_or(match options.mode {
        RunMode::Waterfall => SolverMode::Browser,
        RunMode::Relaxed => SolverMode::Cloud,
    });

    let solve_result = if remaining.is_empty() {
        Ok(SolveOutcome {
            x_selected: std::collections::HashSet::new(),
            feasibility_slack: HashMap::new(),
            solver_used: "none".to_string(),
            elapsed: Duration::from_secs(0),
        })
    } else {
        match options.mode {
            RunMode::Relaxed => solve_relaxed(
                &remaining,
                &data.regular_reps,
                &data.config,
                &data.pipeline_map,
                is_customer_pass,
                carried_arr,
                solver_mode,
                options.remote_solver,
                timeout,
            ),
            RunMode::Waterfall => solve_waterfall(
                &remaining,
                &data.regular_reps,
                &data.config,
                &data.pipeline_map,
                is_customer_pass,
                carried_arr,
                solver_mode,
                options.remote_solver,
                timeout,
            ),
        }
    };

    let solved = match solve_result {
        Ok(outcome) => outcome,
        Err(err) => {
            return PassOutcome {
                assignments: Vec::new(),
                quality: None,
                warnings,
                error: Some(err),
            }
        }
    };

    let mut pair_scores = HashMap::new();
    for account in &remaining {
        for rep in &data.regular_reps {
            pair_scores.insert(
                (account.id.clone(), rep.id.clone()),
                score_pair(account, rep, &data.config),
            );
        }
    }

    let postprocess_input = PostProcessInput {
        accounts: &data.accounts,
        parent_ids: &data.parent_ids,
        pair_scores: &pair_scores,
        locks: &locks,
        strategic: &strategic,
        solved: &solved,
        priority_reason_for_solved: territory_core::entities::PriorityReason::Residual,
    };

    let (mut assignments, capacity_warnings) = build_assignments(&postprocess_input);
    warnings.extend(capacity_warnings);

    let assigned_ids: std::collections::HashSet<AccountId> =
        assignments.iter().map(|a| a.account_id.clone()).collect();
    for account in &remaining {
        if assigned_ids.contains(&account.id) {
            continue;
        }
        warnings.push(EngineWarning::UnassignedAccount {
            account_id: account.id.to_string(),
        });
        if let Some(rep_id) = least_loaded_rep(&data.regular_reps, &assignments) {
            assignments.push(Assignment {
                account_id: account.id.clone(),
                rep_id,
                priority_reason: territory_core::entities::PriorityReason::Residual,
                scores: territory_core::entities::PairScores::default(),
                is_locked: false,
                is_strategic_pre_assignment: false,
                cascaded_from_parent: false,
            });
        }
    }

    for (account_id, rep_id) in sales_tools_assignments {
        assignments.push(Assignment {
            account_id,
            rep_id,
            priority_reason: territory_core::entities::PriorityReason::PriorityLevel(
                "sales_tools_bucket".to_string(),
            ),
            scores: territory_core::entities::PairScores::default(),
            is_locked: false,
            is_strategic_pre_assignment: false,
            cascaded_from_parent: false,
        });
    }

    let quality = compute_quality_metrics(
        &data.accounts,
        reps_by_id,
        &data.pipeline_map,
        &assignments,
        &solved,
        &data.config,
    );

    PassOutcome {
        assignments,
        quality: Some(quality),
        warnings,
        error: None,
    }
}

#[allow(clippy::too_many_arguments)]
fn solve_relaxed(
    accounts: &[&Account],
    reps: &[Rep],
    config: &LPConfiguration,
    pipeline_map: &HashMap<AccountId, f64>,
    is_customer_pass: bool,
    carried_arr: &HashMap<RepId, f64>,
    solver_mode: SolverMode,
    remote: Option<&dyn RemoteSolver>,
    timeout: Duration,
) -> Result<SolveOutcome, EngineError> {
    let reps_ref: Vec<&Rep> = reps.iter().collect();
    let coefficients = build_coefficients(accounts, &reps_ref, config, is_customer_pass);
    let ctx = PassContext {
        accounts: accounts.to_vec(),
        reps: reps_ref,
        locks: HashMap::new(),
        coefficients,
        is_customer_pass,
        waterfall: false,
        config,
        pipeline_map,
        carried_arr: carried_arr.clone(),
    };
    dispatch(&ctx, solver_mode, remote, timeout)
}

#[allow(clippy::too_many_arguments)]
fn solve_waterfall(
    accounts: &[&Account],
    reps: &[Rep],
    config: &LPConfiguration,
    pipeline_map: &HashMap<AccountId, f64>,
    is_customer_pass: bool,
    carried_arr: &HashMap<RepId, f64>,
    solver_mode: SolverMode,
    remote: Option<&dyn RemoteSolver>,
    timeout: Duration,
) -> Result<SolveOutcome, EngineError> {
    let reps_ref: Vec<&Rep> = reps.iter().collect();
    let levels = waterfall_levels(config, is_customer_pass);

    let mut remaining: Vec<&Account> = accounts.to_vec();
    let mut x_selected = std::collections::HashSet::new();
    let mut feasibility_slack: HashMap<RepId, f64> = HashMap::new();
    let mut total_elapsed = Duration::from_secs(0);
    let mut last_solver = "none".to_string();

    for (wc, wg, wt) in levels {
        if remaining.is_empty() {
            break;
        }
        let coefficients = build_level_coefficients(&remaining, &reps_ref, config, wc, wg, wt);
        let ctx = PassContext {
            accounts: remaining.clone(),
            reps: reps_ref.clone(),
            locks: HashMap::new(),
            coefficients,
            is_customer_pass,
            waterfall: true,
            config,
            pipeline_map,
            carried_arr: carried_arr.clone(),
        };
        let outcome = dispatch(&ctx, solver_mode, remote, timeout)?;
        total_elapsed += outcome.elapsed;
        last_solver = outcome.solver_used.clone();
        for (rep_id, slack) in outcome.feasibility_slack {
            *feasibility_slack.entry(rep_id).or_insert(0.0) += slack;
        }

        let assigned_here: std::collections::HashSet<AccountId> =
            outcome.x_selected.iter().map(|(a, _)| a.clone()).collect();
        remaining.retain(|a| !assigned_here.contains(&a.id));
        x_selected.extend(outcome.x_selected);
    }

    Ok(SolveOutcome {
        x_selected,
        feasibility_slack,
        solver_used: last_solver,
        elapsed: total_elapsed,
    })
}

/// Waterfall weight vectors per level (§6.4: each scoring priority item is one
/// LP sub-solve level isolating that single dimension; a final catch-all
/// level uses the balanced default in case upstream levels leave a residual
/// account unassigned due to capacity infeasibility).
fn waterfall_levels(config: &LPConfiguration, is_customer_pass: bool) -> Vec<(f64, f64, f64)> {
    let mut levels = Vec::new();
    let items = if config.priority_config.is_empty() {
        vec![
            PriorityItem::TeamAlignment,
            PriorityItem::GeoAndContinuity,
            PriorityItem::Continuity,
            PriorityItem::Geography,
        ]
    } else {
        config.priority_config.clone()
    };
    for item in items {
        let weights = match item {
            PriorityItem::TeamAlignment => Some((0.0, 0.0, 1.0)),
            PriorityItem::GeoAndContinuity => Some((0.5, 0.5, 0.0)),
            PriorityItem::Continuity => Some((1.0, 0.0, 0.0)),
            PriorityItem::Geography => Some((0.0, 1.0, 0.0)),
            PriorityItem::ManualHoldover
            | PriorityItem::SalesToolsBucket
            | PriorityItem::StabilityAccounts => None,
            PriorityItem::Residual => Some(derive_weights(&[], is_customer_pass)),
        };
        if let Some(w) = weights {
            levels.push(w);
        }
    }
    levels.push(territory_score::scoring::default_weights(is_customer_pass));
    levels
}

fn build_coefficients(
    accounts: &[&Account],
    reps: &[&Rep],
    config: &LPConfiguration,
    is_customer_pass: bool,
) -> HashMap<(AccountId, RepId), f64> {
    let (wc, wg, wt) = derive_weights(&config.priority_config, is_customer_pass);
    build_level_coefficients(accounts, reps, config, wc, wg, wt)
}

fn build_level_coefficients(
    accounts: &[&Account],
    reps: &[&Rep],
    config: &LPConfiguration,
    wc: f64,
    wg: f64,
    wt: f64,
) -> HashMap<(AccountId, RepId), f64> {
    let bonuses: HashMap<String, f64> = rank_bonuses(accounts.iter().copied()).into_iter().collect();
    let mut coefficients = HashMap::new();
    for account in accounts {
        let bonus = bonuses.get(account.id.as_str()).copied().unwrap_or(0.0);
        for rep in reps {
            let scores = score_pair(account, rep, config);
            let coeff = assemble_coefficient(&scores, wc, wg, wt, bonus);
            coefficients.insert((account.id.clone(), rep.id.clone()), coeff);
        }
    }
    coefficients
}
