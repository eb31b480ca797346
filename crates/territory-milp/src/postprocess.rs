//! Post-processing: decode, cascade, rationale, quality metrics (§4.6 items 1-5).

use std::collections::{HashMap, HashSet};

use territory_core::calc::{account_arr, account_atr, classify_geo_match, resolve_geo_path};
use territory_core::config::LPConfiguration;
use territory_core::entities::{
    Account, AccountId, Assignment, LockReason, PairScores, PriorityReason, Rep, RepId, TeamTier,
};
use territory_core::error::EngineWarning;
use territory_score::scoring::PairScoreSet;
use territory_score::stability::LockResult;
use territory_score::strategic::StrategicAssignment;

use crate::dispatch::SolveOutcome;

pub struct PostProcessInput<'a> {
    pub accounts: &'a HashMap<AccountId, Account>,
    pub parent_ids: &'a [AccountId],
    pub pair_scores: &'a HashMap<(AccountId, RepId), PairScoreSet>,
    pub locks: &'a HashMap<AccountId, LockResult>,
    pub strategic: &'a [StrategicAssignment],
    pub solved: &'a SolveOutcome,
    /// Priority reason attached to every account the solver (not a lock or
    /// strategic pre-assignment) placed: a waterfall level label, or
    /// `Residual` in relaxed mode.
    pub priority_reason_for_solved: PriorityReason,
}

/// Build the final assignment set for one pass: pre-assignments (strategic,
/// locked), solver output, then cascade onto children (§4.6 items 1-2).
pub fn build_assignments(input: &PostProcessInput) -> (Vec<Assignment>, Vec<EngineWarning>) {
    let mut by_account: HashMap<AccountId, Assignment> = HashMap::new();
    let mut warnings = Vec::new();

    for strategic in input.strategic {
        by_account.insert(
            strategic.account_id.clone(),
            Assignment {
                account_id: strategic.account_id.clone(),
                rep_id: strategic.rep_id.clone(),
                priority_reason: strategic.priority_reason.clone(),
                scores: strategic.scores,
                is_locked: false,
                is_strategic_pre_assignment: true,
                cascaded_from_parent: false,
            },
        );
    }

    for (account_id, lock) in input.locks {
        let scores = input
            .pair_scores
            .get(&(account_id.clone(), lock.target_rep_id.clone()))
            .map(|s| PairScores {
                continuity: Some(s.continuity),
                geography: Some(s.geo_lp),
                team_alignment: s.team_alignment,
            })
            .unwrap_or_default();
        by_account.insert(
            account_id.clone(),
            Assignment {
                account_id: account_id.clone(),
                rep_id: lock.target_rep_id.clone(),
                priority_reason: PriorityReason::Lock(lock.reason),
                scores,
                is_locked: true,
                is_strategic_pre_assignment: false,
                cascaded_from_parent: false,
            },
        );
    }

    for (account_id, rep_id) in &input.solved.x_selected {
        if by_account.contains_key(account_id) {
            continue;
        }
        let scores = input
            .pair_scores
            .get(&(account_id.clone(), rep_id.clone()))
            .map(|s| PairScores {
                continuity: Some(s.continuity),
                geography: Some(s.geo_lp),
                team_alignment: s.team_alignment,
            })
            .unwrap_or_default();
        by_account.insert(
            account_id.clone(),
            Assignment {
                account_id: account_id.clone(),
                rep_id: rep_id.clone(),
                priority_reason: input.priority_reason_for_solved.clone(),
                scores,
                is_locked: false,
                is_strategic_pre_assignment: false,
                cascaded_from_parent: false,
            },
        );
    }

    // Cascade parent -> children (§8 invariant 2).
    let mut cascaded = Vec::new();
    for parent_id in input.parent_ids {
        let Some(parent_assignment) = by_account.get(parent_id) else {
            continue;
        };
        let Some(parent) = input.accounts.get(parent_id) else {
            continue;
        };
        for child_id in &parent.child_ids {
            cascaded.push(Assignment {
                account_id: child_id.clone(),
                rep_id: parent_assignment.rep_id.clone(),
                priority_reason: PriorityReason::ChildFollowsParent,
                scores: parent_assignment.scores,
                is_locked: false,
                is_strategic_pre_assignment: false,
                cascaded_from_parent: true,
            });
        }
    }
    for assignment in cascaded {
        by_account.insert(assignment.account_id.clone(), assignment);
    }

    for (rep_id, overflow) in &input.solved.feasibility_slack {
        if *overflow > 1e-9 {
            warnings.push(EngineWarning::CapacityOverflow {
                rep_id: rep_id.to_string(),
                overflow_arr: *overflow,
            });
        }
    }

    let mut assignments: Vec<Assignment> = by_account.into_values().collect();
    assignments.sort_by(|a, b| a.account_id.as_str().cmp(b.account_id.as_str()));
    (assignments, warnings)
}

/// Human-readable rationale for one assignment (§4.6 item 3): names the
/// priority reason, then the scoring dimension that contributed most.
pub fn rationale_for(assignment: &Assignment) -> String {
    let reason = match &assignment.priority_reason {
        PriorityReason::Lock(reason) => format!("stability lock ({})", reason.label()),
        PriorityReason::Strategic => "strategic account pre-assignment".to_string(),
        PriorityReason::PriorityLevel(label) => format!("waterfall priority level '{label}'"),
        PriorityReason::ChildFollowsParent => "child follows parent".to_string(),
        PriorityReason::Residual => "optimized assignment".to_string(),
    };

    if matches!(assignment.priority_reason, PriorityReason::Lock(LockReason::BackfillMigration)) {
        return format!("{reason}: account routed via backfill migration");
    }

    let dims = [
        ("continuity", assignment.scores.continuity),
        ("geography", assignment.scores.geography),
        ("team alignment", assignment.scores.team_alignment),
    ];
    let top = dims
        .into_iter()
        .filter_map(|(name, score)| score.map(|s| (name, s)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

    match top {
        Some((name, score)) => format!("{reason}; strongest factor: {name} ({score:.2})"),
        None => reason,
    }
}

/// Quality metrics reported alongside every pass (§8).
#[derive(Debug, Clone, Default)]
pub struct QualityMetrics {
    pub arr_variance_percent: f64,
    pub atr_variance_percent: f64,
    pub pipeline_variance_percent: f64,
    pub continuity_rate: f64,
    pub geo_exact_match_rate: f64,
    pub geo_sibling_match_rate: f64,
    pub cross_region_rate: f64,
    pub tier_exact_match_rate: f64,
    pub tier_one_level_rate: f64,
    pub reps_over_capacity: usize,
    pub feasibility_slack_total: f64,
}

fn coefficient_of_variation_percent(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean.abs() < 1e-9 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (variance.sqrt() / mean) * 100.0
}

#[allow(clippy::too_many_arguments)]
pub fn compute_quality_metrics(
    accounts: &HashMap<AccountId, Account>,
    reps_by_id: &HashMap<RepId, &Rep>,
    pipeline_map: &HashMap<AccountId, f64>,
    assignments: &[Assignment],
    solved: &SolveOutcome,
    config: &LPConfiguration,
) -> QualityMetrics {
    let mut rep_arr: HashMap<RepId, f64> = HashMap::new();
    let mut rep_atr: HashMap<RepId, f64> = HashMap::new();
    let mut rep_pipeline: HashMap<RepId, f64> = HashMap::new();

    let mut continuity_eligible = 0usize;
    let mut continuity_kept = 0usize;
    let mut geo_exact = 0usize;
    let mut geo_sibling = 0usize;
    let mut geo_cross = 0usize;
    let mut geo_total = 0usize;
    let mut tier_exact = 0usize;
    let mut tier_one_level = 0usize;
    let mut tier_total = 0usize;

    for assignment in assignments {
        let Some(account) = accounts.get(&assignment.account_id) else {
            continue;
        };
        *rep_arr.entry(assignment.rep_id.clone()).or_insert(0.0) += account_arr(account);
        *rep_atr.entry(assignment.rep_id.clone()).or_insert(0.0) += account_atr(account);
        *rep_pipeline.entry(assignment.rep_id.clone()).or_insert(0.0) +=
            pipeline_map.get(&account.id).copied().unwrap_or(0.0);

        if let Some(owner_id) = &account.owner_id {
            if reps_by_id.contains_key(owner_id) {
                let owner_is_backfill_source = reps_by_id
                    .get(owner_id)
                    .map(|r| r.is_backfill_source)
                    .unwrap_or(false);
                if !owner_is_backfill_source {
                    continuity_eligible += 1;
                    if &assignment.rep_id == owner_id {
                        continuity_kept += 1;
                    }
                }
            }
        }

        if let Some(rep) = reps_by_id.get(&assignment.rep_id) {
            let account_geo = account
                .sales_territory
                .as_deref()
                .or(account.geo.as_deref())
                .map(|t| resolve_geo_path(t, config));
            let rep_geo = rep.region.as_deref().map(|t| resolve_geo_path(t, config));
            let geo_match = classify_geo_match(account_geo.as_ref(), rep_geo.as_ref());
            geo_total += 1;
            match geo_match {
                territory_core::calc::GeoMatch::ExactRegion => geo_exact += 1,
                territory_core::calc::GeoMatch::SameSubRegion => geo_sibling += 1,
                territory_core::calc::GeoMatch::CrossMacroRegion => geo_cross += 1,
                _ => {}
            }

            if let Some(account_tier) = TeamTier::from_employees(account.employees) {
                if let Some(rep_tier) = rep.team_tier {
                    tier_total += 1;
                    let distance = account_tier.distance(rep_tier);
                    if distance == 0 {
                        tier_exact += 1;
                    }
                    if distance <= 1 {
                        tier_one_level += 1;
                    }
                }
            }
        }
    }

    let rate = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    QualityMetrics {
        arr_variance_percent: coefficient_of_variation_percent(&rep_arr.values().copied().collect::<Vec<_>>()),
        atr_variance_percent: coefficient_of_variation_percent(&rep_atr.values().copied().collect::<Vec<_>>()),
        pipeline_variance_percent: coefficient_of_variation_percent(
            &rep_pipeline.values().copied().collect::<Vec<_>>(),
        ),
        continuity_rate: rate(continuity_kept, continuity_eligible),
        geo_exact_match_rate: rate(geo_exact, geo_total),
        geo_sibling_match_rate: rate(geo_sibling, geo_total),
        cross_region_rate: rate(geo_cross, geo_total),
        tier_exact_match_rate: rate(tier_exact, tier_total),
        tier_one_level_rate: rate(tier_one_level, tier_total),
        reps_over_capacity: solved.feasibility_slack.values().filter(|&&v| v > 1e-9).count(),
        feasibility_slack_total: solved.feasibility_slack.values().sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str) -> Account {
        Account {
            id: AccountId::new(id),
            parent_id: None,
            is_customer_flag: false,
            is_strategic: false,
            exclude_from_reassignment: false,
            arr: Some(100.0),
            calculated_arr: None,
            hierarchy_bookings_arr: None,
            direct_atr: 0.0,
            atr: 0.0,
            pipeline_value: 0.0,
            employees: None,
            sales_territory: None,
            geo: None,
            expansion_tier: None,
            initial_sale_tier: None,
            pe_firm: None,
            cre_risk: false,
            renewal_date: None,
            owner_id: None,
            owner_change_date: None,
            owners_lifetime_count: 1,
            child_ids: vec![AccountId::new("C1")],
        }
    }

    #[test]
    fn cascade_propagates_parent_rep_to_children() {
        let mut accounts = HashMap::new();
        accounts.insert(AccountId::new("P"), account("P"));
        let mut child = account("C1");
        child.parent_id = Some(AccountId::new("P"));
        child.child_ids.clear();
        accounts.insert(AccountId::new("C1"), child);

        let mut x_selected = HashSet::new();
        x_selected.insert((AccountId::new("P"), RepId::new("R1")));
        let solved = SolveOutcome {
            x_selected,
            feasibility_slack: HashMap::new(),
            solver_used: "highs".into(),
            elapsed: std::time::Duration::from_millis(1),
        };

        let input = PostProcessInput {
            accounts: &accounts,
            parent_ids: &[AccountId::new("P")],
            pair_scores: &HashMap::new(),
            locks: &HashMap::new(),
            strategic: &[],
            solved: &solved,
            priority_reason_for_solved: PriorityReason::Residual,
        };

        let (assignments, _) = build_assignments(&input);
        let child = assignments.iter().find(|a| a.account_id == AccountId::new("C1")).unwrap();
        assert_eq!(child.rep_id, RepId::new("R1"));
        assert!(child.cascaded_from_parent);
    }

    #[test]
    fn overflow_slack_emits_warning() {
        let accounts = HashMap::new();
        let mut feasibility_slack = HashMap::new();
        feasibility_slack.insert(RepId::new("R1"), 500.0);
        let solved = SolveOutcome {
            x_selected: HashSet::new(),
            feasibility_slack,
            solver_used: "highs".into(),
            elapsed: std::time::Duration::from_millis(1),
        };
        let input = PostProcessInput {
            accounts: &accounts,
            parent_ids: &[],
            pair_scores: &HashMap::new(),
            locks: &HashMap::new(),
            strategic: &[],
            solved: &solved,
            priority_reason_for_solved: PriorityReason::Residual,
        };
        let (_, warnings) = build_assignments(&input);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], EngineWarning::CapacityOverflow { .. }));
    }
}
