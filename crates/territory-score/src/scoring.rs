//! Pair scoring, weight derivation, and coefficient assembly (§4.3, C3).

use territory_core::calc::{
    classify_geo_match, continuity_score, geo_score_analytics, geo_score_for_lp, resolve_geo_path,
    team_alignment_score, GeoMatch,
};
use territory_core::config::LPConfiguration;
use territory_core::entities::{Account, Rep, TeamTier};

/// ε used for the rank-bonus tiebreak term in the objective coefficient.
pub const RANK_BONUS_EPSILON: f64 = 1e-3;

/// Default weights when `priority_config` is empty (§4.3).
pub fn default_weights(is_customer_pass: bool) -> (f64, f64, f64) {
    if is_customer_pass {
        (0.35, 0.35, 0.30)
    } else {
        (0.20, 0.45, 0.35)
    }
}

/// Derive `(w_continuity, w_geography, w_team)` from the ordered priority
/// list.
///
/// Raw weight of position `i` (0-based, in the *original* list — so
/// non-scoring items like `manual_holdover` still push later scoring items
/// down) is `1/(i+1)`. `geo_and_continuity` splits its raw weight evenly
/// between continuity and geography. Only scoring-relevant items
/// (`continuity`, `geography`, `team_alignment`, `geo_and_continuity`)
/// contribute to the normalization denominator — this is what keeps the
/// three weights summing to exactly 1 regardless of how many non-scoring
/// items (manual_holdover, sales_tools_bucket, stability_accounts, residual)
/// are interspersed; those items only affect waterfall level ordering (§6.4),
/// never the relaxed-mode objective weights.
pub fn derive_weights(
    priority_config: &[territory_core::config::PriorityItem],
    is_customer_pass: bool,
) -> (f64, f64, f64) {
    use territory_core::config::PriorityItem::*;

    if priority_config.is_empty() {
        return default_weights(is_customer_pass);
    }

    let mut wc = 0.0;
    let mut wg = 0.0;
    let mut wt = 0.0;
    let mut total = 0.0;

    for (i, item) in priority_config.iter().enumerate() {
        let raw = 1.0 / (i as f64 + 1.0);
        match item {
            Continuity => {
                wc += raw;
                total += raw;
            }
            Geography => {
                wg += raw;
                total += raw;
            }
            TeamAlignment => {
                wt += raw;
                total += raw;
            }
            GeoAndContinuity => {
                wc += raw / 2.0;
                wg += raw / 2.0;
                total += raw;
            }
            ManualHoldover | SalesToolsBucket | StabilityAccounts | Residual => {}
        }
    }

    if total < 1e-12 {
        return default_weights(is_customer_pass);
    }
    (wc / total, wg / total, wt / total)
}

/// Raw per-dimension scores for one (account, rep) pair, kept at the scale
/// each consumer needs: `geo_analytics` for rationale/quality metrics,
/// `geo_lp` for the MILP objective (§9 open question: the two geography
/// scales are kept distinct rather than silently unified).
#[derive(Debug, Clone, Copy)]
pub struct PairScoreSet {
    pub continuity: f64,
    pub geo_match: GeoMatch,
    pub geo_analytics: f64,
    pub geo_lp: f64,
    pub team_alignment: Option<f64>,
}

pub fn score_pair(account: &Account, rep: &Rep, config: &LPConfiguration) -> PairScoreSet {
    let continuity = continuity_score(account, rep, &config.continuity);

    let account_geo = account
        .sales_territory
        .as_deref()
        .or(account.geo.as_deref())
        .map(|t| resolve_geo_path(t, config));
    let rep_geo = rep.region.as_deref().map(|t| resolve_geo_path(t, config));
    let geo_match = classify_geo_match(account_geo.as_ref(), rep_geo.as_ref());

    let account_tier = TeamTier::from_employees(account.employees);
    let team_alignment = team_alignment_score(account_tier, rep.team_tier, &config.team);

    PairScoreSet {
        continuity,
        geo_match,
        geo_analytics: geo_score_analytics(geo_match),
        geo_lp: geo_score_for_lp(geo_match, &config.geography),
        team_alignment,
    }
}

/// Deterministic ARR-descending rank bonus (§4.3): `1 - rank/|A|`, ties
/// broken by account id so repeated runs over identical inputs are
/// bit-identical.
pub fn rank_bonuses<'a>(accounts: impl Iterator<Item = &'a Account>) -> Vec<(String, f64)> {
    let mut entries: Vec<(String, f64)> = accounts
        .map(|a| (a.id.as_str().to_string(), territory_core::calc::account_arr(a)))
        .collect();
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(&b.0)));
    let n = entries.len().max(1) as f64;
    entries
        .into_iter()
        .enumerate()
        .map(|(rank, (id, _))| (id, 1.0 - rank as f64 / n))
        .collect()
}

/// Assemble the objective coefficient for variable `x_{a,r}` (§4.3).
///
/// When `team_alignment` is `None`, `w_team` is redistributed proportionally
/// between `w_continuity` and `w_geography` before combining (§8 property 9),
/// preserving `wC' + wG' = wC + wG + wT`.
pub fn assemble_coefficient(
    scores: &PairScoreSet,
    w_continuity: f64,
    w_geography: f64,
    w_team: f64,
    rank_bonus: f64,
) -> f64 {
    match scores.team_alignment {
        Some(team) => {
            w_continuity * scores.continuity
                + w_geography * scores.geo_lp
                + w_team * team
                + RANK_BONUS_EPSILON * rank_bonus
        }
        None => {
            let base = w_continuity + w_geography;
            let (wc_prime, wg_prime) = if base > 1e-12 {
                (
                    w_continuity + w_team * (w_continuity / base),
                    w_geography + w_team * (w_geography / base),
                )
            } else {
                (w_continuity + w_team / 2.0, w_geography + w_team / 2.0)
            };
            wc_prime * scores.continuity + wg_prime * scores.geo_lp + RANK_BONUS_EPSILON * rank_bonus
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use territory_core::config::PriorityItem;
    use territory_core::entities::{AccountId, RepId};

    fn account_with_arr(id: &str, arr: f64) -> Account {
        Account {
            id: AccountId::new(id),
            parent_id: None,
            is_customer_flag: false,
            is_strategic: false,
            exclude_from_reassignment: false,
            arr: Some(arr),
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
            child_ids: Vec::new(),
        }
    }

    fn rep(id: &str) -> Rep {
        Rep {
            id: RepId::new(id),
            name: id.into(),
            region: None,
            team_tier: None,
            is_active: true,
            include_in_assignments: true,
            is_manager: false,
            is_strategic_rep: false,
            is_backfill_source: false,
            is_backfill_target: false,
            backfill_target_rep_id: None,
        }
    }

    #[test]
    fn empty_priority_config_uses_defaults() {
        assert_eq!(derive_weights(&[], true), (0.35, 0.35, 0.30));
        assert_eq!(derive_weights(&[], false), (0.20, 0.45, 0.35));
    }

    #[test]
    fn weights_sum_to_one_for_nonempty_config() {
        let config = vec![
            PriorityItem::TeamAlignment,
            PriorityItem::GeoAndContinuity,
            PriorityItem::Continuity,
        ];
        let (wc, wg, wt) = derive_weights(&config, true);
        assert!((wc + wg + wt - 1.0).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&wc));
        assert!((0.0..=1.0).contains(&wg));
        assert!((0.0..=1.0).contains(&wt));
    }

    #[test]
    fn non_scoring_items_do_not_dilute_weights() {
        let config = vec![PriorityItem::ManualHoldover, PriorityItem::Continuity];
        let (wc, wg, wt) = derive_weights(&config, true);
        assert_eq!(wc, 1.0);
        assert_eq!(wg, 0.0);
        assert_eq!(wt, 0.0);
    }

    #[test]
    fn geo_and_continuity_splits_evenly() {
        let config = vec![PriorityItem::GeoAndContinuity];
        let (wc, wg, wt) = derive_weights(&config, true);
        assert_eq!(wc, 0.5);
        assert_eq!(wg, 0.5);
        assert_eq!(wt, 0.0);
    }

    #[test]
    fn only_non_scoring_items_falls_back_to_default() {
        let config = vec![PriorityItem::ManualHoldover, PriorityItem::Residual];
        assert_eq!(derive_weights(&config, true), default_weights(true));
    }

    #[test]
    fn rank_bonus_highest_arr_gets_one() {
        let a = account_with_arr("a1", 1000.0);
        let b = account_with_arr("a2", 10.0);
        let bonuses = rank_bonuses(vec![&a, &b].into_iter());
        let map: std::collections::HashMap<_, _> = bonuses.into_iter().collect();
        assert_eq!(map["a1"], 1.0);
        assert!(map["a2"] < 1.0);
    }

    #[test]
    fn coefficient_redistributes_weight_when_team_is_na() {
        let scores = PairScoreSet {
            continuity: 0.5,
            geo_match: GeoMatch::ExactRegion,
            geo_analytics: 1.0,
            geo_lp: 1.0,
            team_alignment: None,
        };
        let with_team = assemble_coefficient(&scores, 0.35, 0.35, 0.30, 0.0);
        let without = assemble_coefficient(&scores, 0.35, 0.35, 0.30, 0.0);
        // team_alignment is None in both calls above; verify total weight mass
        // (0.35+0.35+0.30=1.0) is preserved in the combined coefficient by
        // comparing against a manual expansion.
        let base = 0.35 + 0.35;
        let wc_prime = 0.35 + 0.30 * (0.35 / base);
        let wg_prime = 0.35 + 0.30 * (0.35 / base);
        let expected = wc_prime * 0.5 + wg_prime * 1.0;
        assert!((with_team - expected).abs() < 1e-9);
        assert!((without - expected).abs() < 1e-9);
    }

    #[test]
    fn score_pair_continuity_matches_owner() {
        let mut a = account_with_arr("a1", 500.0);
        a.owner_id = Some(RepId::new("r1"));
        let r = rep("r1");
        let config = LPConfiguration::default();
        let scores = score_pair(&a, &r, &config);
        assert!(scores.continuity > 0.0);
    }
}
