//! Strategic account pre-assignment (§4.4, component C4).

use std::collections::HashMap;

use territory_core::calc::account_arr;
use territory_core::entities::{Account, AccountId, PairScores, PriorityReason, Rep, RepId};

/// One pre-assigned strategic account, ready to fold into the final
/// assignment set without ever entering the MILP (§3.2 invariant 3).
#[derive(Debug, Clone)]
pub struct StrategicAssignment {
    pub account_id: AccountId,
    pub rep_id: RepId,
    pub scores: PairScores,
    pub priority_reason: PriorityReason,
}

/// Assign every strategic account (or account currently owned by a strategic
/// rep) to the least-loaded strategic rep, by ARR-balanced round robin
/// (§4.4).
///
/// Accounts are sorted by ARR descending first so the greedy least-loaded
/// pick approximates a balanced partition (classic longest-processing-time
/// heuristic for multiprocessor scheduling); ties broken by account id for
/// determinism.
pub fn assign_strategic_accounts<'a>(
    accounts: impl Iterator<Item = &'a Account>,
    strategic_reps: &[Rep],
) -> Vec<StrategicAssignment> {
    if strategic_reps.is_empty() {
        return Vec::new();
    }

    let strategic_rep_ids: std::collections::HashSet<RepId> =
        strategic_reps.iter().map(|r| r.id.clone()).collect();

    let mut candidates: Vec<&Account> = accounts
        .filter(|a| {
            a.is_strategic
                || a.owner_id
                    .as_ref()
                    .map(|o| strategic_rep_ids.contains(o))
                    .unwrap_or(false)
        })
        .collect();
    candidates.sort_by(|a, b| {
        account_arr(b)
            .partial_cmp(&account_arr(a))
            .unwrap()
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });

    let mut load: HashMap<RepId, f64> = strategic_reps.iter().map(|r| (r.id.clone(), 0.0)).collect();
    let mut results = Vec::with_capacity(candidates.len());

    for account in candidates {
        let (rep_id, _) = load
            .iter()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap().then_with(|| a.0.cmp(b.0)))
            .map(|(id, load)| (id.clone(), *load))
            .expect("strategic_reps is non-empty");

        *load.get_mut(&rep_id).unwrap() += account_arr(account);

        let stays = account.owner_id.as_ref() == Some(&rep_id);
        results.push(StrategicAssignment {
            account_id: account.id.clone(),
            rep_id,
            scores: PairScores {
                continuity: Some(if stays { 1.0 } else { 0.0 }),
                geography: Some(1.0),
                team_alignment: Some(1.0),
            },
            priority_reason: PriorityReason::Strategic,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use territory_core::entities::TeamTier;

    fn account(id: &str, arr: f64, strategic: bool) -> Account {
        Account {
            id: AccountId::new(id),
            parent_id: None,
            is_customer_flag: false,
            is_strategic: strategic,
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
            team_tier: Some(TeamTier::Ent),
            is_active: true,
            include_in_assignments: true,
            is_manager: false,
            is_strategic_rep: true,
            is_backfill_source: false,
            is_backfill_target: false,
            backfill_target_rep_id: None,
        }
    }

    #[test]
    fn balances_load_across_strategic_reps() {
        let accounts = vec![
            account("A1", 1000.0, true),
            account("A2", 900.0, true),
            account("A3", 100.0, true),
        ];
        let reps = vec![rep("R1"), rep("R2")];
        let assignments = assign_strategic_accounts(accounts.iter(), &reps);
        assert_eq!(assignments.len(), 3);
        let r1_total: f64 = assignments
            .iter()
            .filter(|a| a.rep_id == RepId::new("R1"))
            .map(|a| {
                accounts
                    .iter()
                    .find(|acc| acc.id == a.account_id)
                    .map(account_arr)
                    .unwrap()
            })
            .sum();
        let r2_total: f64 = assignments
            .iter()
            .filter(|a| a.rep_id == RepId::new("R2"))
            .map(|a| {
                accounts
                    .iter()
                    .find(|acc| acc.id == a.account_id)
                    .map(account_arr)
                    .unwrap()
            })
            .sum();
        assert!((r1_total - r2_total).abs() <= 1000.0);
    }

    #[test]
    fn no_strategic_reps_yields_no_assignments() {
        let accounts = vec![account("A1", 100.0, true)];
        let assignments = assign_strategic_accounts(accounts.iter(), &[]);
        assert!(assignments.is_empty());
    }

    #[test]
    fn non_strategic_account_owned_by_strategic_rep_is_included() {
        let mut acc = account("A1", 100.0, false);
        acc.owner_id = Some(RepId::new("R1"));
        let reps = vec![rep("R1")];
        let assignments = assign_strategic_accounts(std::iter::once(&acc), &reps);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].rep_id, RepId::new("R1"));
    }
}
