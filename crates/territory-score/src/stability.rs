//! Stability lock identification (§4.4, component C4).

use std::collections::HashSet;

use territory_core::config::LPConfiguration;
use territory_core::entities::{Account, LockReason, RepId};
use territory_core::error::EngineWarning;

/// A binding stability lock: the account must be assigned to `target_rep_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct LockResult {
    pub target_rep_id: RepId,
    pub reason: LockReason,
}

/// Evaluate the fixed-order lock rules (§4.4) for one account.
///
/// Returns `Ok(None)` when no rule matches. Returns `Err(warning)` when a
/// rule matches but its target rep is ineligible — the caller should surface
/// the warning and let the account enter optimization unlocked, per §4.4:
/// "A lock binds only if its target rep is eligible; otherwise lock is
/// dropped and the account enters optimization." Evaluation stops at the
/// first matching rule; it does not fall through to later rules when the
/// match is dropped.
pub fn check_stability(
    account: &Account,
    eligible_reps: &HashSet<RepId>,
    config: &LPConfiguration,
    today: chrono::NaiveDate,
) -> Result<Option<LockResult>, EngineWarning> {
    let Some(owner_id) = account.owner_id.clone() else {
        return Ok(None);
    };

    if account.exclude_from_reassignment {
        return bind_or_drop(account, owner_id, LockReason::ManualHold, eligible_reps);
    }

    // Rule 2 (backfill migration) needs the owner rep's record, which this
    // function doesn't have; the caller runs `check_backfill` first and only
    // calls into here when that rule didn't match.

    if config.stability.cre_risk_locked && account.cre_risk {
        return bind_or_drop(account, owner_id, LockReason::CreRisk, eligible_reps);
    }

    if config.stability.renewal_soon_locked {
        if let Some(renewal_date) = account.renewal_date {
            let days_until = (renewal_date - today).num_days();
            if days_until <= config.stability.renewal_soon_days {
                return bind_or_drop(account, owner_id, LockReason::RenewalSoon, eligible_reps);
            }
        }
    }

    if config.stability.pe_firm_locked && account.pe_firm.is_some() {
        return bind_or_drop(account, owner_id, LockReason::PeFirm, eligible_reps);
    }

    if config.stability.recent_change_locked {
        if let Some(changed) = account.owner_change_date {
            let days_since = (today - changed).num_days();
            if days_since >= 0 && days_since <= config.stability.recent_change_days {
                return bind_or_drop(account, owner_id, LockReason::RecentOwnerChange, eligible_reps);
            }
        }
    }

    Ok(None)
}

/// Rule 2: owner is a backfill source and backfill migration is enabled.
/// Evaluated separately because it needs the owner rep's record, not just the
/// account.
pub fn check_backfill(
    account: &Account,
    owner_is_backfill_source: bool,
    owner_backfill_target: Option<RepId>,
    eligible_reps: &HashSet<RepId>,
    config: &LPConfiguration,
) -> Result<Option<LockResult>, EngineWarning> {
    if !config.stability.backfill_migration_enabled || !owner_is_backfill_source {
        return Ok(None);
    }
    match owner_backfill_target {
        Some(target) if eligible_reps.contains(&target) => Ok(Some(LockResult {
            target_rep_id: target,
            reason: LockReason::BackfillMigration,
        })),
        Some(target) => Err(EngineWarning::LockDropped {
            account_id: account.id.to_string(),
            reason: format!("backfill target {target} is not eligible"),
        }),
        None => Err(EngineWarning::LockDropped {
            account_id: account.id.to_string(),
            reason: "backfill source has no configured target rep".to_string(),
        }),
    }
}

fn bind_or_drop(
    account: &Account,
    target: RepId,
    reason: LockReason,
    eligible_reps: &HashSet<RepId>,
) -> Result<Option<LockResult>, EngineWarning> {
    if eligible_reps.contains(&target) {
        Ok(Some(LockResult {
            target_rep_id: target,
            reason,
        }))
    } else {
        Err(EngineWarning::LockDropped {
            account_id: account.id.to_string(),
            reason: format!("{} target {target} is not eligible", reason.label()),
        })
    }
}
