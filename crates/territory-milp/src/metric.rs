//! Balance metrics, per-rep targets, and penalty weights (§4.5.1-4.5.2).

use std::collections::HashMap;

use territory_core::calc::{account_arr, account_atr};
use territory_core::entities::{Account, AccountId, RepId};
use territory_data::{account_size_tier, SizeTier};

/// The metric dimensions the three-zone balance decomposition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Arr,
    Atr,
    Pipeline,
    Tier(SizeTier),
}

impl Metric {
    pub fn label(self) -> String {
        match self {
            Metric::Arr => "arr".to_string(),
            Metric::Atr => "atr".to_string(),
            Metric::Pipeline => "pipeline".to_string(),
            Metric::Tier(t) => t.label().to_string(),
        }
    }

    /// Per-rep slack variance bound (§4.5.3 item 5): ARR 0.10, ATR/pipeline
    /// 0.15, tier metrics 0.50.
    pub fn alpha_variance(self) -> f64 {
        match self {
            Metric::Arr => 0.10,
            Metric::Atr | Metric::Pipeline => 0.15,
            Metric::Tier(_) => 0.50,
        }
    }
}

/// Which metrics are active for a pass under a given mode (§4.5.4: waterfall
/// only ever balances ARR; relaxed mode balances every enabled metric).
pub fn active_metrics(is_customer_pass: bool, waterfall: bool, balance: &territory_core::config::BalanceToggles) -> Vec<Metric> {
    if waterfall {
        return if balance.arr_balance_enabled {
            vec![Metric::Arr]
        } else {
            Vec::new()
        };
    }

    let mut metrics = Vec::new();
    if balance.arr_balance_enabled {
        metrics.push(Metric::Arr);
    }
    if is_customer_pass && balance.atr_balance_enabled {
        metrics.push(Metric::Atr);
    }
    if !is_customer_pass && balance.pipeline_balance_enabled {
        metrics.push(Metric::Pipeline);
    }
    for tier in SizeTier::ALL {
        metrics.push(Metric::Tier(tier));
    }
    metrics
}

/// Objective metric weight table (§4.5.2): customer pass weighs ARR/ATR/tiers
/// 0.50/0.25/0.25 (tiers split 4 ways); prospect weighs pipeline/tiers
/// 0.50/0.50.
pub fn metric_weight(metric: Metric, is_customer_pass: bool) -> f64 {
    match (metric, is_customer_pass) {
        (Metric::Arr, true) => 0.50,
        (Metric::Atr, true) => 0.25,
        (Metric::Tier(_), true) => 0.0625,
        (Metric::Pipeline, false) => 0.50,
        (Metric::Tier(_), false) => 0.125,
        _ => 0.0,
    }
}

pub fn metric_value(metric: Metric, account: &Account, pipeline_map: &HashMap<AccountId, f64>) -> f64 {
    match metric {
        Metric::Arr => account_arr(account),
        Metric::Atr => account_atr(account),
        Metric::Pipeline => pipeline_map.get(&account.id).copied().unwrap_or(0.0),
        Metric::Tier(t) => {
            if account_size_tier(account) == Some(t) {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// `target_r = (Σ_a value_m(a)) / |R|` for every metric, shared equally
/// across all eligible reps (§4.5.3).
pub fn per_rep_targets(
    accounts: &[&Account],
    rep_ids: &[RepId],
    metrics: &[Metric],
    pipeline_map: &HashMap<AccountId, f64>,
) -> HashMap<Metric, f64> {
    let rep_count = rep_ids.len().max(1) as f64;
    let mut targets = HashMap::new();
    for &metric in metrics {
        let total: f64 = accounts.iter().map(|a| metric_value(metric, a, pipeline_map)).sum();
        targets.insert(metric, total / rep_count);
    }
    targets
}
