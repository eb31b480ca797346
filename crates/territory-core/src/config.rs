//! Configuration surface (§6.3) and priority items (§6.4).
//!
//! `LPConfiguration` is deserialized with `deny_unknown_fields` so a typo or a
//! stale key is a hard configuration error rather than a silently ignored
//! setting (§9 "Configuration" design note).

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationModel {
    Waterfall,
    RelaxedOptimization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceIntensity {
    VeryLight,
    Light,
    Normal,
    Heavy,
    VeryHeavy,
}

impl BalanceIntensity {
    /// Multiplier applied uniformly to the α/β/M penalty constants (§4.5.2).
    pub fn multiplier(self) -> f64 {
        match self {
            BalanceIntensity::VeryLight => 0.1,
            BalanceIntensity::Light => 0.5,
            BalanceIntensity::Normal => 1.0,
            BalanceIntensity::Heavy => 10.0,
            BalanceIntensity::VeryHeavy => 100.0,
        }
    }
}

/// One entry of the user-ordered priority list (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityItem {
    ManualHoldover,
    SalesToolsBucket,
    StabilityAccounts,
    TeamAlignment,
    GeoAndContinuity,
    Continuity,
    Geography,
    Residual,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectiveWeights {
    pub continuity_weight: f64,
    pub geography_weight: f64,
    pub team_alignment_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BalanceToggles {
    pub arr_balance_enabled: bool,
    pub atr_balance_enabled: bool,
    pub pipeline_balance_enabled: bool,
}

impl Default for BalanceToggles {
    fn default() -> Self {
        Self {
            arr_balance_enabled: true,
            atr_balance_enabled: true,
            pipeline_balance_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StabilityConfig {
    pub cre_risk_locked: bool,
    pub renewal_soon_locked: bool,
    pub renewal_soon_days: i64,
    pub pe_firm_locked: bool,
    pub recent_change_locked: bool,
    pub recent_change_days: i64,
    pub backfill_migration_enabled: bool,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            cre_risk_locked: true,
            renewal_soon_locked: true,
            renewal_soon_days: 90,
            pe_firm_locked: true,
            recent_change_locked: true,
            recent_change_days: 90,
            backfill_migration_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContinuityConfig {
    pub tenure_weight: f64,
    pub tenure_max_days: f64,
    pub stability_weight: f64,
    pub stability_max_owners: f64,
    pub value_weight: f64,
    pub value_threshold: f64,
    pub base_continuity: f64,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            tenure_weight: 0.35,
            tenure_max_days: 730.0,
            stability_weight: 0.30,
            stability_max_owners: 5.0,
            value_weight: 0.25,
            value_threshold: 2_000_000.0,
            base_continuity: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeographyConfig {
    pub exact_match_score: f64,
    pub sibling_score: f64,
    pub parent_score: f64,
    pub global_score: f64,
    pub unknown_territory_score: f64,
}

impl Default for GeographyConfig {
    fn default() -> Self {
        Self {
            exact_match_score: 1.00,
            sibling_score: 0.65,
            parent_score: 0.40,
            global_score: 0.40,
            unknown_territory_score: 0.50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamScoreConfig {
    pub exact_match_score: f64,
    pub one_level_score: f64,
    pub two_level_score: f64,
    pub three_level_score: f64,
    pub reaching_down_penalty: f64,
    pub unknown_tier_score: f64,
}

impl Default for TeamScoreConfig {
    fn default() -> Self {
        Self {
            exact_match_score: 1.00,
            one_level_score: 0.60,
            two_level_score: 0.25,
            three_level_score: 0.05,
            reaching_down_penalty: 0.15,
            unknown_tier_score: 0.50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverConfig {
    pub timeout_seconds: u64,
    pub feasibility_penalty: f64,
    pub log_level: String,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            feasibility_penalty: 1000.0,
            log_level: "info".to_string(),
        }
    }
}

/// The full configuration bag (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LPConfiguration {
    pub optimization_model: OptimizationModel,
    pub priority_config: Vec<PriorityItem>,
    pub balance_intensity: BalanceIntensity,

    pub customer_target_arr: f64,
    pub customer_max_arr: f64,
    pub customer_min_arr: f64,
    pub prospect_target_arr: f64,
    pub prospect_max_arr: f64,
    pub prospect_min_arr: f64,

    pub atr_min: f64,
    pub atr_max: f64,
    pub atr_variance: f64,
    pub capacity_variance_percent: f64,
    pub prospect_variance_percent: f64,

    pub customer_objective: ObjectiveWeights,
    pub prospect_objective: ObjectiveWeights,

    pub balance: BalanceToggles,
    pub capacity_hard_cap_enabled: bool,
    pub hard_cap_arr: f64,

    pub stability: StabilityConfig,
    pub continuity: ContinuityConfig,
    pub geography: GeographyConfig,
    pub team: TeamScoreConfig,
    pub solver: SolverConfig,

    pub territory_mappings: HashMap<String, String>,
}

impl Default for LPConfiguration {
    fn default() -> Self {
        Self {
            optimization_model: OptimizationModel::RelaxedOptimization,
            priority_config: Vec::new(),
            balance_intensity: BalanceIntensity::Normal,
            customer_target_arr: 0.0,
            customer_max_arr: f64::INFINITY,
            customer_min_arr: 0.0,
            prospect_target_arr: 0.0,
            prospect_max_arr: f64::INFINITY,
            prospect_min_arr: 0.0,
            atr_min: 0.0,
            atr_max: f64::INFINITY,
            atr_variance: 0.15,
            capacity_variance_percent: 0.10,
            prospect_variance_percent: 0.15,
            customer_objective: ObjectiveWeights {
                continuity_weight: 0.35,
                geography_weight: 0.35,
                team_alignment_weight: 0.30,
            },
            prospect_objective: ObjectiveWeights {
                continuity_weight: 0.20,
                geography_weight: 0.45,
                team_alignment_weight: 0.35,
            },
            balance: BalanceToggles::default(),
            capacity_hard_cap_enabled: true,
            hard_cap_arr: f64::INFINITY,
            stability: StabilityConfig::default(),
            continuity: ContinuityConfig::default(),
            geography: GeographyConfig::default(),
            team: TeamScoreConfig::default(),
            solver: SolverConfig::default(),
            territory_mappings: HashMap::new(),
        }
    }
}

impl LPConfiguration {
    /// Validate numeric and enumeration invariants before any work starts
    /// (§7: `ConfigError` is fatal before any work).
    pub fn validate(&self) -> Result<(), EngineError> {
        let non_negative = [
            ("atr_variance", self.atr_variance),
            ("capacity_variance_percent", self.capacity_variance_percent),
            ("prospect_variance_percent", self.prospect_variance_percent),
            ("customer_min_arr", self.customer_min_arr),
            ("prospect_min_arr", self.prospect_min_arr),
        ];
        for (name, value) in non_negative {
            if value < 0.0 {
                return Err(EngineError::Config(format!(
                    "'{name}' must be non-negative, got {value}"
                )));
            }
        }

        if self.customer_max_arr < self.customer_min_arr {
            return Err(EngineError::Config(
                "customer_max_arr must be >= customer_min_arr".into(),
            ));
        }
        if self.prospect_max_arr < self.prospect_min_arr {
            return Err(EngineError::Config(
                "prospect_max_arr must be >= prospect_min_arr".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for item in &self.priority_config {
            if !seen.insert(std::mem::discriminant(item)) {
                return Err(EngineError::Config(format!(
                    "priority item {item:?} appears more than once"
                )));
            }
        }

        for (weights, label) in [
            (&self.customer_objective, "customer_objective"),
            (&self.prospect_objective, "prospect_objective"),
        ] {
            if weights.continuity_weight < 0.0
                || weights.geography_weight < 0.0
                || weights.team_alignment_weight < 0.0
            {
                return Err(EngineError::Config(format!(
                    "{label} weights must be non-negative"
                )));
            }
        }

        Ok(())
    }
}
