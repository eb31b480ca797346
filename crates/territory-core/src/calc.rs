//! Pure domain calculators (§4.1, component C1).
//!
//! Every function here is total: no panics, no I/O, invalid inputs are
//! clamped rather than rejected (the caller surfaces a
//! [`crate::error::EngineWarning::NumericWarning`] when that happens).

use crate::config::{ContinuityConfig, GeographyConfig, LPConfiguration, TeamScoreConfig};
use crate::entities::{Account, OpportunityType, Rep, TeamTier};

/// ARR priority used everywhere (§3.2 invariant 7): `hierarchy_bookings_arr`
/// wins, then `calculated_arr`, then `arr`, then `0.0`. Negative values are
/// clamped to zero.
pub fn account_arr(account: &Account) -> f64 {
    let raw = account
        .hierarchy_bookings_arr
        .or(account.calculated_arr)
        .or(account.arr)
        .unwrap_or(0.0);
    raw.max(0.0)
}

/// ATR is non-negative; parent rollup (`direct + Σ children`) is performed by
/// the loader and stored in `account.atr` (§3.2 invariant 5). This accessor
/// just enforces the non-negative clamp for any direct read.
pub fn account_atr(account: &Account) -> f64 {
    account.atr.max(0.0)
}

/// An opportunity contributes to pipeline if its account is a prospect (any
/// type), or if it is an Expansion/New Subscription opp on a customer
/// account (§3.2 invariant 6).
pub fn pipeline_eligible(opp_type: OpportunityType, account_is_customer: bool) -> bool {
    if !account_is_customer {
        return true;
    }
    matches!(
        opp_type,
        OpportunityType::Expansion | OpportunityType::NewSubscription
    )
}

/// `is_customer` per §3.2 invariant 8: positive ARR, explicit flag, or a
/// customer descendant. `has_customer_descendant` is evaluated by the caller
/// (loader) since it requires the full account graph; this overload handles
/// the leaf-level half of the predicate.
pub fn is_customer_leaf(account: &Account) -> bool {
    account_arr(account) > 0.0 || account.is_customer_flag
}

/// Continuity score for the pair `(account, rep)` (§4.1).
///
/// Returns `0.0` whenever continuity cannot apply: rep is not the current
/// owner, rep is a backfill source, or the account has no owner on record.
pub fn continuity_score(account: &Account, rep: &Rep, config: &ContinuityConfig) -> f64 {
    let Some(owner_id) = &account.owner_id else {
        return 0.0;
    };
    if *owner_id != rep.id || rep.is_backfill_source {
        return 0.0;
    }

    let tenure_days = account
        .owner_change_date
        .map(|changed| {
            let today = chrono::Utc::now().date_naive();
            (today - changed).num_days().max(0) as f64
        })
        .unwrap_or(0.0);
    let tenure = (tenure_days / config.tenure_max_days.max(1e-9)).min(1.0);

    let max_owners = config.stability_max_owners.max(1.000_001);
    let stability = (1.0
        - (account.owners_lifetime_count as f64 - 1.0) / (max_owners - 1.0))
        .max(0.0);

    let value = (account_arr(account) / config.value_threshold.max(1e-9)).min(1.0);

    let score = config.base_continuity
        + config.tenure_weight * tenure
        + config.stability_weight * stability
        + config.value_weight * value;
    score.clamp(0.0, 1.0)
}

/// Team alignment score for a pair. `None` means N/A (unknown tier on either
/// side); the caller redistributes the weight rather than treating it as 0.5.
pub fn team_alignment_score(
    account_tier: Option<TeamTier>,
    rep_tier: Option<TeamTier>,
    config: &TeamScoreConfig,
) -> Option<f64> {
    let (account_tier, rep_tier) = (account_tier?, rep_tier?);
    let distance = account_tier.distance(rep_tier);
    let base = match distance {
        0 => config.exact_match_score,
        1 => config.one_level_score,
        2 => config.two_level_score,
        _ => config.three_level_score,
    };
    let reaching_down = rep_tier.index() > account_tier.index();
    let score = if reaching_down {
        (base - config.reaching_down_penalty * distance as f64).max(0.0)
    } else {
        base
    };
    Some(score)
}

/// Three-level geography hierarchy used for normalization and scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoPath {
    pub macro_region: String,
    pub sub_region: String,
    pub territory: String,
}

/// Match strength between an account's territory and a rep's region, used
/// before the final score lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoMatch {
    ExactRegion,
    SameSubRegion,
    SameMacroRegion,
    GlobalFallback,
    CrossMacroRegion,
    UnknownEither,
}

/// Classify the match strength between two resolved geo paths. `None` for
/// either side means unknown territory data.
pub fn classify_geo_match(account: Option<&GeoPath>, rep: Option<&GeoPath>) -> GeoMatch {
    let (Some(a), Some(r)) = (account, rep) else {
        return GeoMatch::UnknownEither;
    };
    if a.territory == r.territory {
        return GeoMatch::ExactRegion;
    }
    if a.macro_region == "GLOBAL" || r.macro_region == "GLOBAL" {
        return GeoMatch::GlobalFallback;
    }
    if a.sub_region == r.sub_region {
        return GeoMatch::SameSubRegion;
    }
    if a.macro_region == r.macro_region {
        return GeoMatch::SameMacroRegion;
    }
    GeoMatch::CrossMacroRegion
}

/// Analytics-facing geography score (used for quality metrics, §8). Keeps the
/// richer "sibling/parent" split the analytics surface uses, distinct from
/// the LP-facing score in [`geo_score_for_lp`] (§9 open question: the source
/// carries two scales; we keep both rather than silently unifying them).
pub fn geo_score_analytics(m: GeoMatch) -> f64 {
    match m {
        GeoMatch::ExactRegion => 1.00,
        GeoMatch::SameSubRegion => 0.85,
        GeoMatch::SameMacroRegion => 0.65,
        GeoMatch::GlobalFallback => 0.40,
        GeoMatch::CrossMacroRegion => 0.20,
        GeoMatch::UnknownEither => 0.50,
    }
}

/// LP-facing geography score, using the configured scale (§6.3 `geography`
/// group) rather than the fixed analytics constants.
pub fn geo_score_for_lp(m: GeoMatch, config: &GeographyConfig) -> f64 {
    match m {
        GeoMatch::ExactRegion => config.exact_match_score,
        GeoMatch::SameSubRegion => config.sibling_score,
        GeoMatch::SameMacroRegion => config.parent_score,
        GeoMatch::GlobalFallback => config.global_score,
        GeoMatch::CrossMacroRegion => 0.20,
        GeoMatch::UnknownEither => config.unknown_territory_score,
    }
}

/// Normalize a free-text region/alias string: trim, case-fold, collapse
/// internal whitespace. Idempotent by construction (§3.2 invariant 9).
pub fn normalize_alias(raw: &str, aliases: &std::collections::HashMap<String, String>) -> String {
    let folded: String = raw
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    aliases
        .get(&folded)
        .cloned()
        .unwrap_or_else(|| folded_or_unmapped(&folded, aliases))
}

fn folded_or_unmapped(folded: &str, aliases: &std::collections::HashMap<String, String>) -> String {
    // If the folded form is itself a known canonical value, keep it; a miss
    // against both the alias map and the canonical set means UNMAPPED.
    if aliases.values().any(|v| v == folded) {
        folded.to_string()
    } else {
        "UNMAPPED".to_string()
    }
}

/// Resolve a territory string into a macro/sub/territory path using the
/// explicit `territory_mappings` config first, falling back to keyword
/// matching, and finally `"UNMAPPED"` (§4.1 Geography).
pub fn resolve_geo_path(territory: &str, config: &LPConfiguration) -> GeoPath {
    let key = territory.trim().to_ascii_uppercase();
    if let Some(mapped) = config.territory_mappings.get(&key) {
        return parse_mapped_region(mapped);
    }
    keyword_match(&key).unwrap_or_else(|| GeoPath {
        macro_region: "UNMAPPED".to_string(),
        sub_region: "UNMAPPED".to_string(),
        territory: "UNMAPPED".to_string(),
    })
}

fn parse_mapped_region(mapped: &str) -> GeoPath {
    // Mapped values are "MACRO/SUB" or a bare macro region; territory keeps
    // the original mapped string as its most specific identity.
    let mut parts = mapped.splitn(2, '/');
    let macro_region = parts.next().unwrap_or("UNMAPPED").to_string();
    let sub_region = parts.next().unwrap_or(&macro_region).to_string();
    GeoPath {
        macro_region,
        sub_region,
        territory: mapped.to_string(),
    }
}

fn keyword_match(key: &str) -> Option<GeoPath> {
    const RULES: &[(&[&str], &str, &str)] = &[
        (&["CA", "CALIFORNIA", "WEST", "PACIFIC", "SEATTLE", "PORTLAND"], "AMER", "WEST"),
        (&["NY", "NEW YORK", "BOSTON", "NORTHEAST", "EAST COAST"], "AMER", "NORTHEAST"),
        (&["TX", "TEXAS", "ATLANTA", "SOUTH", "SOUTHEAST"], "AMER", "SOUTH"),
        (&["CHICAGO", "MIDWEST", "CENTRAL"], "AMER", "CENTRAL"),
        (&["UK", "LONDON", "GERMANY", "FRANCE", "EMEA", "EUROPE"], "EMEA", "EUROPE"),
        (&["JAPAN", "SINGAPORE", "AUSTRALIA", "APAC", "ASIA"], "APAC", "ASIA"),
        (&["GLOBAL", "WORLDWIDE", "HQ"], "GLOBAL", "GLOBAL"),
    ];
    for (keywords, macro_region, sub_region) in RULES {
        if keywords.iter().any(|kw| key.contains(kw)) {
            return Some(GeoPath {
                macro_region: macro_region.to_string(),
                sub_region: sub_region.to_string(),
                territory: key.to_string(),
            });
        }
    }
    None
}
