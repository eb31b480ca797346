//! Core entity types: accounts, reps, opportunities, and assignments.
//!
//! IDs are newtype string wrappers rather than plain `String` so that an
//! account id can never be passed where a rep id is expected — the same
//! motivation as the numeric newtype IDs in graph-modeling crates, just
//! backed by the opaque 15/18-character identifiers this domain actually
//! uses.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(AccountId);
string_id!(RepId);
string_id!(OpportunityId);

/// Team tier, derived from employee count (§4.1) or `null` for unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamTier {
    Smb,
    Growth,
    Mm,
    Ent,
}

impl TeamTier {
    /// Canonical ordering used for tier-distance computations (§4.1).
    pub const ORDER: [TeamTier; 4] = [
        TeamTier::Smb,
        TeamTier::Growth,
        TeamTier::Mm,
        TeamTier::Ent,
    ];

    pub fn index(self) -> usize {
        Self::ORDER.iter().position(|t| *t == self).expect("tier in ORDER")
    }

    pub fn distance(self, other: TeamTier) -> usize {
        self.index().abs_diff(other.index())
    }

    /// Classify by employee count per the tier table in §4.1.
    pub fn from_employees(employees: Option<u64>) -> Option<TeamTier> {
        match employees {
            None | Some(0) => None,
            Some(n) if n < 100 => Some(TeamTier::Smb),
            Some(n) if n < 500 => Some(TeamTier::Growth),
            Some(n) if n < 1500 => Some(TeamTier::Mm),
            Some(_) => Some(TeamTier::Ent),
        }
    }
}

/// Opportunity type, used to decide pipeline/ATR eligibility (§3.2 invariant 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityType {
    Expansion,
    NewSubscription,
    Renewal,
    Other,
}

/// A single deal. Only contributes aggregate quantities to its account; never
/// retained beyond load time (§3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub account_id: AccountId,
    pub opp_type: OpportunityType,
    /// Net new ARR contribution, when available.
    pub net_arr: Option<f64>,
    /// Raw deal amount, used when `net_arr` is absent.
    pub amount: Option<f64>,
    /// Only meaningful for renewal opportunities; contributes to ATR.
    pub renewal_event_date: Option<chrono::NaiveDate>,
}

impl Opportunity {
    /// Value used by `pipeline_of` / `atr` aggregation — `net_arr` takes
    /// priority over `amount` per §4.1.
    pub fn value(&self) -> f64 {
        self.net_arr.or(self.amount).unwrap_or(0.0)
    }
}

/// An organization being sold to (parent or child).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub parent_id: Option<AccountId>,

    pub is_customer_flag: bool,
    pub is_strategic: bool,
    pub exclude_from_reassignment: bool,

    pub arr: Option<f64>,
    pub calculated_arr: Option<f64>,
    pub hierarchy_bookings_arr: Option<f64>,
    /// Direct ATR before parent/child rollup; rollup is applied by the loader.
    pub direct_atr: f64,
    /// Populated by the loader once rollup (§3.2 invariant 5) has run.
    pub atr: f64,
    /// Populated by the loader from the opportunity aggregation (§4.2 step 4).
    pub pipeline_value: f64,

    pub employees: Option<u64>,
    pub sales_territory: Option<String>,
    pub geo: Option<String>,
    pub expansion_tier: Option<String>,
    pub initial_sale_tier: Option<String>,
    pub pe_firm: Option<String>,
    pub cre_risk: bool,
    pub renewal_date: Option<chrono::NaiveDate>,
    pub owner_id: Option<RepId>,
    pub owner_change_date: Option<chrono::NaiveDate>,
    pub owners_lifetime_count: u32,

    /// Populated by the loader while folding children into parents (§4.2 step 3).
    pub child_ids: Vec<AccountId>,
}

impl Account {
    pub fn is_parent(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// A sales representative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rep {
    pub id: RepId,
    pub name: String,
    pub region: Option<String>,
    pub team_tier: Option<TeamTier>,

    pub is_active: bool,
    pub include_in_assignments: bool,
    pub is_manager: bool,
    pub is_strategic_rep: bool,
    pub is_backfill_source: bool,
    pub is_backfill_target: bool,
    pub backfill_target_rep_id: Option<RepId>,
}

impl Rep {
    /// Eligibility filter applied by the loader (§4.2 step 6).
    pub fn is_eligible(&self) -> bool {
        self.is_active && self.include_in_assignments && !self.is_manager
    }
}

/// Why an account ended up with its assigned rep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PriorityReason {
    Lock(LockReason),
    Strategic,
    PriorityLevel(String),
    ChildFollowsParent,
    Residual,
}

/// Stability lock classification (§4.4), a closed sum type matched
/// exhaustively wherever locks are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockReason {
    ManualHold,
    BackfillMigration,
    CreRisk,
    RenewalSoon,
    PeFirm,
    RecentOwnerChange,
}

impl LockReason {
    pub fn label(self) -> &'static str {
        match self {
            LockReason::ManualHold => "manual_hold",
            LockReason::BackfillMigration => "backfill_migration",
            LockReason::CreRisk => "cre_risk",
            LockReason::RenewalSoon => "renewal_soon",
            LockReason::PeFirm => "pe_firm",
            LockReason::RecentOwnerChange => "recent_owner_change",
        }
    }
}

/// Per-pair scores carried on an [`Assignment`] for rationale generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PairScores {
    pub continuity: Option<f64>,
    pub geography: Option<f64>,
    pub team_alignment: Option<f64>,
}

/// Output record (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub account_id: AccountId,
    pub rep_id: RepId,
    pub priority_reason: PriorityReason,
    pub scores: PairScores,
    pub is_locked: bool,
    pub is_strategic_pre_assignment: bool,
    pub cascaded_from_parent: bool,
}
