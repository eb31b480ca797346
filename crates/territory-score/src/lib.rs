//! territory-score: pair scoring, weight derivation, stability locks, and
//! strategic pre-assignment (C3/C4).

pub mod scoring;
pub mod stability;
pub mod strategic;

pub use scoring::{
    assemble_coefficient, default_weights, derive_weights, rank_bonuses, score_pair, PairScoreSet,
    RANK_BONUS_EPSILON,
};
pub use stability::{check_backfill, check_stability, LockResult};
pub use strategic::{assign_strategic_accounts, StrategicAssignment};
