//! territory-core: entities, configuration surface, and pure domain
//! calculators for the sales territory assignment engine.
//!
//! This crate has no I/O and no knowledge of the solver, the loader, or the
//! orchestrator — it only defines *what the numbers mean*.

pub mod calc;
pub mod config;
pub mod entities;
pub mod error;

pub use config::{BalanceIntensity, LPConfiguration, OptimizationModel, PriorityItem};
pub use entities::{
    Account, AccountId, Assignment, LockReason, Opportunity, OpportunityId, OpportunityType,
    PairScores, PriorityReason, Rep, RepId, TeamTier,
};
pub use error::{EngineError, EngineResult, EngineWarning};
