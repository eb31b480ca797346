//! Unified error and warning taxonomy for the territory assignment engine.
//!
//! [`EngineError`] covers everything fatal to a run or a pass; [`EngineWarning`]
//! covers everything the pipeline records and keeps going on. Splitting the two
//! reflects the propagation policy: warnings never abort a run, errors always
//! abort the scope they are raised in (a pass or the whole build).

use thiserror::Error;

/// Fatal error raised by any stage of the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Repeated transient failures or malformed required fields at load time.
    #[error("data load failed: {0}")]
    DataLoad(String),

    /// Invalid configuration, caught before any work starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No eligible reps remain for a pass after filtering.
    #[error("no eligible reps available for this pass")]
    NoEligibleReps,

    /// Relaxed-mode account count exceeds the global LP size guard.
    #[error("problem size {accounts} accounts exceeds relaxed-mode limit {limit}")]
    ScaleExceeded { accounts: usize, limit: usize },

    /// Solver exceeded its configured timeout with no usable incumbent.
    #[error("solver timed out after {seconds}s with no incumbent")]
    SolverTimeout { seconds: u64 },

    /// Cancellation observed at a step boundary.
    #[error("run cancelled")]
    Cancelled,

    /// Design-bug-class failure in scoring or problem construction; never
    /// user-recoverable.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Non-fatal condition recorded alongside a run's assignments.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineWarning {
    /// Strategic accounts exist but no strategic reps are eligible.
    StrategicPoolEmpty { account_count: usize },
    /// A stability lock's target rep was ineligible; the account was unlocked.
    LockDropped { account_id: String, reason: String },
    /// A rep's assigned ARR load exceeds the configured hard cap.
    CapacityOverflow { rep_id: String, overflow_arr: f64 },
    /// An input value violated an invariant (e.g. negative ARR) and was clamped.
    NumericWarning { account_id: String, field: String },
    /// The solver produced no candidate pair for an in-scope account; it was
    /// placed with a least-loaded fallback rather than left unassigned.
    UnassignedAccount { account_id: String },
}

impl std::fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineWarning::StrategicPoolEmpty { account_count } => write!(
                f,
                "strategic pool empty: {account_count} strategic accounts have no strategic rep"
            ),
            EngineWarning::LockDropped { account_id, reason } => {
                write!(f, "lock dropped for account {account_id}: {reason}")
            }
            EngineWarning::CapacityOverflow {
                rep_id,
                overflow_arr,
            } => write!(
                f,
                "rep {rep_id} exceeds hard capacity by {overflow_arr:.2}"
            ),
            EngineWarning::NumericWarning { account_id, field } => write!(
                f,
                "account {account_id} field '{field}' was out of range and clamped"
            ),
            EngineWarning::UnassignedAccount { account_id } => write!(
                f,
                "account {account_id} had no solver candidate and was placed with a fallback rep"
            ),
        }
    }
}

/// Convenience alias used across the workspace.
pub type EngineResult<T> = Result<T, EngineError>;
