//! territory-engine: orchestrator state machine, telemetry recorder, and the
//! public [`run`] entry point (C7/C8).

pub mod orchestrator;
pub mod telemetry;

pub use orchestrator::{
    run, CancellationHandle, EngineOptions, EngineOutcome, PassOutcome, RunMode, SalesToolsBucket,
};
