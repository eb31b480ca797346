//! Fire-and-forget telemetry recording (§4.8, component C8).
//!
//! One row per pass is written through [`territory_data::Repository::persist_telemetry`].
//! A write failure here is logged and dropped — it must never affect the
//! run's outcome (§4.8, §7).

use serde::Serialize;

use territory_core::config::{BalanceIntensity, OptimizationModel};
use territory_data::Repository;

use crate::orchestrator::PassOutcome;

/// One pass's observable outcome, serialized for the telemetry sink.
#[derive(Debug, Serialize)]
struct TelemetryRow<'a> {
    telemetry_id: &'a str,
    build_id: &'a str,
    pass: &'static str,
    optimization_model: OptimizationModel,
    balance_intensity: BalanceIntensity,
    assignment_count: usize,
    warnings: &'a [String],
    error: Option<String>,
    arr_variance_percent: Option<f64>,
    atr_variance_percent: Option<f64>,
    pipeline_variance_percent: Option<f64>,
    continuity_rate: Option<f64>,
    reps_over_capacity: Option<usize>,
    feasibility_slack_total: Option<f64>,
}

impl<'a> TelemetryRow<'a> {
    fn for_pass(
        telemetry_id: &'a str,
        build_id: &'a str,
        pass: &'static str,
        config: &territory_core::config::LPConfiguration,
        outcome: &'a PassOutcome,
        warnings: &'a [String],
    ) -> Self {
        let quality = outcome.quality.as_ref();
        Self {
            telemetry_id,
            build_id,
            pass,
            optimization_model: config.optimization_model,
            balance_intensity: config.balance_intensity,
            assignment_count: outcome.assignments.len(),
            warnings,
            error: outcome.error.as_ref().map(|e| e.to_string()),
            arr_variance_percent: quality.map(|q| q.arr_variance_percent),
            atr_variance_percent: quality.map(|q| q.atr_variance_percent),
            pipeline_variance_percent: quality.map(|q| q.pipeline_variance_percent),
            continuity_rate: quality.map(|q| q.continuity_rate),
            reps_over_capacity: quality.map(|q| q.reps_over_capacity),
            feasibility_slack_total: quality.map(|q| q.feasibility_slack_total),
        }
    }
}

/// Write one telemetry row per pass that ran. Never fails the caller: a
/// `persist_telemetry` error is logged at `warn` and otherwise ignored.
pub async fn record(
    repository: &dyn Repository,
    build_id: &str,
    telemetry_id: &str,
    config: &territory_core::config::LPConfiguration,
    customer: &PassOutcome,
    customer_warnings: &[String],
    prospect: &PassOutcome,
    prospect_warnings: &[String],
) {
    write_row(
        repository,
        &TelemetryRow::for_pass(
            telemetry_id,
            build_id,
            "customer",
            config,
            customer,
            customer_warnings,
        ),
    )
    .await;
    write_row(
        repository,
        &TelemetryRow::for_pass(
            telemetry_id,
            build_id,
            "prospect",
            config,
            prospect,
            prospect_warnings,
        ),
    )
    .await;
}

async fn write_row(repository: &dyn Repository, row: &TelemetryRow<'_>) {
    let json = match serde_json::to_string(row) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize telemetry row");
            return;
        }
    };
    if let Err(err) = repository.persist_telemetry(&json).await {
        tracing::warn!(error = %err, "telemetry write failed, continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use territory_core::config::LPConfiguration;

    #[test]
    fn row_serializes_with_optional_quality() {
        let outcome = PassOutcome::default();
        let config = LPConfiguration::default();
        let warnings: Vec<String> = Vec::new();
        let row = TelemetryRow::for_pass(
            "tele-1",
            "build-1",
            "customer",
            &config,
            &outcome,
            &warnings,
        );
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"pass\":\"customer\""));
        assert!(json.contains("\"assignment_count\":0"));
    }
}
