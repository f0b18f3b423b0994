//! Prometheus recorder plus the metric names emitted by the pipeline stages.

use once_cell::sync::OnceCell;
use std::error::Error;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const SIGNALS_SCORED: &str = "tradeloop_signals_scored_total";
pub const SIGNALS_FAILED: &str = "tradeloop_signals_failed_total";
pub const DIMENSION_FAILURES: &str = "tradeloop_dimension_failures_total";
pub const RISK_ASSESSMENTS: &str = "tradeloop_risk_assessments_total";
pub const PROPOSALS: &str = "tradeloop_proposals_total";
pub const DECISIONS: &str = "tradeloop_decisions_total";
pub const EVALUATIONS: &str = "tradeloop_evaluations_total";
pub const TEXT_GENERATION_MS: &str = "tradeloop_text_generation_ms";
pub const TEXT_GENERATION_FALLBACKS: &str = "tradeloop_text_generation_fallbacks_total";
pub const STATE_WRITE_RETRIES: &str = "tradeloop_state_write_retries_total";

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialise the global Prometheus recorder.
///
/// Call once at programme start, before any metrics are emitted. Calling it
/// multiple times is a no-op after the first success.
pub fn init() -> Result<(), Box<dyn Error + Send + Sync>> {
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// Render the current metrics in the Prometheus exposition format, if the
/// recorder has been installed.
pub fn render() -> Option<String> {
    PROM_HANDLE.get().map(|h| h.render())
}
