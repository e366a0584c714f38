//! Prometheus metrics.
//!
//! Counters are recorded through the `metrics` facade wherever the event happens; this module
//! installs the process-wide Prometheus recorder and names the series.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use std::sync::OnceLock;

use crate::db::models::jobs::JobStatus;

pub const JOBS_CREATED_TOTAL: &str = "genflow_jobs_created_total";
pub const JOBS_FINISHED_TOTAL: &str = "genflow_jobs_finished_total";
pub const CREDITS_CONSUMED_TOTAL: &str = "genflow_credits_consumed_total";
pub const CREDITS_GRANTED_TOTAL: &str = "genflow_credits_granted_total";

static HANDLE: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the global Prometheus recorder on first use and return its handle.
///
/// A process has one recorder, so every caller (including tests building several applications
/// in one process) shares the first handle.
pub fn prometheus_handle() -> anyhow::Result<PrometheusHandle> {
    HANDLE
        .get_or_init(|| PrometheusBuilder::new().install_recorder().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))
}

pub fn record_job_created(model: &str) {
    counter!(JOBS_CREATED_TOTAL, "model" => model.to_string()).increment(1);
}

pub fn record_job_finished(status: JobStatus) {
    counter!(JOBS_FINISHED_TOTAL, "status" => status.as_str()).increment(1);
}

/// Counters are integral, so credits are recorded in hundredths
pub fn record_credits_consumed(amount: Decimal) {
    counter!(CREDITS_CONSUMED_TOTAL).increment(hundredths(amount));
}

pub fn record_credits_granted(reason: &'static str, amount: Decimal) {
    counter!(CREDITS_GRANTED_TOTAL, "reason" => reason).increment(hundredths(amount));
}

fn hundredths(amount: Decimal) -> u64 {
    (amount * Decimal::ONE_HUNDRED).round().to_u64().unwrap_or(0)
}
