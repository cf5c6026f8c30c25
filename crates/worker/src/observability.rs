use std::sync::OnceLock;

use anyhow::Result;
use idlink_domain::backfill::BackfillOutcome;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const BACKFILL_RUNS_TOTAL: &str = "idlink_worker_backfill_runs_total";
const BACKFILL_RUN_DURATION_MS: &str = "idlink_worker_backfill_run_duration_ms";
const BACKFILL_USERS_TOTAL: &str = "idlink_identity_backfill_users_total";
const BACKFILL_RETRIED_BATCHES_TOTAL: &str = "idlink_identity_backfill_retried_batches_total";
const BACKFILL_LAST_PROCESSED_GAUGE: &str = "idlink_worker_backfill_last_processed";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn register_backfill_run(result: &str, outcome: &BackfillOutcome, duration_ms: f64) {
    counter!(BACKFILL_RUNS_TOTAL, "result" => result.to_string()).increment(1);
    histogram!(BACKFILL_RUN_DURATION_MS, "result" => result.to_string()).record(duration_ms);

    counter!(BACKFILL_USERS_TOTAL, "result" => "updated").increment(outcome.updated);
    counter!(BACKFILL_USERS_TOTAL, "result" => "skipped").increment(outcome.skipped);
    counter!(BACKFILL_RETRIED_BATCHES_TOTAL, "trigger" => "worker")
        .increment(outcome.retried_batches);
    gauge!(BACKFILL_LAST_PROCESSED_GAUGE).set(outcome.processed as f64);
}
