use std::time::{Duration, Instant};

use idlink_domain::backfill::{BackfillError, BackfillOutcome, BackfillService};
use tokio::sync::watch;

use crate::observability;

/// Runs one backfill pass and records its outcome.
pub async fn run_once(backfill: &BackfillService) -> Result<BackfillOutcome, BackfillError> {
    let started = Instant::now();
    let result = backfill.run().await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    match &result {
        Ok(outcome) => {
            observability::register_backfill_run("success", outcome, elapsed_ms);
            tracing::info!(
                processed = outcome.processed,
                updated = outcome.updated,
                skipped = outcome.skipped,
                retried_batches = outcome.retried_batches,
                elapsed_ms,
                "identity backfill run finished"
            );
        }
        Err(BackfillError::AlreadyRunning) => {
            tracing::warn!("identity backfill already running, skipping this tick");
        }
        Err(err) => {
            let partial = err.partial_outcome();
            observability::register_backfill_run("error", &partial, elapsed_ms);
            tracing::error!(
                error = %err,
                processed = partial.processed,
                updated = partial.updated,
                "identity backfill run failed"
            );
        }
    }
    result
}

/// Repeats `run_once` on a fixed interval until `shutdown` flips to true.
/// A failed run is logged and the loop waits for the next tick.
pub async fn run_every(
    backfill: &BackfillService,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut runs = 0;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = run_once(backfill).await;
                runs += 1;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    runs
}

/// Flips `shutdown` once `signal` resolves. If the signal cannot be listened
/// for, the failure is logged and the sender stays open so the loop keeps running.
pub async fn forward_shutdown<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("shutdown signal received");
            if shutdown.send(true).is_err() {
                tracing::debug!("backfill loop already stopped");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
