mod observability;
mod runner;

use idlink_infra::services::IdentityServices;
use idlink_infra::{config::AppConfig, logging::init_tracing};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config, "idlink-worker")?;
    observability::init_metrics()?;

    let services = IdentityServices::from_config(&config).await?;
    info!(
        provider = services.provider_name,
        batch_size = services.backfill.config().batch_size,
        "worker starting"
    );

    let Some(interval) = config.backfill_interval() else {
        let outcome = runner::run_once(&services.backfill).await?;
        info!(
            processed = outcome.processed,
            updated = outcome.updated,
            "single backfill run complete"
        );
        return Ok(());
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(runner::forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let runs = runner::run_every(&services.backfill, interval, shutdown_rx).await;
    info!(runs, "worker shutdown");

    Ok(())
}
