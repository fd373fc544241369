//! Scheduler process: scans sequence state and enqueues send intents.

use std::sync::Arc;

use dripq::config::Config;
use dripq::metrics::Metrics;
use dripq::scheduler::Scheduler;
use dripq::shutdown::Shutdown;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("scheduler refusing to start: {}", e);
            std::process::exit(1);
        }
    };
    dripq::telemetry::init(&config);

    if let Err(e) = run(config).await {
        tracing::error!("scheduler failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let pool = dripq::pool::create_pool(&config).await?;
    dripq::pool::ping(&pool).await?;

    let metrics = Arc::new(Metrics::new(config.enable_metrics));
    let grace = config.shutdown_grace();
    let scheduler = Scheduler::new(pool.clone(), config, metrics.clone());

    tracing::info!("scheduler started");
    scheduler.run(Shutdown::listen()).await?;

    if tokio::time::timeout(grace, pool.close()).await.is_err() {
        tracing::warn!("pool drain exceeded the grace period");
    }
    if metrics.enabled() {
        tracing::info!(counters = ?metrics.snapshot(), "error counters");
    }
    tracing::info!("scheduler stopped");
    Ok(())
}
