//! Pump process: ships outbox rows to the broker.

use std::sync::Arc;

use dripq::broker::Broker;
use dripq::config::Config;
use dripq::metrics::Metrics;
use dripq::pump::Pump;
use dripq::shutdown::Shutdown;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pump refusing to start: {}", e);
            std::process::exit(1);
        }
    };
    dripq::telemetry::init(&config);

    if let Err(e) = run(config).await {
        tracing::error!("pump failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let pool = dripq::pool::create_pool(&config).await?;
    dripq::pool::ping(&pool).await?;
    let broker = Arc::new(Broker::connect(config.broker_url()?).await?);

    let metrics = Arc::new(Metrics::new(config.enable_metrics));
    let grace = config.shutdown_grace();
    let pump = Pump::new(pool.clone(), broker.clone(), config, metrics.clone());

    tracing::info!("pump started");
    pump.run(Shutdown::listen()).await?;

    if let Err(e) = broker.close().await {
        tracing::warn!("broker channel close failed: {}", e);
    }
    if tokio::time::timeout(grace, pool.close()).await.is_err() {
        tracing::warn!("pool drain exceeded the grace period");
    }
    if metrics.enabled() {
        tracing::info!(counters = ?metrics.snapshot(), "error counters");
    }
    tracing::info!("pump stopped");
    Ok(())
}
