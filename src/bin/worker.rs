//! Worker process: consumes send intents and advances lead state.

use std::sync::Arc;

use dripq::ai::GeminiClient;
use dripq::broker::Broker;
use dripq::config::Config;
use dripq::mailer::{create_mail_client, RetryingMailer};
use dripq::metrics::Metrics;
use dripq::shutdown::Shutdown;
use dripq::template::OpenerSource;
use dripq::worker::Worker;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("worker refusing to start: {}", e);
            std::process::exit(1);
        }
    };
    dripq::telemetry::init(&config);

    if let Err(e) = run(config).await {
        tracing::error!("worker failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let pool = dripq::pool::create_pool(&config).await?;
    dripq::pool::ping(&pool).await?;
    let broker = Arc::new(Broker::connect(config.broker_url()?).await?);

    let mail_client = create_mail_client(&config).await?;
    let mailer = RetryingMailer::new(mail_client, &config);

    let ai: Option<Arc<dyn OpenerSource>> = match &config.gemini_api_key {
        Some(key) => Some(Arc::new(GeminiClient::new(
            key.clone(),
            config.external_timeout(),
        )?)),
        None => None,
    };

    let metrics = Arc::new(Metrics::new(config.enable_metrics));
    let grace = config.shutdown_grace();
    let worker = Worker::new(
        pool.clone(),
        broker.clone(),
        mailer,
        ai,
        config,
        metrics.clone(),
    );

    tracing::info!("worker started");
    worker.run(Shutdown::listen()).await?;

    if let Err(e) = broker.close().await {
        tracing::warn!("broker channel close failed: {}", e);
    }
    if tokio::time::timeout(grace, pool.close()).await.is_err() {
        tracing::warn!("pool drain exceeded the grace period");
    }
    if metrics.enabled() {
        tracing::info!(counters = ?metrics.snapshot(), "error counters");
    }
    tracing::info!("worker stopped");
    Ok(())
}
