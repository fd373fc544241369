//! Pump: ships claimed outbox rows to the broker.
//!
//! Each poll claims up to a batch of unprocessed rows in a single
//! skip-locked statement (marking them processed and counting the attempt in
//! the same write) and publishes them one by one. A failed publish reverts
//! its row so a later poll retries it, bounded by the row's retry budget.
//! Multiple pump instances are safe: `SKIP LOCKED` hands them disjoint row
//! sets.

use std::sync::Arc;

use crate::broker::{Broker, SEQUENCE_TOPIC};
use crate::config::Config;
use crate::error::{log_error, Result};
use crate::metrics::Metrics;
use crate::shutdown::Shutdown;
use crate::tables::Outbox;

pub struct Pump {
    outbox: Outbox,
    broker: Arc<Broker>,
    config: Config,
    metrics: Arc<Metrics>,
}

impl Pump {
    pub fn new(
        pool: sqlx::PgPool,
        broker: Arc<Broker>,
        config: Config,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            outbox: Outbox::new(pool),
            broker,
            config,
            metrics,
        }
    }

    /// Drive polls until shutdown.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<()> {
        self.broker.declare_topology(SEQUENCE_TOPIC).await?;
        tracing::info!(claim = self.config.pump_claim_size, "pump loop started");

        loop {
            let shipped = match self.tick().await {
                Ok(count) => count,
                Err(e) => {
                    log_error(&e, "pump poll");
                    self.metrics.record(e.code());
                    0
                }
            };

            let sleep_for = if shipped > 0 {
                self.config.pump_poll()
            } else {
                self.idle_maintenance().await;
                self.config.pump_idle()
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("pump loop stopped");
        Ok(())
    }

    /// One claim-and-publish pass. Returns the number of rows published.
    pub async fn tick(&self) -> Result<usize> {
        let claimed = self
            .outbox
            .claim_batch(self.config.pump_claim_size as i64)
            .await?;

        if claimed.is_empty() {
            return Ok(0);
        }

        let mut shipped = 0;
        for row in &claimed {
            let body = serde_json::to_vec(&row.payload)?;
            match self.broker.publish(&row.topic, &body, None).await {
                Ok(()) => {
                    shipped += 1;
                    tracing::debug!(outbox_id = %row.id, topic = %row.topic, "published");
                }
                Err(e) => {
                    log_error(&e, "pump publish");
                    self.metrics.record(e.code());
                    // Release the row so a later claim retries it.
                    if let Err(revert_err) = self.outbox.revert(row.id).await {
                        log_error(&revert_err, "pump revert");
                        self.metrics.record(revert_err.code());
                    } else {
                        tracing::warn!(
                            outbox_id = %row.id,
                            retries = row.retries,
                            max_retries = row.max_retries,
                            "publish failed, row reverted"
                        );
                    }
                }
            }
        }

        tracing::debug!(claimed = claimed.len(), shipped, "poll finished");
        Ok(shipped)
    }

    /// Idle-cycle housekeeping: log outbox counts and drop published rows
    /// past the retention window.
    async fn idle_maintenance(&self) {
        match self.outbox.stats().await {
            Ok(stats) => tracing::debug!(
                pending = stats.pending,
                processed = stats.processed,
                exhausted = stats.exhausted,
                "outbox idle"
            ),
            Err(e) => log_error(&e, "pump stats"),
        }

        match self
            .outbox
            .purge_processed(self.config.outbox_retention())
            .await
        {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "purged published outbox rows"),
            Err(e) => log_error(&e, "pump purge"),
        }
    }
}
