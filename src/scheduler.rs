//! Scheduler: turns due per-lead sequence state into durable send intents.
//!
//! Every tick selects up to a batch of leads whose next step is due and, per
//! lead, inside one transaction: derives the idempotency key, skips the lead
//! when an outbox row for that key already exists, otherwise inserts the
//! outbox row and flips the state to RUNNING. The insert and the flip commit
//! atomically; any failure rolls both back and the next tick reconsiders the
//! lead.
//!
//! The duplicate path returns a sentinel instead of erroring through the
//! transaction, so commits and rollbacks stay deterministic.

use std::sync::Arc;

use sqlx::PgPool;

use crate::broker::SEQUENCE_TOPIC;
use crate::config::Config;
use crate::error::{log_error, Error, Result};
use crate::idempotency::{idem_key, FIRST_ATTEMPT};
use crate::metrics::Metrics;
use crate::shutdown::Shutdown;
use crate::tables::{LeadSequenceStates, Outbox};
use crate::types::{NewOutboxRow, PendingLead};

/// Outcome of one per-lead enqueue transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// A new outbox row was written and the state flipped to RUNNING.
    Inserted,
    /// An intent with this idempotency key is already in flight; skipped.
    Duplicate,
}

pub struct Scheduler {
    pool: PgPool,
    outbox: Outbox,
    states: LeadSequenceStates,
    config: Config,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    pub fn new(pool: PgPool, config: Config, metrics: Arc<Metrics>) -> Self {
        Self {
            outbox: Outbox::new(pool.clone()),
            states: LeadSequenceStates::new(pool.clone()),
            pool,
            config,
            metrics,
        }
    }

    /// Drive ticks until shutdown. A productive tick shortens the sleep;
    /// an idle tick stretches it.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<()> {
        tracing::info!(
            batch = self.config.scheduler_batch_size,
            "scheduler loop started"
        );

        loop {
            let enqueued = match self.tick().await {
                Ok(count) => count,
                Err(e) => {
                    log_error(&e, "scheduler tick");
                    self.metrics.record(e.code());
                    0
                }
            };

            let sleep_for = if enqueued > 0 {
                self.config.scheduler_tick()
            } else {
                self.config.scheduler_idle()
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("scheduler loop stopped");
        Ok(())
    }

    /// One scan-and-enqueue pass. Returns the number of new intents.
    pub async fn tick(&self) -> Result<usize> {
        let due = self
            .states
            .due_steps(self.config.scheduler_batch_size as i64)
            .await?;

        if due.is_empty() {
            tracing::debug!("no due leads this tick");
            return Ok(0);
        }

        let mut enqueued = 0;
        for pending in &due {
            match self.enqueue(pending).await {
                Ok(Enqueue::Inserted) => {
                    enqueued += 1;
                    tracing::info!(
                        lead_state = %pending.lead_state_id,
                        step = pending.step_number,
                        "enqueued send intent"
                    );
                }
                Ok(Enqueue::Duplicate) => {
                    tracing::info!(
                        lead_state = %pending.lead_state_id,
                        step = pending.step_number,
                        "intent already in flight, skipping"
                    );
                }
                Err(e) => {
                    log_error(&e, "scheduler enqueue");
                    self.metrics.record(e.code());
                }
            }
        }

        tracing::debug!(due = due.len(), enqueued, "tick finished");
        Ok(enqueued)
    }

    /// The per-lead enqueue transaction.
    async fn enqueue(&self, pending: &PendingLead) -> Result<Enqueue> {
        let key = idem_key(
            &pending.sequence_id,
            &pending.lead_id,
            pending.current_step + 1,
            FIRST_ATTEMPT,
            "",
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::TransactionFailed {
                source: Box::new(e),
                context: format!("Failed to open enqueue transaction for {}", pending),
            })?;

        if self.outbox.count_by_idem_key(&key, &mut tx).await? > 0 {
            // Nothing was written; commit is a no-op either way.
            tx.rollback().await.ok();
            return Ok(Enqueue::Duplicate);
        }

        let row = NewOutboxRow {
            topic: SEQUENCE_TOPIC.to_string(),
            payload: serde_json::to_value(pending)?,
            idem_key: key,
        };

        match self.outbox.insert(row, &mut tx).await {
            Ok(_) => {}
            Err(Error::DuplicateIntent { idem_key }) => {
                // Another scheduler instance won the race between the count
                // and the insert.
                tracing::info!(idem_key = %idem_key, "lost enqueue race, skipping");
                tx.rollback().await.ok();
                return Ok(Enqueue::Duplicate);
            }
            Err(e) => return Err(e),
        }

        let updated = self
            .states
            .mark_running(&pending.lead_state_id, &mut tx)
            .await?;
        if updated == 0 {
            // A worker advanced this row to a terminal state underneath us;
            // drop the intent with the transaction.
            tracing::info!(
                lead_state = %pending.lead_state_id,
                "state turned terminal during enqueue, dropping intent"
            );
            tx.rollback().await.ok();
            return Ok(Enqueue::Duplicate);
        }

        tx.commit().await.map_err(|e| Error::TransactionFailed {
            source: Box::new(e),
            context: format!("Failed to commit enqueue transaction for {}", pending),
        })?;

        Ok(Enqueue::Inserted)
    }
}
