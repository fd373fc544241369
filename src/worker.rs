//! Worker: consumes send intents, renders and sends, advances state.
//!
//! Prefetch is 1 and acknowledgement is manual, so at most one message per
//! worker instance is in flight. Per delivery: parse and validate, load the
//! lead, step and one random template concurrently, run the hard eligibility
//! checks, render, send through the provider, then advance the per-lead
//! cursor with a conditional update.
//!
//! Failures in anything after parsing route through the retry path: the
//! message is republished with an incremented `x-retries` header until the
//! budget is spent, then rejected without requeue so the broker dead-letters
//! it. Malformed payloads are acked immediately; redelivery cannot fix them.
//!
//! Delivery contract: at-least-once at the provider, exactly-once at the
//! state machine. A redelivered message may send a duplicate email but can
//! never double-advance the cursor.

use std::sync::Arc;

use futures_lite::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use rand::Rng;
use sqlx::PgPool;

use crate::broker::{retry_count, Broker, SEQUENCE_TOPIC};
use crate::config::Config;
use crate::error::{log_error, Error, Result};
use crate::mailer::RetryingMailer;
use crate::metrics::Metrics;
use crate::shutdown::Shutdown;
use crate::tables::{LeadSequenceStates, Leads, SequenceSteps};
use crate::template::{OpenerSource, RenderContext, TemplateProcessor, Variables};
use crate::types::{EmailData, EmailValidity, PendingLead, SequenceStatus};

const CONSUMER_TAG: &str = "dripq-worker";

pub struct Worker {
    leads: Leads,
    steps: SequenceSteps,
    states: LeadSequenceStates,
    broker: Arc<Broker>,
    mailer: RetryingMailer,
    processor: TemplateProcessor,
    ai: Option<Arc<dyn OpenerSource>>,
    config: Config,
    metrics: Arc<Metrics>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        broker: Arc<Broker>,
        mailer: RetryingMailer,
        ai: Option<Arc<dyn OpenerSource>>,
        config: Config,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            leads: Leads::new(pool.clone()),
            steps: SequenceSteps::new(pool.clone()),
            states: LeadSequenceStates::new(pool),
            broker,
            mailer,
            processor: TemplateProcessor::new(),
            ai,
            config,
            metrics,
        }
    }

    /// Consume until shutdown. In-flight handling finishes before the loop
    /// returns; the caller owns the grace period for pool drain.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<()> {
        self.broker.declare_topology(SEQUENCE_TOPIC).await?;
        let mut consumer = self.broker.consumer(SEQUENCE_TOPIC, CONSUMER_TAG).await?;
        tracing::info!(topic = SEQUENCE_TOPIC, "worker loop started");

        loop {
            tokio::select! {
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                        Some(Err(e)) => {
                            let err = Error::from(e);
                            log_error(&err, "worker consume");
                            self.metrics.record(err.code());
                        }
                        None => {
                            tracing::warn!("consumer stream closed by broker");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("worker loop stopped");
        Ok(())
    }

    /// Full handling of one delivery, including its acknowledgement.
    pub async fn handle_delivery(&self, delivery: Delivery) {
        let pending = match PendingLead::from_slice(&delivery.data) {
            Ok(pending) => pending,
            Err(e) => {
                // Redelivery cannot fix a malformed payload; drop it.
                tracing::warn!(error = %e, "malformed message, acking without retry");
                self.metrics.record(e.code());
                self.ack(&delivery).await;
                return;
            }
        };

        match self.process(&pending).await {
            Ok(()) => self.ack(&delivery).await,
            Err(e) => {
                log_error(&e, "worker handling");
                self.metrics.record(e.code());
                self.retry_or_dead_letter(delivery, &pending).await;
            }
        }
    }

    /// Load, check, render, send and advance for one pending lead.
    async fn process(&self, pending: &PendingLead) -> Result<()> {
        let (lead, step, templates) = tokio::try_join!(
            self.leads.get(&pending.lead_id),
            self.steps.get(&pending.step_id),
            self.steps.templates(&pending.step_id),
        )?;

        let lead = lead.ok_or_else(|| Error::LeadNotEligible {
            reason: format!("lead '{}' not found", pending.lead_id),
        })?;
        if lead.email.trim().is_empty() {
            return Err(Error::LeadNotEligible {
                reason: format!("lead '{}' has no email address", lead.id),
            });
        }
        if !lead.is_subscribed_to_email {
            return Err(Error::LeadNotEligible {
                reason: format!("lead '{}' is unsubscribed", lead.id),
            });
        }
        if lead.email_validity() == EmailValidity::Invalid {
            return Err(Error::LeadNotEligible {
                reason: format!("lead '{}' email is marked invalid", lead.id),
            });
        }

        let step = step.ok_or_else(|| Error::LeadNotEligible {
            reason: format!("step '{}' not found", pending.step_id),
        })?;
        if templates.is_empty() {
            return Err(Error::TemplateMissing {
                step_id: step.id.clone(),
            });
        }
        let template = &templates[rand::thread_rng().gen_range(0..templates.len())];

        // Reply/bounce policy hooks live outside this pipeline; surface them.
        tracing::debug!(
            step = %step.id,
            require_no_reply = step.require_no_reply,
            stop_on_bounce = step.stop_on_bounce,
            has_time_windows = step.time_windows.is_some(),
            "step policy flags"
        );

        let vars = Variables::from_lead(&lead);
        let ctx = RenderContext {
            base_url: self.config.main_app_base_url.as_deref(),
            lead: Some(&lead),
            now: chrono::Utc::now(),
            ai: self.ai.as_deref(),
        };
        let subject = self.processor.render(&template.subject, &vars, &ctx).await;
        let body = self.processor.render(&template.html_body, &vars, &ctx).await;

        let email = EmailData {
            to: lead.email.clone(),
            subject,
            body,
            lead_id: lead.id.clone(),
            sequence_id: pending.sequence_id.clone(),
            step_id: step.id.clone(),
            template_id: template.id.clone(),
            from_email: None,
            from_name: None,
            reply_to: None,
            cc: Vec::new(),
            bcc: Vec::new(),
        };

        let outcome = self.mailer.send(&email).await?;
        tracing::info!(
            lead = %lead.id,
            step = pending.step_number,
            message_id = outcome.message_id.as_deref().unwrap_or("-"),
            "email sent"
        );

        match self
            .states
            .advance(&pending.lead_state_id, pending.current_step)
            .await?
        {
            Some(state) => {
                let completed = state
                    .status
                    .parse::<SequenceStatus>()
                    .map(|s| s == SequenceStatus::Completed)
                    .unwrap_or(false);
                tracing::info!(
                    lead_state = %state.id,
                    status = %state.status,
                    current_step = state.current_step,
                    completed,
                    "state advanced"
                );
            }
            None => {
                // Concurrently advanced or terminal; the send stands, the
                // cursor does not move twice.
                tracing::info!(
                    lead_state = %pending.lead_state_id,
                    "state not advanced (already moved or terminal)"
                );
            }
        }

        Ok(())
    }

    /// Header-counted retry: republish with `x-retries + 1` and ack the
    /// original, or reject without requeue once the budget is spent so the
    /// broker dead-letters the message.
    async fn retry_or_dead_letter(&self, delivery: Delivery, pending: &PendingLead) {
        let retries = retry_count(&delivery.properties);

        if retries < self.config.worker_max_retries {
            match self
                .broker
                .publish(SEQUENCE_TOPIC, &delivery.data, Some(retries + 1))
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        lead_state = %pending.lead_state_id,
                        retries = retries + 1,
                        "republished for retry"
                    );
                    self.ack(&delivery).await;
                }
                Err(e) => {
                    log_error(&e, "worker republish");
                    self.metrics.record(e.code());
                    // Could not republish; hand the original back to the
                    // broker for redelivery instead of losing it.
                    if let Err(reject_err) = delivery
                        .acker
                        .reject(BasicRejectOptions { requeue: true })
                        .await
                    {
                        tracing::error!("failed to reject for redelivery: {}", reject_err);
                    }
                }
            }
        } else {
            tracing::warn!(
                lead_state = %pending.lead_state_id,
                retries,
                "retries exhausted, dead-lettering"
            );
            if let Err(e) = delivery
                .acker
                .reject(BasicRejectOptions { requeue: false })
                .await
            {
                tracing::error!("failed to dead-letter message: {}", e);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
            tracing::error!("failed to ack delivery: {}", e);
        }
    }
}
