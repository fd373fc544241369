//! Email provider interface and retry policy.
//!
//! The pipeline talks to its provider exclusively through [`MailClient`].
//! Production uses SES; every other environment gets the mock client, which
//! returns synthetic successes so end-to-end runs never leave the machine.
//!
//! [`RetryingMailer`] wraps a client with the provider-internal retry
//! policy: a fixed number of attempts with linear backoff, each attempt
//! individually bounded by the external-call timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{EmailData, SendOutcome};

mod mock;
mod ses;

pub use mock::MockMailClient;
pub use ses::SesMailClient;

#[async_trait]
pub trait MailClient: Send + Sync {
    async fn send(&self, email: &EmailData) -> Result<SendOutcome>;
    fn from_email(&self) -> &str;
    fn from_name(&self) -> &str;
}

pub type DynMailClient = Arc<dyn MailClient>;

/// Select the provider for the configured environment.
pub async fn create_mail_client(config: &Config) -> Result<DynMailClient> {
    if config.env.is_production() {
        config.validate_ses_environment()?;
        let client = SesMailClient::new(config).await?;
        Ok(Arc::new(client))
    } else {
        tracing::info!(env = %config.env, "using mock mail client");
        Ok(Arc::new(MockMailClient::new(config)))
    }
}

/// Provider wrapper applying bounded retry with linear backoff.
pub struct RetryingMailer {
    inner: DynMailClient,
    attempts: u32,
    delay: Duration,
    call_timeout: Duration,
}

impl RetryingMailer {
    pub fn new(inner: DynMailClient, config: &Config) -> Self {
        Self {
            inner,
            attempts: config.mailer_retry_attempts.max(1),
            delay: config.mailer_retry_delay(),
            call_timeout: config.external_timeout(),
        }
    }

    /// Fully configurable constructor for tests and embedding.
    pub fn with_policy(
        inner: DynMailClient,
        attempts: u32,
        delay: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
            call_timeout,
        }
    }

    /// Send with up to `attempts` tries, sleeping `delay * attempt` between
    /// failures. Each try is bounded by the external-call timeout. The last
    /// error is returned once the budget is spent.
    pub async fn send(&self, email: &EmailData) -> Result<SendOutcome> {
        let mut last_error = Error::Provider {
            message: "send never attempted".to_string(),
        };

        for attempt in 1..=self.attempts {
            match tokio::time::timeout(self.call_timeout, self.inner.send(email)).await {
                Ok(Ok(outcome)) if outcome.success => return Ok(outcome),
                Ok(Ok(outcome)) => {
                    last_error = Error::Provider {
                        message: outcome
                            .error
                            .unwrap_or_else(|| "provider reported failure".to_string()),
                    };
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = Error::Timeout {
                        operation: "provider send".to_string(),
                    };
                }
            }

            if attempt < self.attempts {
                tracing::warn!(
                    attempt,
                    to = %email.to,
                    error = %last_error,
                    "send attempt failed, backing off"
                );
                tokio::time::sleep(self.delay * attempt).await;
            }
        }

        Err(last_error)
    }
}
