//! Tests for the provider retry policy: bounded attempts, linear backoff,
//! timeout handling and outcome classification.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dripq::error::{Error, Result};
use dripq::mailer::{MailClient, RetryingMailer};
use dripq::types::{EmailData, SendOutcome};

enum FailureMode {
    /// Return an error for the first N calls, then succeed.
    ErrorFirst(u32),
    /// Return an unsuccessful outcome for the first N calls, then succeed.
    UnsuccessfulFirst(u32),
    /// Never answer within any reasonable timeout.
    Hang,
}

struct FlakyClient {
    calls: AtomicU32,
    mode: FailureMode,
}

impl FlakyClient {
    fn new(mode: FailureMode) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            mode,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailClient for FlakyClient {
    async fn send(&self, _email: &EmailData) -> Result<SendOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.mode {
            FailureMode::ErrorFirst(n) if call <= *n => Err(Error::Provider {
                message: format!("transient failure on call {}", call),
            }),
            FailureMode::UnsuccessfulFirst(n) if call <= *n => {
                Ok(SendOutcome::failed("mailbox busy"))
            }
            FailureMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("hanging client should be timed out")
            }
            _ => Ok(SendOutcome::ok(format!("msg-{}", call))),
        }
    }

    fn from_email(&self) -> &str {
        "test@localhost"
    }

    fn from_name(&self) -> &str {
        "test"
    }
}

fn email() -> EmailData {
    EmailData {
        to: "ada@acme.io".to_string(),
        subject: "hello".to_string(),
        body: "<p>hello</p>".to_string(),
        lead_id: "lead-1".to_string(),
        sequence_id: "seq-1".to_string(),
        step_id: "step-1".to_string(),
        template_id: "tpl-1".to_string(),
        from_email: None,
        from_name: None,
        reply_to: None,
        cc: Vec::new(),
        bcc: Vec::new(),
    }
}

fn mailer(client: Arc<FlakyClient>, attempts: u32) -> RetryingMailer {
    RetryingMailer::with_policy(
        client,
        attempts,
        Duration::from_millis(1),
        Duration::from_millis(50),
    )
}

#[tokio::test]
async fn test_succeeds_after_transient_errors() {
    let client = FlakyClient::new(FailureMode::ErrorFirst(2));
    let outcome = mailer(client.clone(), 3).send(&email()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.message_id.as_deref(), Some("msg-3"));
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn test_exhausts_the_attempt_budget() {
    let client = FlakyClient::new(FailureMode::ErrorFirst(10));
    let result = mailer(client.clone(), 3).send(&email()).await;

    assert!(matches!(result, Err(Error::Provider { .. })));
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn test_unsuccessful_outcomes_are_retried() {
    let client = FlakyClient::new(FailureMode::UnsuccessfulFirst(1));
    let outcome = mailer(client.clone(), 3).send(&email()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_unsuccessful_outcome_error_is_surfaced() {
    let client = FlakyClient::new(FailureMode::UnsuccessfulFirst(10));
    let result = mailer(client.clone(), 2).send(&email()).await;

    match result {
        Err(Error::Provider { message }) => assert_eq!(message, "mailbox busy"),
        other => panic!("expected provider error, got {:?}", other.map(|o| o.success)),
    }
}

#[tokio::test]
async fn test_hanging_provider_times_out_each_attempt() {
    let client = FlakyClient::new(FailureMode::Hang);
    let result = mailer(client.clone(), 2).send(&email()).await;

    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_single_attempt_policy_never_retries() {
    let client = FlakyClient::new(FailureMode::ErrorFirst(1));
    let result = mailer(client.clone(), 1).send(&email()).await;

    assert!(result.is_err());
    assert_eq!(client.calls(), 1);
}
