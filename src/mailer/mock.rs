//! Mock mail client for non-production environments.

use async_trait::async_trait;
use uuid::Uuid;

use super::MailClient;
use crate::config::Config;
use crate::error::Result;
use crate::types::{EmailData, SendOutcome};

/// Returns synthetic successes with a mock message id; nothing leaves the
/// process.
pub struct MockMailClient {
    from_email: String,
    from_name: String,
}

impl MockMailClient {
    pub fn new(config: &Config) -> Self {
        Self {
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        }
    }
}

#[async_trait]
impl MailClient for MockMailClient {
    async fn send(&self, email: &EmailData) -> Result<SendOutcome> {
        let message_id = format!("mock-{}", Uuid::new_v4());
        tracing::debug!(
            to = %email.to,
            subject = %email.subject,
            message_id = %message_id,
            "mock send"
        );
        Ok(SendOutcome::ok(message_id))
    }

    fn from_email(&self) -> &str {
        &self.from_email
    }

    fn from_name(&self) -> &str {
        &self.from_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[tokio::test]
    async fn test_send_returns_a_synthetic_success() {
        let config = Config::from_database_url("postgresql://t@localhost/db");
        let client = MockMailClient::new(&config);

        let outcome = client.send(&email()).await.unwrap();

        assert!(outcome.success);
        assert!(outcome.error.is_none());
        let message_id = outcome.message_id.expect("mock send always carries an id");
        assert!(message_id.starts_with("mock-"));
    }

    #[tokio::test]
    async fn test_every_send_gets_a_fresh_message_id() {
        let config = Config::from_database_url("postgresql://t@localhost/db");
        let client = MockMailClient::new(&config);

        let first = client.send(&email()).await.unwrap().message_id.unwrap();
        let second = client.send(&email()).await.unwrap().message_id.unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_sender_identity_comes_from_config() {
        let mut config = Config::from_database_url("postgresql://t@localhost/db");
        config.from_email = "hello@dripq.dev".to_string();
        config.from_name = "Drip Queue".to_string();

        let client = MockMailClient::new(&config);
        assert_eq!(client.from_email(), "hello@dripq.dev");
        assert_eq!(client.from_name(), "Drip Queue");
    }
}
