//! AWS SES v2 mail client.

use async_trait::async_trait;

use super::MailClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{EmailData, SendOutcome};

pub struct SesMailClient {
    client: aws_sdk_sesv2::Client,
    from_email: String,
    from_name: String,
}

impl SesMailClient {
    /// Credentials and region come from the environment; their presence is
    /// validated at startup through [`Config::validate_ses_environment`].
    pub async fn new(config: &Config) -> Result<Self> {
        let aws_config = aws_config::load_from_env().await;
        let client = aws_sdk_sesv2::Client::new(&aws_config);

        Ok(Self {
            client,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        })
    }
}

#[async_trait]
impl MailClient for SesMailClient {
    async fn send(&self, email: &EmailData) -> Result<SendOutcome> {
        use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};

        let from_email = email.from_email.as_deref().unwrap_or(&self.from_email);
        let from_name = email.from_name.as_deref().unwrap_or(&self.from_name);
        let from_address = format!("{} <{}>", from_name, from_email);

        let build_content = |data: &str| {
            Content::builder()
                .data(data)
                .charset("UTF-8")
                .build()
                .map_err(|e| Error::Provider {
                    message: format!("Failed to build SES content: {}", e),
                })
        };

        let body = Body::builder().html(build_content(&email.body)?).build();

        let content = EmailContent::builder()
            .simple(
                Message::builder()
                    .subject(build_content(&email.subject)?)
                    .body(body)
                    .build(),
            )
            .build();

        let mut destination = Destination::builder().to_addresses(&email.to);
        for cc in &email.cc {
            destination = destination.cc_addresses(cc);
        }
        for bcc in &email.bcc {
            destination = destination.bcc_addresses(bcc);
        }

        let mut request = self
            .client
            .send_email()
            .from_email_address(from_address)
            .destination(destination.build())
            .content(content);
        if let Some(reply_to) = &email.reply_to {
            request = request.reply_to_addresses(reply_to);
        }

        let response = request.send().await.map_err(|e| Error::Provider {
            message: format!("Failed to send email via SES: {}", e),
        })?;

        Ok(SendOutcome {
            success: true,
            message_id: response.message_id().map(str::to_string),
            error: None,
        })
    }

    fn from_email(&self) -> &str {
        &self.from_email
    }

    fn from_name(&self) -> &str {
        &self.from_name
    }
}
