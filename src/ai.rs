//! Gemini client backing the `aiOpener` template variable.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::template::OpenerSource;
use crate::types::LeadRecord;

const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
}

impl GeminiClient {
    /// `timeout` bounds every call; a timed-out opener surfaces as an error
    /// and the template layer substitutes its static fallback.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ExternalService {
                service: "gemini".to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            api_key: api_key.into(),
        })
    }

    fn prompt_for(lead: &LeadRecord) -> String {
        let mut persona = String::new();
        if let Some(job_title) = lead.job_title.as_deref() {
            persona.push_str(job_title);
        }
        if let Some(company) = lead.company_name.as_deref() {
            if !persona.is_empty() {
                persona.push_str(" at ");
            }
            persona.push_str(company);
        }
        if let Some(industry) = lead.industry.as_deref() {
            if !persona.is_empty() {
                persona.push_str(", ");
            }
            persona.push_str(industry);
            persona.push_str(" industry");
        }
        if persona.is_empty() {
            persona.push_str("a professional");
        }

        format!(
            "Write one short, friendly opening line for a cold email to {}. \
             Plain text, no greeting word, no quotes. Return only the line.",
            persona
        )
    }
}

#[async_trait]
impl OpenerSource for GeminiClient {
    async fn opener(&self, lead: &LeadRecord) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": Self::prompt_for(lead) }] }]
        });

        let response = self
            .http
            .post(GEMINI_ENDPOINT)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ExternalService {
                service: "gemini".to_string(),
                message: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(Error::ExternalService {
                service: "gemini".to_string(),
                message: format!("unexpected status {}", response.status()),
            });
        }

        let payload: serde_json::Value =
            response.json().await.map_err(|e| Error::ExternalService {
                service: "gemini".to_string(),
                message: format!("invalid response body: {}", e),
            })?;

        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|t| t.lines().next().unwrap_or("").trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::ExternalService {
                service: "gemini".to_string(),
                message: "response carried no text candidate".to_string(),
            })?;

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead_with(job: Option<&str>, company: Option<&str>) -> LeadRecord {
        LeadRecord {
            id: "lead-1".to_string(),
            email: "a@b.c".to_string(),
            first_name: None,
            last_name: None,
            job_title: job.map(String::from),
            company_name: company.map(String::from),
            industry: None,
            country: None,
            state: None,
            address: None,
            linkedin_url: None,
            source: None,
            is_subscribed_to_email: true,
            is_email_valid: "VALID".to_string(),
            company_size: None,
        }
    }

    #[test]
    fn test_prompt_includes_known_attributes() {
        let prompt = GeminiClient::prompt_for(&lead_with(Some("CTO"), Some("Acme")));
        assert!(prompt.contains("CTO at Acme"));
    }

    #[test]
    fn test_prompt_has_a_generic_persona_fallback() {
        let prompt = GeminiClient::prompt_for(&lead_with(None, None));
        assert!(prompt.contains("a professional"));
    }
}
