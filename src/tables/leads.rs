//! Lead catalog reads.
//!
//! Leads and their enrichment are read-only for this pipeline; the worker
//! loads one joined row per send for eligibility checks and rendering.

use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::types::LeadRecord;

const GET_LEAD: &str = r#"
    SELECT l.id,
           l.email,
           l."firstName" AS first_name,
           l."lastName" AS last_name,
           l."jobTitle" AS job_title,
           l."companyName" AS company_name,
           l.industry,
           l.country,
           l.state,
           l.address,
           l."linkedinUrl" AS linkedin_url,
           l.source,
           l."isSubscribedToEmail" AS is_subscribed_to_email,
           l."isEmailValid"::text AS is_email_valid,
           e."companySize" AS company_size
    FROM "Lead" l
    LEFT JOIN "LeadEnrichment" e ON e."leadId" = l.id
    WHERE l.id = $1;
"#;

#[derive(Debug, Clone)]
pub struct Leads {
    pool: PgPool,
}

impl Leads {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Option<LeadRecord>> {
        let lead = sqlx::query_as::<_, LeadRecord>(GET_LEAD)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "GET_LEAD".into(),
                source: Box::new(e),
                context: format!("Failed to load lead {}", id),
            })?;
        Ok(lead)
    }
}
