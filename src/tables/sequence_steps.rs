//! Sequence step and template catalog reads.

use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::types::{StepRecord, TemplateRecord};

const GET_STEP: &str = r#"
    SELECT st.id,
           st."sequenceId" AS sequence_id,
           st."stepNumber" AS step_number,
           st."minIntervalMin" AS min_interval_min,
           st."timeWindows" AS time_windows,
           st."requireNoReply" AS require_no_reply,
           st."stopOnBounce" AS stop_on_bounce
    FROM "SequenceStep" st
    WHERE st.id = $1;
"#;

/// Templates attached to a step, through the implicit join table.
const TEMPLATES_FOR_STEP: &str = r#"
    SELECT t.id,
           ct.subject,
           ct."htmlBody" AS html_body
    FROM "_SequenceStepToSequenceTemplate" j
    JOIN "SequenceTemplate" t ON t.id = j."B"
    JOIN "EmailCampaignTemplate" ct ON ct.id = t."templateId"
    WHERE j."A" = $1;
"#;

#[derive(Debug, Clone)]
pub struct SequenceSteps {
    pool: PgPool,
}

impl SequenceSteps {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Option<StepRecord>> {
        let step = sqlx::query_as::<_, StepRecord>(GET_STEP)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "GET_STEP".into(),
                source: Box::new(e),
                context: format!("Failed to load sequence step {}", id),
            })?;
        Ok(step)
    }

    /// All templates attached to a step; the worker picks one uniformly at
    /// random per send.
    pub async fn templates(&self, step_id: &str) -> Result<Vec<TemplateRecord>> {
        let templates = sqlx::query_as::<_, TemplateRecord>(TEMPLATES_FOR_STEP)
            .bind(step_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "TEMPLATES_FOR_STEP".into(),
                source: Box::new(e),
                context: format!("Failed to load templates for step {}", step_id),
            })?;
        Ok(templates)
    }
}
