//! LeadSequenceState table operations.
//!
//! One row per `(lead, sequence)` enrollment. The scheduler reads due rows
//! and flips them to RUNNING; the worker advances the cursor on a successful
//! send. Both writes carry a `status IN ('PENDING','RUNNING')` guard so
//! terminal rows are never touched and concurrent writers cannot race past
//! each other.

use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::types::{PendingLead, StateRow};

/// Leads whose next step is due.
///
/// The `"updatedAt"` guard is the in-flight backoff: a row flipped to
/// RUNNING less than an hour ago is skipped, which bounds duplicate
/// enqueues while an earlier outbox row for the same step is still moving
/// through the pipeline.
const SELECT_DUE_STEPS: &str = r#"
    SELECT s.id AS lead_state_id,
           s."leadId" AS lead_id,
           s."sequenceId" AS sequence_id,
           s."currentStep" AS current_step,
           st.id AS step_id,
           st."stepNumber" AS step_number,
           st."minIntervalMin" AS min_interval_min
    FROM "LeadSequenceState" s
    JOIN "SequenceStep" st
      ON st."sequenceId" = s."sequenceId"
     AND st."stepNumber" = s."currentStep" + 1
    WHERE s.status IN ('PENDING', 'RUNNING')
      AND (s."lastSentAt" IS NULL
           OR s."lastSentAt" < NOW() - make_interval(mins => st."minIntervalMin"))
      AND s."updatedAt" < NOW() - INTERVAL '1 hour'
    ORDER BY s."updatedAt" ASC
    LIMIT $1;
"#;

const MARK_RUNNING: &str = r#"
    UPDATE "LeadSequenceState"
    SET status = 'RUNNING', "updatedAt" = NOW()
    WHERE id = $1 AND status IN ('PENDING', 'RUNNING');
"#;

/// Conditional cursor advancement. The `"currentStep" = $2` check makes the
/// statement idempotent under broker redelivery: a second delivery of the
/// same message matches zero rows.
const ADVANCE_STATE: &str = r#"
    UPDATE "LeadSequenceState" AS s
    SET "currentStep" = s."currentStep" + 1,
        status = CASE
            WHEN s."currentStep" + 1 >= (
                SELECT MAX("stepNumber") FROM "SequenceStep"
                WHERE "sequenceId" = s."sequenceId"
            ) THEN 'COMPLETED'
            ELSE 'RUNNING'
        END,
        "lastSentAt" = NOW(),
        "failureCount" = 0,
        "updatedAt" = NOW()
    WHERE s.id = $1
      AND s.status IN ('PENDING', 'RUNNING')
      AND s."currentStep" = $2
    RETURNING s.id, s.status::text AS status, s."currentStep" AS current_step;
"#;

/// LeadSequenceState table operations.
#[derive(Debug, Clone)]
pub struct LeadSequenceStates {
    pool: PgPool,
}

impl LeadSequenceStates {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return up to `limit` eligibility rows, joined to their next step.
    pub async fn due_steps(&self, limit: i64) -> Result<Vec<PendingLead>> {
        let rows = sqlx::query_as::<_, PendingLead>(SELECT_DUE_STEPS)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "SELECT_DUE_STEPS".into(),
                source: Box::new(e),
                context: format!("Failed to select up to {} due lead states", limit),
            })?;
        Ok(rows)
    }

    /// Flip a state to RUNNING inside the caller's enqueue transaction.
    /// Returns the number of rows updated; zero means a worker advanced the
    /// row to a terminal state in the meantime.
    pub async fn mark_running<'a, 'b: 'a>(
        &self,
        state_id: &str,
        tx: &'a mut sqlx::Transaction<'b, sqlx::Postgres>,
    ) -> Result<u64> {
        let rows_affected = sqlx::query(MARK_RUNNING)
            .bind(state_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "MARK_RUNNING".into(),
                source: Box::new(e),
                context: format!("Failed to mark lead state {} RUNNING", state_id),
            })?
            .rows_affected();
        Ok(rows_affected)
    }

    /// Advance the cursor past `expected_step`. `None` means the row was
    /// concurrently advanced or is terminal; callers treat that as success.
    pub async fn advance(
        &self,
        state_id: &str,
        expected_step: i32,
    ) -> Result<Option<StateRow>> {
        let row = sqlx::query_as::<_, StateRow>(ADVANCE_STATE)
            .bind(state_id)
            .bind(expected_step)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "ADVANCE_STATE".into(),
                source: Box::new(e),
                context: format!(
                    "Failed to advance lead state {} past step {}",
                    state_id, expected_step
                ),
            })?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligibility_joins_on_the_next_step() {
        assert!(SELECT_DUE_STEPS.contains(r#"st."stepNumber" = s."currentStep" + 1"#));
    }

    #[test]
    fn test_eligibility_filters_on_live_statuses() {
        assert!(SELECT_DUE_STEPS.contains("s.status IN ('PENDING', 'RUNNING')"));
    }

    #[test]
    fn test_eligibility_honors_the_step_cooldown() {
        assert!(SELECT_DUE_STEPS.contains(r#"s."lastSentAt" IS NULL"#));
        assert!(SELECT_DUE_STEPS.contains(r#"make_interval(mins => st."minIntervalMin")"#));
    }

    #[test]
    fn test_eligibility_keeps_the_in_flight_backoff_guard() {
        assert!(SELECT_DUE_STEPS.contains(r#"s."updatedAt" < NOW() - INTERVAL '1 hour'"#));
    }

    #[test]
    fn test_mark_running_never_touches_terminal_rows() {
        assert!(MARK_RUNNING.contains("status IN ('PENDING', 'RUNNING')"));
        assert!(MARK_RUNNING.contains("status = 'RUNNING'"));
    }

    // The cursor guard is what makes advancement exactly-once under broker
    // redelivery.
    #[test]
    fn test_advance_guards_on_the_expected_cursor() {
        assert!(ADVANCE_STATE.contains(r#"s."currentStep" = $2"#));
        assert!(ADVANCE_STATE.contains("s.status IN ('PENDING', 'RUNNING')"));
    }

    #[test]
    fn test_advance_moves_the_cursor_by_exactly_one() {
        assert!(ADVANCE_STATE.contains(r#""currentStep" = s."currentStep" + 1"#));
    }

    #[test]
    fn test_advance_completes_only_at_the_final_step() {
        assert!(ADVANCE_STATE.contains(r#"s."currentStep" + 1 >= ("#));
        assert!(ADVANCE_STATE.contains(r#"MAX("stepNumber")"#));
        assert!(ADVANCE_STATE.contains("THEN 'COMPLETED'"));
        assert!(ADVANCE_STATE.contains("ELSE 'RUNNING'"));
    }

    #[test]
    fn test_advance_resets_failures_and_stamps_the_send() {
        assert!(ADVANCE_STATE.contains(r#""lastSentAt" = NOW()"#));
        assert!(ADVANCE_STATE.contains(r#""failureCount" = 0"#));
        assert!(ADVANCE_STATE.contains(r#""updatedAt" = NOW()"#));
    }
}
