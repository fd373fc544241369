//! Outbox table operations.
//!
//! The `"Outbox"` table is the durable hand-off from scheduler to broker:
//! inserted by the scheduler inside the enqueue transaction, claimed and
//! marked processed by the pump in a single skip-locked statement, and
//! reverted by the pump when a publish fails.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{NewOutboxRow, OutboxRow, OutboxStats};

const COUNT_BY_IDEM_KEY: &str = r#"
    SELECT COUNT(*) FROM "Outbox" WHERE "idemKey" = $1;
"#;

const INSERT_OUTBOX: &str = r#"
    INSERT INTO "Outbox" (id, topic, payload, "idemKey")
    VALUES ($1, $2, $3, $4);
"#;

/// Claim-and-mark in one statement. `SKIP LOCKED` keeps concurrent pump
/// instances on disjoint row sets; incrementing `retries` here bounds
/// republish storms when the broker flaps.
const CLAIM_BATCH: &str = r#"
    UPDATE "Outbox"
    SET processed = true, "processedAt" = NOW(), retries = retries + 1
    WHERE id IN (
        SELECT id FROM "Outbox"
        WHERE processed = false AND retries < "maxRetries"
        ORDER BY "createdAt"
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, topic, payload, "idemKey" AS idem_key, processed,
              "processedAt" AS processed_at, retries,
              "maxRetries" AS max_retries, "createdAt" AS created_at;
"#;

const REVERT_ROW: &str = r#"
    UPDATE "Outbox" SET processed = false, "processedAt" = NULL WHERE id = $1;
"#;

const PURGE_PROCESSED: &str = r#"
    DELETE FROM "Outbox"
    WHERE processed = true AND "processedAt" < NOW() - make_interval(secs => $1::double precision);
"#;

const OUTBOX_STATS: &str = r#"
    SELECT
        COUNT(*) FILTER (WHERE processed = false AND retries < "maxRetries") AS pending,
        COUNT(*) FILTER (WHERE processed = true) AS processed,
        COUNT(*) FILTER (WHERE processed = false AND retries >= "maxRetries") AS exhausted
    FROM "Outbox";
"#;

/// Outbox table operations.
#[derive(Debug, Clone)]
pub struct Outbox {
    pool: PgPool,
}

impl Outbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Count rows carrying this idempotency key, inside the caller's
    /// enqueue transaction.
    pub async fn count_by_idem_key<'a, 'b: 'a>(
        &self,
        idem_key: &str,
        tx: &'a mut sqlx::Transaction<'b, sqlx::Postgres>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(COUNT_BY_IDEM_KEY)
            .bind(idem_key)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "COUNT_BY_IDEM_KEY".into(),
                source: Box::new(e),
                context: format!("Failed to count outbox rows for idemKey {}", idem_key),
            })?;
        Ok(count)
    }

    /// Insert a new send intent inside the caller's enqueue transaction.
    ///
    /// A unique violation on `"idemKey"` maps to [`Error::DuplicateIntent`]:
    /// another scheduler instance won the race for the same step.
    pub async fn insert<'a, 'b: 'a>(
        &self,
        row: NewOutboxRow,
        tx: &'a mut sqlx::Transaction<'b, sqlx::Postgres>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(INSERT_OUTBOX)
            .bind(id)
            .bind(&row.topic)
            .bind(&row.payload)
            .bind(&row.idem_key)
            .execute(&mut **tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => Error::DuplicateIntent {
                    idem_key: row.idem_key.clone(),
                },
                _ => Error::QueryFailed {
                    query: "INSERT_OUTBOX".into(),
                    source: Box::new(e),
                    context: format!("Failed to insert outbox row for idemKey {}", row.idem_key),
                },
            })?;
        Ok(id)
    }

    /// Atomically claim up to `limit` unprocessed rows and mark them
    /// processed. Rows whose retry budget is spent are never returned.
    pub async fn claim_batch(&self, limit: i64) -> Result<Vec<OutboxRow>> {
        let rows = sqlx::query_as::<_, OutboxRow>(CLAIM_BATCH)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "CLAIM_BATCH".into(),
                source: Box::new(e),
                context: format!("Failed to claim up to {} outbox rows", limit),
            })?;
        Ok(rows)
    }

    /// Release a claimed row after a failed publish so a later claim picks
    /// it up again, bounded by its `"maxRetries"`.
    pub async fn revert(&self, id: Uuid) -> Result<u64> {
        let rows_affected = sqlx::query(REVERT_ROW)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "REVERT_ROW".into(),
                source: Box::new(e),
                context: format!("Failed to revert outbox row {}", id),
            })?
            .rows_affected();
        Ok(rows_affected)
    }

    /// Delete published rows older than the retention window.
    pub async fn purge_processed(&self, older_than: std::time::Duration) -> Result<u64> {
        let rows_affected = sqlx::query(PURGE_PROCESSED)
            .bind(older_than.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "PURGE_PROCESSED".into(),
                source: Box::new(e),
                context: "Failed to purge processed outbox rows".into(),
            })?
            .rows_affected();
        Ok(rows_affected)
    }

    /// Aggregate counts for operational logging.
    pub async fn stats(&self) -> Result<OutboxStats> {
        let stats = sqlx::query_as::<_, OutboxStats>(OUTBOX_STATS)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::QueryFailed {
                query: "OUTBOX_STATS".into(),
                source: Box::new(e),
                context: "Failed to read outbox stats".into(),
            })?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The claim statement carries the concurrency contract; these guards
    // must never fall out of it.
    #[test]
    fn test_claim_batch_uses_skip_locked() {
        assert!(CLAIM_BATCH.contains("FOR UPDATE SKIP LOCKED"));
    }

    #[test]
    fn test_claim_batch_respects_the_retry_budget() {
        assert!(CLAIM_BATCH.contains(r#"retries < "maxRetries""#));
        assert!(CLAIM_BATCH.contains("retries = retries + 1"));
    }

    #[test]
    fn test_claim_batch_only_touches_unprocessed_rows_in_fifo_order() {
        assert!(CLAIM_BATCH.contains("processed = false"));
        assert!(CLAIM_BATCH.contains(r#"ORDER BY "createdAt""#));
    }

    #[test]
    fn test_claim_batch_marks_rows_processed_with_a_timestamp() {
        assert!(CLAIM_BATCH.contains("SET processed = true"));
        assert!(CLAIM_BATCH.contains(r#""processedAt" = NOW()"#));
    }

    #[test]
    fn test_revert_clears_both_processed_columns() {
        assert!(REVERT_ROW.contains("processed = false"));
        assert!(REVERT_ROW.contains(r#""processedAt" = NULL"#));
    }

    #[test]
    fn test_dedup_count_keys_off_the_idem_key() {
        assert!(COUNT_BY_IDEM_KEY.contains(r#""idemKey" = $1"#));
    }

    #[test]
    fn test_purge_only_deletes_published_rows() {
        assert!(PURGE_PROCESSED.contains("processed = true"));
    }
}
