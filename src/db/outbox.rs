use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::Database;
use crate::error::Result;
use crate::models::{OutboxEvent, OutboxStatus};

impl Database {
    /// Inserts the PENDING outbox row inside the caller's transaction, so it
    /// commits atomically with the state change it describes (spec §4.2).
    pub async fn insert_outbox_event(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (
                event_id, tenant_id, aggregate_type, aggregate_id, event_type,
                payload, status, retry_count, created_at, published_at, error, next_attempt_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.tenant_id)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status)
        .bind(event.retry_count)
        .bind(event.created_at)
        .bind(event.published_at)
        .bind(&event.error)
        .bind(event.next_attempt_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Claim a batch of PENDING rows due for (re)delivery and flip them to
    /// PROCESSING in one transaction using `FOR UPDATE SKIP LOCKED`, so
    /// competing publisher instances never race on the same rows (spec
    /// §4.2). The `next_attempt_at <= now` gate is what makes a failed
    /// publish's exponential backoff (`OutboxEvent::backoff_delay`) actually
    /// delay redelivery instead of retrying on the very next poll tick.
    pub async fn claim_outbox_batch(&self, batch_size: i64) -> Result<Vec<OutboxEvent>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT * FROM outbox_events
            WHERE status = 'PENDING' AND next_attempt_at <= $1
            ORDER BY created_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(Utc::now())
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if !rows.is_empty() {
            let ids: Vec<Uuid> = rows.iter().map(|r| r.event_id).collect();
            sqlx::query("UPDATE outbox_events SET status = 'PROCESSING' WHERE event_id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(rows)
    }

    pub async fn mark_outbox_published(&self, event_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'PUBLISHED', published_at = $1 WHERE event_id = $2",
        )
        .bind(Utc::now())
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// On publish failure: increment retry_count and reset to PENDING with
    /// `next_attempt_at` pushed out by the exponential backoff (1s/2s/4s),
    /// or move to FAILED past `max_retries` (spec §4.2).
    pub async fn mark_outbox_retry_or_failed(
        &self,
        event_id: Uuid,
        error: &str,
        max_retries: i32,
    ) -> Result<()> {
        let row: (i32,) = sqlx::query_as("SELECT retry_count FROM outbox_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await?;
        let next_retry_count = row.0 + 1;
        let next_attempt_at = Utc::now() + OutboxEvent::backoff_delay(next_retry_count);

        sqlx::query(
            r#"
            UPDATE outbox_events SET
                retry_count = $1,
                error = $2,
                status = CASE WHEN $1 >= $3 THEN 'FAILED' ELSE 'PENDING' END,
                next_attempt_at = $4
            WHERE event_id = $5
            "#,
        )
        .bind(next_retry_count)
        .bind(error)
        .bind(max_retries)
        .bind(next_attempt_at)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Janitor sweep: rows stuck in PROCESSING past `stale_after` go back to
    /// PENDING (spec §4.2 "Failure semantics"). Uses `created_at` as the
    /// staleness clock since a claimed batch is processed promptly after
    /// insertion; a long-lived PENDING retry round restarts this clock via
    /// `mark_outbox_retry_or_failed`, which does not touch `created_at`.
    pub async fn reset_stale_processing(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events SET status = 'PENDING', next_attempt_at = $2
            WHERE status = 'PROCESSING' AND created_at < $1
            "#,
        )
        .bind(stale_before)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn record_processed_event(&self, event_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO processed_events (event_id, processed_at) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[allow(dead_code)]
    pub async fn outbox_status(&self, event_id: Uuid) -> Result<Option<OutboxStatus>> {
        let status: Option<OutboxStatus> = sqlx::query_scalar(
            "SELECT status FROM outbox_events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }
}
