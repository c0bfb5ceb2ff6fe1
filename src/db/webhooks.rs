use chrono::{DateTime, Utc};

use super::Database;
use crate::error::Result;

impl Database {
    /// Inserts the `(vendor, nonce)` pair; `false` means the nonce was
    /// already seen (spec §6: "`X-Nonce` must be unique within 5 min").
    pub async fn record_webhook_nonce(&self, vendor: &str, nonce: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO webhook_nonces (vendor, nonce, seen_at) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(vendor)
        .bind(nonce)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn purge_expired_webhook_nonces(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM webhook_nonces WHERE seen_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Increments the failure counter for `pg_transaction_id`; returns the
    /// new attempt count so the caller can decide whether to escalate to the
    /// operator inbox (spec §7: "repeated failures ... go to an operator
    /// inbox after N attempts").
    pub async fn record_webhook_failure(&self, pg_transaction_id: &str, error: &str) -> Result<i32> {
        let count: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_failures (pg_transaction_id, attempt_count, last_error, last_attempt_at, escalated)
            VALUES ($1, 1, $2, $3, false)
            ON CONFLICT (pg_transaction_id) DO UPDATE SET
                attempt_count = webhook_failures.attempt_count + 1,
                last_error = EXCLUDED.last_error,
                last_attempt_at = EXCLUDED.last_attempt_at
            RETURNING attempt_count
            "#,
        )
        .bind(pg_transaction_id)
        .bind(error)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn escalate_webhook_failure(&self, pg_transaction_id: &str) -> Result<()> {
        sqlx::query("UPDATE webhook_failures SET escalated = true WHERE pg_transaction_id = $1")
            .bind(pg_transaction_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_webhook_failure(&self, pg_transaction_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM webhook_failures WHERE pg_transaction_id = $1")
            .bind(pg_transaction_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
