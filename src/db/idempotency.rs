use chrono::{DateTime, Utc};

use super::Database;
use crate::error::{AppError, Result};
use crate::models::IdempotencyRecord;

impl Database {
    /// Insert a placeholder row; relies on the UNIQUE(tenant_id, endpoint,
    /// client_key) constraint to make this the durable-tier lock (spec §4.1).
    pub async fn insert_idempotency_placeholder(
        &self,
        tenant_id: &str,
        endpoint: &str,
        client_key: &str,
        payload_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (tenant_id, endpoint, client_key, payload_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, endpoint, client_key) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(endpoint)
        .bind(client_key)
        .bind(payload_hash)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_idempotency_record(
        &self,
        tenant_id: &str,
        endpoint: &str,
        client_key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            "SELECT * FROM idempotency_keys WHERE tenant_id = $1 AND endpoint = $2 AND client_key = $3",
        )
        .bind(tenant_id)
        .bind(endpoint)
        .bind(client_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn complete_idempotency_record(
        &self,
        tenant_id: &str,
        endpoint: &str,
        client_key: &str,
        response: &[u8],
        http_status: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_keys SET response = $1, http_status = $2
            WHERE tenant_id = $3 AND endpoint = $4 AND client_key = $5
            "#,
        )
        .bind(response)
        .bind(http_status)
        .bind(tenant_id)
        .bind(endpoint)
        .bind(client_key)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Internal(
                "idempotency placeholder missing on store()".into(),
            ));
        }
        Ok(())
    }

    pub async fn release_idempotency_placeholder(
        &self,
        tenant_id: &str,
        endpoint: &str,
        client_key: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM idempotency_keys WHERE tenant_id = $1 AND endpoint = $2 AND client_key = $3 AND response IS NULL",
        )
        .bind(tenant_id)
        .bind(endpoint)
        .bind(client_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn purge_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
