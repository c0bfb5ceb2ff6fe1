use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::Database;
use crate::error::Result;
use crate::models::Refund;
use rust_decimal::Decimal;

impl Database {
    pub async fn insert_refund(&self, refund: &Refund) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, tenant_id, payment_id, amount, currency, status, reason,
                pg_refund_id, created_at, updated_at, completed_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            "#,
        )
        .bind(refund.id)
        .bind(&refund.tenant_id)
        .bind(refund.payment_id)
        .bind(refund.amount)
        .bind(&refund.currency)
        .bind(refund.status)
        .bind(&refund.reason)
        .bind(&refund.pg_refund_id)
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .bind(refund.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bookkeeping-only transition (e.g. REQUESTED -> PROCESSING) with no
    /// paired outbox emission; runs outside any caller transaction.
    pub async fn update_refund(&self, refund: &Refund) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE refunds SET status = $1, pg_refund_id = $2, updated_at = $3, completed_at = $4
            WHERE id = $5 AND tenant_id = $6
            "#,
        )
        .bind(refund.status)
        .bind(&refund.pg_refund_id)
        .bind(refund.updated_at)
        .bind(refund.completed_at)
        .bind(refund.id)
        .bind(&refund.tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transitions that imply an outbox emission (e.g. completion) must run
    /// in the same DB transaction as the outbox insert (spec §4.2).
    pub async fn update_refund_tx(&self, tx: &mut Transaction<'_, Postgres>, refund: &Refund) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE refunds SET status = $1, pg_refund_id = $2, updated_at = $3, completed_at = $4
            WHERE id = $5 AND tenant_id = $6
            "#,
        )
        .bind(refund.status)
        .bind(&refund.pg_refund_id)
        .bind(refund.updated_at)
        .bind(refund.completed_at)
        .bind(refund.id)
        .bind(&refund.tenant_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get_refund(&self, tenant_id: &str, id: Uuid) -> Result<Option<Refund>> {
        let refund = sqlx::query_as::<_, Refund>(
            "SELECT * FROM refunds WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(refund)
    }

    pub async fn list_refunds_by_payment(&self, tenant_id: &str, payment_id: Uuid) -> Result<Vec<Refund>> {
        let refunds = sqlx::query_as::<_, Refund>(
            "SELECT * FROM refunds WHERE payment_id = $1 AND tenant_id = $2 ORDER BY created_at",
        )
        .bind(payment_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(refunds)
    }

    /// Sum of COMPLETED refunds for a payment (spec §3 invariant check input).
    pub async fn completed_refund_total(&self, tenant_id: &str, payment_id: Uuid) -> Result<Decimal> {
        let total: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount) FROM refunds
            WHERE payment_id = $1 AND tenant_id = $2 AND status = 'COMPLETED'
            "#,
        )
        .bind(payment_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }
}
