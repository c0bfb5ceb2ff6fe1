use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::Database;
use crate::error::{AppError, Result};
use crate::models::Payment;

impl Database {
    /// Enforces "at most one Payment per order_id" via a unique constraint;
    /// a duplicate insert surfaces as a distinguishable error for the caller
    /// to translate into a domain conflict.
    pub async fn insert_payment(&self, tx: &mut Transaction<'_, Postgres>, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, tenant_id, order_id, amount, currency, status, payment_method,
                pg_transaction_id, pg_payment_key, failure_reason,
                created_at, updated_at, approved_at, confirmed_at, failed_at, version
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            "#,
        )
        .bind(payment.id)
        .bind(&payment.tenant_id)
        .bind(payment.order_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status)
        .bind(&payment.payment_method)
        .bind(&payment.pg_transaction_id)
        .bind(&payment.pg_payment_key)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.approved_at)
        .bind(payment.confirmed_at)
        .bind(payment.failed_at)
        .bind(payment.version)
        .execute(&mut **tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::Validation(format!("payment already exists for order {}", payment.order_id))
            }
            _ => AppError::Database(e),
        })?;
        Ok(())
    }

    /// Optimistic compare-and-swap on `version` (spec §5 locking discipline).
    pub async fn update_payment_cas(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
        expected_version: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = $1, payment_method = $2, pg_transaction_id = $3, pg_payment_key = $4,
                failure_reason = $5, updated_at = $6, approved_at = $7, confirmed_at = $8,
                failed_at = $9, version = $10
            WHERE id = $11 AND tenant_id = $12 AND version = $13
            "#,
        )
        .bind(payment.status)
        .bind(&payment.payment_method)
        .bind(&payment.pg_transaction_id)
        .bind(&payment.pg_payment_key)
        .bind(&payment.failure_reason)
        .bind(payment.updated_at)
        .bind(payment.approved_at)
        .bind(payment.confirmed_at)
        .bind(payment.failed_at)
        .bind(payment.version)
        .bind(payment.id)
        .bind(&payment.tenant_id)
        .bind(expected_version)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_payment(&self, tenant_id: &str, id: Uuid) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    pub async fn get_payment_by_order(&self, tenant_id: &str, order_id: Uuid) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE order_id = $1 AND tenant_id = $2",
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    pub async fn get_payment_by_pg_transaction_id(
        &self,
        pg_transaction_id: &str,
    ) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE pg_transaction_id = $1",
        )
        .bind(pg_transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }
}
