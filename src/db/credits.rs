use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::Database;
use crate::error::Result;
use crate::models::{Credit, CreditLedgerEntry};

impl Database {
    pub async fn get_or_create_credit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Credit> {
        if let Some(credit) = sqlx::query_as::<_, Credit>(
            "SELECT * FROM credits WHERE tenant_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        {
            return Ok(credit);
        }

        let credit = Credit::new(tenant_id.to_string(), user_id.to_string());
        sqlx::query(
            "INSERT INTO credits (tenant_id, user_id, balance, reserved_amount, version) VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(&credit.tenant_id)
        .bind(&credit.user_id)
        .bind(credit.balance)
        .bind(credit.reserved_amount)
        .bind(credit.version)
        .execute(&mut **tx)
        .await?;
        Ok(credit)
    }

    /// Optimistic CAS on `version`; caller retries the read-modify-write on false.
    pub async fn update_credit_cas(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        credit: &Credit,
        expected_version: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE credits SET balance = $1, reserved_amount = $2, version = $3
            WHERE tenant_id = $4 AND user_id = $5 AND version = $6
            "#,
        )
        .bind(credit.balance)
        .bind(credit.reserved_amount)
        .bind(credit.version)
        .bind(&credit.tenant_id)
        .bind(&credit.user_id)
        .bind(expected_version)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn append_ledger_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &CreditLedgerEntry,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_ledger (
                id, tenant_id, user_id, entry_type, amount, balance_after, reference_id, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.tenant_id)
        .bind(&entry.user_id)
        .bind(entry.entry_type)
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(entry.reference_id)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Find the ledger entry standing for a reservation, to make
    /// confirm/cancel idempotent (spec §4.5: "re-check that the reservation
    /// has not already been confirmed/cancelled").
    pub async fn reservation_already_settled(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        reservation_id: Uuid,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM credit_ledger
            WHERE reference_id = $1 AND entry_type IN ('CONFIRM', 'CANCEL')
            "#,
        )
        .bind(reservation_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count > 0)
    }

    pub async fn ledger_for_user(&self, tenant_id: &str, user_id: &str) -> Result<Vec<CreditLedgerEntry>> {
        let entries = sqlx::query_as::<_, CreditLedgerEntry>(
            "SELECT * FROM credit_ledger WHERE tenant_id = $1 AND user_id = $2 ORDER BY created_at",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
