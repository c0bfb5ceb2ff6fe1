//! Two-phase credit deduction service (spec §4.5): wires the pure
//! `models::credit` transition functions to transactional persistence with
//! ledger writes.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::models::{Credit, CreditLedgerEntry, LedgerEntryType};

pub struct CreditService {
    db: Arc<Database>,
}

impl CreditService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Phase 1. Returns the ledger entry id as the `reservation_id` (spec §4.5).
    pub async fn reserve(&self, tenant_id: &str, user_id: &str, amount: Decimal) -> Result<Uuid> {
        let mut tx = self.db.pool().begin().await?;
        let credit = self.db.get_or_create_credit(&mut tx, tenant_id, user_id).await?;
        let next = credit.reserve(amount)?;

        let reservation_id = Uuid::new_v4();
        let entry = CreditLedgerEntry::new(
            tenant_id.to_string(),
            user_id.to_string(),
            LedgerEntryType::Reserve,
            amount,
            next.balance,
            reservation_id,
        );
        self.db.append_ledger_entry(&mut tx, &entry).await?;

        let applied = self.db.update_credit_cas(&mut tx, &next, credit.version).await?;
        if !applied {
            tx.rollback().await?;
            return Err(crate::error::AppError::Invariant(format!(
                "credit for user {} changed concurrently during reserve",
                user_id
            )));
        }
        tx.commit().await?;
        Ok(reservation_id)
    }

    /// Phase 2 (commit path). Idempotent: a reservation already confirmed or
    /// cancelled is a no-op (spec §4.5, §8).
    pub async fn confirm(&self, tenant_id: &str, user_id: &str, reservation_id: Uuid, amount: Decimal) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        if self.db.reservation_already_settled(&mut tx, reservation_id).await? {
            tx.rollback().await?;
            return Ok(());
        }
        let credit = self.db.get_or_create_credit(&mut tx, tenant_id, user_id).await?;
        let next = credit.confirm(amount)?;

        let entry = CreditLedgerEntry::new(
            tenant_id.to_string(),
            user_id.to_string(),
            LedgerEntryType::Confirm,
            amount,
            next.balance,
            reservation_id,
        );
        self.db.append_ledger_entry(&mut tx, &entry).await?;
        let applied = self.db.update_credit_cas(&mut tx, &next, credit.version).await?;
        if !applied {
            tx.rollback().await?;
            return Err(crate::error::AppError::Invariant(format!(
                "credit for user {} changed concurrently during confirm",
                user_id
            )));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Phase 2 (release path). Idempotent like `confirm`.
    pub async fn cancel(&self, tenant_id: &str, user_id: &str, reservation_id: Uuid, amount: Decimal) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        if self.db.reservation_already_settled(&mut tx, reservation_id).await? {
            tx.rollback().await?;
            return Ok(());
        }
        let credit = self.db.get_or_create_credit(&mut tx, tenant_id, user_id).await?;
        let next = credit.cancel(amount)?;

        let entry = CreditLedgerEntry::new(
            tenant_id.to_string(),
            user_id.to_string(),
            LedgerEntryType::Cancel,
            amount,
            next.balance,
            reservation_id,
        );
        self.db.append_ledger_entry(&mut tx, &entry).await?;
        let applied = self.db.update_credit_cas(&mut tx, &next, credit.version).await?;
        if !applied {
            tx.rollback().await?;
            return Err(crate::error::AppError::Invariant(format!(
                "credit for user {} changed concurrently during cancel",
                user_id
            )));
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn refund(&self, tenant_id: &str, user_id: &str, reference_id: Uuid, amount: Decimal) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        let credit = self.db.get_or_create_credit(&mut tx, tenant_id, user_id).await?;
        let next = credit.refund(amount)?;

        let entry = CreditLedgerEntry::new(
            tenant_id.to_string(),
            user_id.to_string(),
            LedgerEntryType::Refund,
            amount,
            next.balance,
            reference_id,
        );
        self.db.append_ledger_entry(&mut tx, &entry).await?;
        let applied = self.db.update_credit_cas(&mut tx, &next, credit.version).await?;
        if !applied {
            tx.rollback().await?;
            return Err(crate::error::AppError::Invariant(format!(
                "credit for user {} changed concurrently during refund",
                user_id
            )));
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn reconstruct(&self, tenant_id: &str, user_id: &str) -> Result<Credit> {
        let entries = self.db.ledger_for_user(tenant_id, user_id).await?;
        Ok(crate::models::reconstruct_from_ledger(tenant_id, user_id, &entries))
    }
}
