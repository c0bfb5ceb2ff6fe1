use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Requested,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Refund {
    pub id: Uuid,
    pub tenant_id: String,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub pg_refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Refund {
    /// `already_refunded` is the sum of previously COMPLETED refunds for the
    /// same payment; `payment_amount`/`payment_currency` come from the
    /// owning Payment (spec §3 invariant: Σ completed refunds ≤ payment amount).
    pub fn new(
        tenant_id: String,
        payment_id: Uuid,
        amount: Decimal,
        payment_amount: Decimal,
        payment_currency: String,
        currency: String,
        already_refunded: Decimal,
        reason: Option<String>,
    ) -> Result<Self> {
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation("refund amount must be > 0".into()));
        }
        if currency != payment_currency {
            return Err(AppError::Validation(
                "refund currency must match payment currency".into(),
            ));
        }
        if already_refunded + amount > payment_amount {
            return Err(AppError::Validation(
                "refund amount exceeds remaining refundable balance".into(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            payment_id,
            amount,
            currency,
            status: RefundStatus::Requested,
            reason,
            pg_refund_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn start_processing(&self) -> Self {
        let mut next = self.clone();
        next.status = RefundStatus::Processing;
        next.updated_at = Utc::now();
        next
    }

    pub fn mark_completed(&self, pg_refund_id: String) -> Self {
        let mut next = self.clone();
        next.status = RefundStatus::Completed;
        next.pg_refund_id = Some(pg_refund_id);
        next.completed_at = Some(Utc::now());
        next.updated_at = Utc::now();
        next
    }

    pub fn mark_failed(&self) -> Self {
        let mut next = self.clone();
        next.status = RefundStatus::Failed;
        next.updated_at = Utc::now();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cannot_refund_more_than_payment_amount() {
        let err = Refund::new(
            "t".into(),
            Uuid::new_v4(),
            dec!(60),
            dec!(100),
            "KRW".into(),
            "KRW".into(),
            dec!(50),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn currency_mismatch_rejected() {
        let err = Refund::new(
            "t".into(),
            Uuid::new_v4(),
            dec!(10),
            dec!(100),
            "KRW".into(),
            "USD".into(),
            dec!(0),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
