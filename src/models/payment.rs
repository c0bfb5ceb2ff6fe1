//! Payment aggregate and its strictly-enforced state machine (spec §4.4).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Ready,
    Processing,
    Approved,
    Confirmed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Rank used by webhook out-of-order tolerance (spec §4.4): higher rank
    /// means "further along"; `Failed`/`Refunded` are terminal and rank highest
    /// within their own forward/backward branch.
    pub fn rank(self) -> u8 {
        match self {
            PaymentStatus::Ready => 0,
            PaymentStatus::Processing => 1,
            PaymentStatus::Approved => 2,
            PaymentStatus::Confirmed => 3,
            PaymentStatus::Refunded => 4,
            PaymentStatus::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    fn allowed_next(self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            Ready => &[Processing],
            Processing => &[Approved, Failed],
            Approved => &[Confirmed, Failed],
            Confirmed => &[Refunded],
            Failed => &[],
            Refunded => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub tenant_id: String,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub pg_transaction_id: Option<String>,
    pub pg_payment_key: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Payment {
    pub fn new(
        tenant_id: String,
        order_id: Uuid,
        amount: Decimal,
        currency: String,
        payment_method: Option<String>,
    ) -> Result<Self> {
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation("amount must be > 0".into()));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            order_id,
            amount,
            currency,
            status: PaymentStatus::Ready,
            payment_method,
            pg_transaction_id: None,
            pg_payment_key: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            approved_at: None,
            confirmed_at: None,
            failed_at: None,
            version: 0,
        })
    }

    fn transition(&self, to: PaymentStatus) -> Result<Self> {
        if !self.status.allowed_next().contains(&to) {
            return Err(AppError::InvalidPaymentState(format!(
                "payment {} cannot transition {:?} -> {:?}",
                self.id, self.status, to
            )));
        }
        let mut next = self.clone();
        next.status = to;
        next.updated_at = Utc::now();
        next.version += 1;
        Ok(next)
    }

    pub fn start_processing(&self) -> Result<Self> {
        self.transition(PaymentStatus::Processing)
    }

    pub fn mark_approved(&self, pg_transaction_id: String, pg_payment_key: String) -> Result<Self> {
        let mut next = self.transition(PaymentStatus::Approved)?;
        next.pg_transaction_id = Some(pg_transaction_id);
        next.pg_payment_key = Some(pg_payment_key);
        next.approved_at = Some(Utc::now());
        Ok(next)
    }

    pub fn mark_confirmed(&self) -> Result<Self> {
        let mut next = self.transition(PaymentStatus::Confirmed)?;
        next.confirmed_at = Some(Utc::now());
        Ok(next)
    }

    pub fn mark_failed(&self, reason: impl Into<String>) -> Result<Self> {
        let mut next = self.transition(PaymentStatus::Failed)?;
        next.failure_reason = Some(reason.into());
        next.failed_at = Some(Utc::now());
        Ok(next)
    }

    pub fn mark_refunded(&self) -> Result<Self> {
        self.transition(PaymentStatus::Refunded)
    }

    /// Pure query: has the authorization aged past `max_age` since it moved
    /// into PROCESSING (approximated here via `updated_at` at the point the
    /// APPROVED state was reached, i.e. `approved_at`).
    pub fn is_approval_expired(&self, now: DateTime<Utc>, max_age: ChronoDuration) -> bool {
        match self.approved_at {
            Some(approved_at) => now - approved_at > max_age,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> Payment {
        Payment::new(
            "t".into(),
            Uuid::new_v4(),
            Decimal::new(20000, 0),
            "KRW".into(),
            Some("CARD".into()),
        )
        .unwrap()
    }

    #[test]
    fn happy_path_transitions() {
        let p = ready();
        let processing = p.start_processing().unwrap();
        let approved = processing
            .mark_approved("txn-1".into(), "key-1".into())
            .unwrap();
        let confirmed = approved.mark_confirmed().unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Confirmed);
        assert!(confirmed.confirmed_at.is_some());
    }

    #[test]
    fn illegal_transition_rejected() {
        let p = ready();
        assert!(p.mark_confirmed().is_err());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let p = ready().start_processing().unwrap();
        let failed = p.mark_failed("timeout").unwrap();
        assert!(failed.mark_approved("x".into(), "y".into()).is_err());
        assert!(failed.status.allowed_next().is_empty());
    }

    #[test]
    fn approval_expiry_is_pure() {
        let p = ready()
            .start_processing()
            .unwrap()
            .mark_approved("t".into(), "k".into())
            .unwrap();
        let soon = p.approved_at.unwrap() + ChronoDuration::hours(1);
        assert!(!p.is_approval_expired(soon, ChronoDuration::hours(24)));
        let later = p.approved_at.unwrap() + ChronoDuration::hours(25);
        assert!(p.is_approval_expired(later, ChronoDuration::hours(24)));
    }

    #[test]
    fn rank_orders_out_of_band_webhooks() {
        assert!(PaymentStatus::Confirmed.rank() > PaymentStatus::Approved.rank());
        assert!(PaymentStatus::Approved.rank() > PaymentStatus::Processing.rank());
    }
}
