//! Order aggregate (spec §3). Immutable value record + pure transition
//! functions, per spec §9 ("mutable aggregates ... become immutable value
//! records plus pure transition functions returning a new record").

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub currency: String,
    #[sqlx(json)]
    pub line_items: sqlx::types::Json<Vec<LineItem>>,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Construct a new PENDING order, checking the invariants in spec §3.
    pub fn new(
        tenant_id: String,
        user_id: String,
        currency: String,
        line_items: Vec<LineItem>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self> {
        if line_items.is_empty() {
            return Err(AppError::Validation("line_items must not be empty".into()));
        }
        let total_amount: Decimal = line_items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.quantity))
            .sum();
        if total_amount < Decimal::ZERO {
            return Err(AppError::Validation("total_amount must be >= 0".into()));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            currency,
            line_items: sqlx::types::Json(line_items),
            total_amount,
            status: OrderStatus::Pending,
            metadata,
            created_at: now,
            updated_at: now,
            paid_at: None,
            completed_at: None,
        })
    }

    /// PENDING -> PAID. Invalid from any other state.
    pub fn mark_paid(&self) -> Result<Self> {
        if self.status != OrderStatus::Pending {
            return Err(AppError::Invariant(format!(
                "cannot mark order {} paid from status {:?}",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.status = OrderStatus::Paid;
        next.paid_at = Some(Utc::now());
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// PAID -> COMPLETED. `paid_at` must already be set (invariant from spec §3).
    pub fn mark_completed(&self) -> Result<Self> {
        if self.status != OrderStatus::Paid || self.paid_at.is_none() {
            return Err(AppError::Invariant(format!(
                "cannot complete order {} from status {:?}",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.status = OrderStatus::Completed;
        next.completed_at = Some(Utc::now());
        next.updated_at = Utc::now();
        Ok(next)
    }

    pub fn mark_cancelled(&self) -> Result<Self> {
        if matches!(self.status, OrderStatus::Completed | OrderStatus::Cancelled) {
            return Err(AppError::Invariant(format!(
                "cannot cancel order {} from status {:?}",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.status = OrderStatus::Cancelled;
        next.updated_at = Utc::now();
        Ok(next)
    }

    pub fn mark_failed(&self) -> Result<Self> {
        if matches!(self.status, OrderStatus::Completed | OrderStatus::Cancelled) {
            return Err(AppError::Invariant(format!(
                "cannot fail order {} from status {:?}",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.status = OrderStatus::Failed;
        next.updated_at = Utc::now();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> LineItem {
        LineItem {
            sku: "P1".into(),
            quantity: 2,
            unit_price: Decimal::new(10000, 0),
        }
    }

    #[test]
    fn total_amount_is_derived() {
        let order = Order::new(
            "tenant-a".into(),
            "user-1".into(),
            "KRW".into(),
            vec![item()],
            None,
        )
        .unwrap();
        assert_eq!(order.total_amount, Decimal::new(20000, 0));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn empty_line_items_rejected() {
        let err = Order::new("t".into(), "u".into(), "KRW".into(), vec![], None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn paid_then_completed_sets_both_timestamps() {
        let order = Order::new("t".into(), "u".into(), "KRW".into(), vec![item()], None).unwrap();
        let paid = order.mark_paid().unwrap();
        assert!(paid.paid_at.is_some());
        let completed = paid.mark_completed().unwrap();
        assert!(completed.paid_at.is_some() && completed.completed_at.is_some());
    }

    #[test]
    fn cannot_complete_without_paid() {
        let order = Order::new("t".into(), "u".into(), "KRW".into(), vec![item()], None).unwrap();
        assert!(order.mark_completed().is_err());
    }
}
